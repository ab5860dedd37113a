use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::liveness::EYES_OPEN_EAR;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Liveness session tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessConfig {
    /// EAR below which the eyes count as closed.
    pub blink_ear_threshold: f32,
    /// Yaw ratio magnitude a head turn must exceed.
    pub head_turn_threshold: f32,
    /// Time budget per challenge, also the no-face budget.
    pub challenge_timeout: Duration,
    /// Target rate of landmark detection, independent of display refresh.
    pub target_fps: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            blink_ear_threshold: 0.25,
            head_turn_threshold: 0.4,
            challenge_timeout: Duration::from_millis(5000),
            target_fps: 30,
        }
    }
}

/// On-disk form; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    blink_ear_threshold: Option<f32>,
    head_turn_threshold: Option<f32>,
    challenge_timeout_ms: Option<u64>,
    target_fps: Option<u32>,
}

impl LivenessConfig {
    /// Parse a TOML document, filling missing keys with defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(s)?;
        let defaults = Self::default();
        let config = Self {
            blink_ear_threshold: file
                .blink_ear_threshold
                .unwrap_or(defaults.blink_ear_threshold),
            head_turn_threshold: file
                .head_turn_threshold
                .unwrap_or(defaults.head_turn_threshold),
            challenge_timeout: file
                .challenge_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.challenge_timeout),
            target_fps: file.target_fps.unwrap_or(defaults.target_fps),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Override fields from `GLANCE_*` environment variables.
    ///
    /// Unset or unparseable variables keep the current value. The result is
    /// not validated; call [`validate`](Self::validate) afterwards.
    pub fn with_env_overrides(self) -> Self {
        Self {
            blink_ear_threshold: env_f32("GLANCE_BLINK_EAR_THRESHOLD", self.blink_ear_threshold),
            head_turn_threshold: env_f32("GLANCE_HEAD_TURN_THRESHOLD", self.head_turn_threshold),
            challenge_timeout: Duration::from_millis(env_u64(
                "GLANCE_CHALLENGE_TIMEOUT_MS",
                self.challenge_timeout.as_millis() as u64,
            )),
            target_fps: env_u32("GLANCE_TARGET_FPS", self.target_fps),
        }
    }

    /// Defaults overlaid with `GLANCE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.blink_ear_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                field: "blink_ear_threshold",
                reason: "must be positive",
            });
        }
        // An overlapping open latch would let one open-eye frame pass a blink.
        if self.blink_ear_threshold >= EYES_OPEN_EAR {
            return Err(ConfigError::Invalid {
                field: "blink_ear_threshold",
                reason: "must be below the open-eye EAR (0.3)",
            });
        }
        if !(self.head_turn_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                field: "head_turn_threshold",
                reason: "must be positive",
            });
        }
        if self.challenge_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "challenge_timeout",
                reason: "must be non-zero",
            });
        }
        if self.target_fps == 0 {
            return Err(ConfigError::Invalid {
                field: "target_fps",
                reason: "must be non-zero",
            });
        }
        Ok(())
    }

    /// Minimum spacing between forwarded frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.target_fps.max(1)))
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
