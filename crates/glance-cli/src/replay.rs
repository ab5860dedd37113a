//! `glance replay`: drive a real liveness session from a scripted timeline.
//!
//! A script describes piecewise-constant face signals. `frames` are keyed by
//! absolute time since start; `responses` are keyed by time since the named
//! challenge became active, so one script can answer any challenge order.
//! The replay collaborators synthesize landmark sets that reproduce each
//! frame's EAR and yaw.

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use glance_core::synthetic::{SyntheticDetector, SyntheticExtractor, SyntheticFace};
use glance_core::{
    CameraError, ChallengeKind, ChallengeSequence, Event, EventName, Frame, LandmarkDetector,
    LivenessConfig, LivenessSession, RenderSurface, SessionController, VideoSource,
};
use glance_models::ModelManifest;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::models::VerifiedDetector;

const OPEN_EAR: f32 = 0.32;
const DEFAULT_TICK_MS: u64 = 40;
const DEFAULT_RESPONSIVE_DURATION_MS: u64 = 30_000;

#[derive(Args)]
pub struct ReplayArgs {
    /// Replay script (JSON)
    script: PathBuf,

    /// Liveness config (TOML); GLANCE_* env vars override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for challenge ordering
    #[arg(long)]
    seed: Option<u64>,

    /// Fixed challenge order instead of a random one
    #[arg(long, value_enum, value_delimiter = ',')]
    sequence: Vec<ChallengeArg>,

    /// Verify this model directory before loading
    #[arg(long, requires = "manifest")]
    models: Option<PathBuf>,

    #[arg(long)]
    manifest: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChallengeArg {
    Blink,
    TurnLeft,
    TurnRight,
}

impl From<ChallengeArg> for ChallengeKind {
    fn from(arg: ChallengeArg) -> Self {
        match arg {
            ChallengeArg::Blink => ChallengeKind::Blink,
            ChallengeArg::TurnLeft => ChallengeKind::TurnLeft,
            ChallengeArg::TurnRight => ChallengeKind::TurnRight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScriptFrame {
    pub t_ms: u64,
    #[serde(default = "default_face")]
    pub face: bool,
    #[serde(default = "default_ear")]
    pub ear: f32,
    #[serde(default)]
    pub yaw: f32,
}

fn default_face() -> bool {
    true
}

fn default_ear() -> f32 {
    OPEN_EAR
}

impl ScriptFrame {
    fn to_frame(self) -> Frame {
        if self.face {
            SyntheticFace::new(self.ear, self.yaw).encode_frame()
        } else {
            Frame::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayScript {
    #[serde(default)]
    pub tick_ms: Option<u64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub frames: Vec<ScriptFrame>,
    #[serde(default)]
    pub responses: HashMap<ChallengeKind, Vec<ScriptFrame>>,
    /// Raw embedding the extractor returns; a fixed one when absent.
    #[serde(default)]
    pub descriptor: Option<Vec<f32>>,
}

impl ReplayScript {
    fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.unwrap_or(DEFAULT_TICK_MS).max(1))
    }

    fn duration_ms(&self) -> u64 {
        self.duration_ms.unwrap_or_else(|| {
            if self.responses.is_empty() {
                self.frames.last().map_or(0, |f| f.t_ms)
            } else {
                DEFAULT_RESPONSIVE_DURATION_MS
            }
        })
    }

    /// The frame in effect at `t_ms` given the active challenge (kind and
    /// the time it became active). No frame in effect means no face.
    fn sample(&self, t_ms: u64, active: Option<(ChallengeKind, u64)>) -> Frame {
        let relative = active.and_then(|(kind, since)| {
            let frames = self.responses.get(&kind)?;
            latest_at(frames, t_ms.saturating_sub(since))
        });
        relative
            .or_else(|| latest_at(&self.frames, t_ms))
            .map_or_else(Frame::default, ScriptFrame::to_frame)
    }

    fn extractor(&self) -> SyntheticExtractor {
        match &self.descriptor {
            Some(values) => SyntheticExtractor::new(values.clone()),
            None => SyntheticExtractor::fixed(),
        }
    }
}

fn latest_at(frames: &[ScriptFrame], t_ms: u64) -> Option<ScriptFrame> {
    frames.iter().rev().find(|f| f.t_ms <= t_ms).copied()
}

/// The replay camera is always available.
struct ReplayCamera {
    attached: bool,
}

impl VideoSource for ReplayCamera {
    fn is_attached(&self) -> bool {
        self.attached
    }

    fn attach(&mut self) -> Result<(), CameraError> {
        self.attached = true;
        Ok(())
    }

    fn release(&mut self) {
        self.attached = false;
    }
}

struct NullSurface;

impl RenderSurface for NullSurface {
    fn clear(&mut self) {}
}

pub async fn run(args: ReplayArgs) -> Result<ExitCode> {
    let raw = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading script {}", args.script.display()))?;
    let script: ReplayScript = serde_json::from_str(&raw)
        .with_context(|| format!("parsing script {}", args.script.display()))?;

    let config = match &args.config {
        Some(path) => {
            let config = LivenessConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?
                .with_env_overrides();
            config.validate().context("invalid liveness config")?;
            config
        }
        None => LivenessConfig::from_env().context("invalid liveness config")?,
    };

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let sequence = if args.sequence.is_empty() {
        None
    } else {
        let kinds: Vec<ChallengeKind> = args.sequence.iter().map(|&a| a.into()).collect();
        Some(ChallengeSequence::from_kinds(&kinds))
    };

    let events = match (args.models, args.manifest) {
        (Some(dir), Some(manifest_path)) => {
            let manifest = ModelManifest::from_file(&manifest_path)
                .with_context(|| format!("loading manifest {}", manifest_path.display()))?;
            let detector = VerifiedDetector::new(SyntheticDetector::new(), dir, manifest);
            replay(&script, config, detector, rng, sequence, true).await?
        }
        _ => replay(&script, config, SyntheticDetector::new(), rng, sequence, true).await?,
    };

    let succeeded = events.iter().any(|e| matches!(e, Event::Success { .. }));
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Run `script` through a fresh session and return every published event.
pub async fn replay<D: LandmarkDetector>(
    script: &ReplayScript,
    config: LivenessConfig,
    detector: D,
    rng: StdRng,
    sequence: Option<ChallengeSequence>,
    echo: bool,
) -> Result<Vec<Event>> {
    let controller = SessionController::with_rng(config, detector, script.extractor(), rng)
        .context("creating liveness session")?;
    let mut session = LivenessSession::from_controller(controller);

    let clock = Rc::new(Cell::new(0u64));
    let active: Rc<Cell<Option<(ChallengeKind, u64)>>> = Rc::new(Cell::new(None));
    let log = Rc::new(RefCell::new(Vec::new()));

    for name in [
        EventName::Ready,
        EventName::Challenge,
        EventName::Progress,
        EventName::Success,
        EventName::Failure,
        EventName::Error,
    ] {
        let clock = Rc::clone(&clock);
        let active = Rc::clone(&active);
        let log = Rc::clone(&log);
        session.on(name, move |event| {
            if let Event::Challenge { kind, .. } = event {
                active.set(Some((*kind, clock.get())));
            }
            if echo {
                let mut line = serde_json::to_value(event)?;
                line["ts"] = chrono::Utc::now().to_rfc3339().into();
                line["t_ms"] = clock.get().into();
                println!("{line}");
            }
            log.borrow_mut().push(event.clone());
            Ok(())
        });
    }

    if session.load().await.is_err() {
        return Ok(log.take());
    }

    let base = Instant::now();
    let mut camera = ReplayCamera { attached: false };
    let mut surface = NullSurface;
    match sequence {
        Some(sequence) => session.start_with_sequence(base, sequence, &mut camera, &mut surface),
        None => session.start(base, &mut camera, &mut surface),
    }
    .context("starting liveness session")?;

    let tick = script.tick();
    let end = Duration::from_millis(script.duration_ms());
    let mut t = Duration::ZERO;
    while session.is_running() && t <= end {
        let t_ms = t.as_millis() as u64;
        clock.set(t_ms);
        let frame = script.sample(t_ms, active.get());
        session.tick(base + t, &frame);
        while session.in_flight() > 0 {
            if !session.wait_reply().await {
                bail!("inference engine stopped");
            }
        }
        t += tick;
    }

    if session.is_running() {
        tracing::warn!(
            duration_ms = end.as_millis() as u64,
            "script ended before the session finished"
        );
        session.stop(Some(&mut camera), Some(&mut surface));
    } else {
        camera.release();
    }

    Ok(log.take())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glance_core::FailureCode;

    fn responsive_script() -> ReplayScript {
        serde_json::from_str(
            r#"{
                "responses": {
                    "blink": [
                        { "t_ms": 0, "ear": 0.35 },
                        { "t_ms": 200, "ear": 0.1 },
                        { "t_ms": 400, "ear": 0.35 }
                    ],
                    "turn_left": [
                        { "t_ms": 0 },
                        { "t_ms": 200, "yaw": 0.6 }
                    ],
                    "turn_right": [
                        { "t_ms": 0 },
                        { "t_ms": 200, "yaw": -0.6 }
                    ]
                }
            }"#,
        )
        .unwrap()
    }

    fn challenges(events: &[Event]) -> Vec<ChallengeKind> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Challenge { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn sample_prefers_responses_for_the_active_challenge() {
        let script = responsive_script();
        let frame = script.sample(1_250, Some((ChallengeKind::TurnLeft, 1_000)));
        assert_eq!(
            SyntheticFace::decode_frame(&frame),
            Some(SyntheticFace::new(OPEN_EAR, 0.6))
        );
        // Nothing scripted before a challenge is active.
        assert_eq!(SyntheticFace::decode_frame(&script.sample(0, None)), None);
    }

    #[tokio::test]
    async fn responsive_script_passes_any_order() {
        for seed in 0..4 {
            let events = replay(
                &responsive_script(),
                LivenessConfig::default(),
                SyntheticDetector::new(),
                StdRng::seed_from_u64(seed),
                None,
                false,
            )
            .await
            .unwrap();

            let mut seen = challenges(&events);
            assert_eq!(seen.len(), 3, "seed {seed}");
            seen.sort_by_key(|k| k.as_str());
            assert_eq!(
                seen,
                vec![
                    ChallengeKind::Blink,
                    ChallengeKind::TurnLeft,
                    ChallengeKind::TurnRight
                ]
            );
            assert!(matches!(events.first(), Some(Event::Ready)));
            assert!(matches!(
                events.last(),
                Some(Event::Success {
                    normalized: true,
                    ..
                })
            ));
        }
    }

    #[tokio::test]
    async fn absent_face_times_out() {
        let script: ReplayScript = serde_json::from_str(
            r#"{ "frames": [ { "t_ms": 0, "face": false } ], "duration_ms": 6000 }"#,
        )
        .unwrap();
        let events = replay(
            &script,
            LivenessConfig::default(),
            SyntheticDetector::new(),
            StdRng::seed_from_u64(7),
            Some(ChallengeSequence::from_kinds(&[ChallengeKind::Blink])),
            false,
        )
        .await
        .unwrap();

        assert_eq!(challenges(&events), vec![ChallengeKind::Blink]);
        assert!(matches!(
            events.last(),
            Some(Event::Failure {
                code: FailureCode::FaceNotFound,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn short_script_ends_without_terminal_event() {
        let script: ReplayScript =
            serde_json::from_str(r#"{ "frames": [ { "t_ms": 0 }, { "t_ms": 400 } ] }"#).unwrap();
        let events = replay(
            &script,
            LivenessConfig::default(),
            SyntheticDetector::new(),
            StdRng::seed_from_u64(1),
            None,
            false,
        )
        .await
        .unwrap();

        assert!(!events
            .iter()
            .any(|e| matches!(e, Event::Success { .. } | Event::Failure { .. })));
    }
}
