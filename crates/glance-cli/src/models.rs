//! Model manifest checks, standalone and as part of collaborator `load`.

use anyhow::{Context, Result};
use glance_core::{CollaboratorError, Frame, LandmarkDetector, LandmarkSet};
use glance_models::ModelManifest;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// `glance check-models <dir> --manifest models.toml`
pub fn check(dir: &Path, manifest_path: &Path) -> Result<ExitCode> {
    let manifest = ModelManifest::from_file(manifest_path)
        .with_context(|| format!("loading manifest {}", manifest_path.display()))?;

    let mut failed = 0usize;
    for model in &manifest.models {
        match model.verify_in(dir) {
            Ok(()) => println!("  ok      {}", model.name),
            Err(e) => {
                failed += 1;
                println!("  FAILED  {}", model.name);
                tracing::error!(model = %model.name, error = %e, "model verification failed");
            }
        }
    }

    println!(
        "{} of {} model(s) verified in {}",
        manifest.models.len() - failed,
        manifest.models.len(),
        dir.display()
    );

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Landmark detector that refuses to load unless the model directory
/// matches its manifest.
pub struct VerifiedDetector<D> {
    inner: D,
    model_dir: PathBuf,
    manifest: ModelManifest,
}

impl<D: LandmarkDetector> VerifiedDetector<D> {
    pub fn new(inner: D, model_dir: PathBuf, manifest: ModelManifest) -> Self {
        Self {
            inner,
            model_dir,
            manifest,
        }
    }
}

impl<D: LandmarkDetector> LandmarkDetector for VerifiedDetector<D> {
    fn load(&mut self) -> Result<(), CollaboratorError> {
        self.manifest
            .verify_dir(&self.model_dir)
            .map_err(|e| CollaboratorError::Init(e.to_string()))?;
        self.inner.load()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>, CollaboratorError> {
        self.inner.detect(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glance_core::synthetic::SyntheticDetector;
    use glance_models::ModelEntry;
    use std::fs;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "glance-cli-test-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[test]
    fn verified_detector_fails_load_on_missing_model() {
        let dir = scratch_dir("missing");
        let manifest = ModelManifest {
            models: vec![ModelEntry {
                name: "face_landmarker.bin".into(),
                sha256: "00".into(),
            }],
        };
        let mut detector = VerifiedDetector::new(SyntheticDetector::new(), dir, manifest);
        assert!(matches!(detector.load(), Err(CollaboratorError::Init(_))));
    }

    #[test]
    fn verified_detector_loads_with_matching_digest() {
        let dir = scratch_dir("ok");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("face_landmarker.bin"), b"hello").unwrap();
        let manifest = ModelManifest {
            models: vec![ModelEntry {
                name: "face_landmarker.bin".into(),
                sha256: "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
                    .into(),
            }],
        };
        let mut detector = VerifiedDetector::new(SyntheticDetector::new(), dir.clone(), manifest);
        detector.load().unwrap();
        let _ = fs::remove_dir_all(&dir);
    }
}
