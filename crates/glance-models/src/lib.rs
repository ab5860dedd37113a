use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One model file and its expected SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub sha256: String,
}

/// The set of model files a collaborator needs, as listed in `models.toml`:
///
/// ```toml
/// [[models]]
/// name = "face_landmarker.bin"
/// sha256 = "…"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelManifest {
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model file not found: {name} ({path})")]
    MissingModel { name: String, path: PathBuf },

    #[error("failed to open model file: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read model file: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "model checksum mismatch for {name} ({path})\n  expected: {expected}\n  got:      {got}"
    )]
    ChecksumMismatch {
        name: String,
        path: PathBuf,
        expected: String,
        got: String,
    },

    #[error("invalid model manifest: {0}")]
    Manifest(#[from] toml::de::Error),
}

impl ModelManifest {
    pub fn from_toml_str(s: &str) -> Result<Self, ModelIntegrityError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ModelIntegrityError> {
        let contents = fs::read_to_string(path).map_err(|source| ModelIntegrityError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Verify every entry under `model_dir`. Stops at the first failure.
    pub fn verify_dir(&self, model_dir: &Path) -> Result<(), ModelIntegrityError> {
        self.models
            .iter()
            .try_for_each(|model| model.verify_in(model_dir))
    }
}

impl ModelEntry {
    /// Check this entry's file under `model_dir` against its digest.
    pub fn verify_in(&self, model_dir: &Path) -> Result<(), ModelIntegrityError> {
        let path = model_dir.join(&self.name);
        if !path.is_file() {
            return Err(ModelIntegrityError::MissingModel {
                name: self.name.clone(),
                path,
            });
        }

        let got = file_digest(&path)?;
        if !got.eq_ignore_ascii_case(&self.sha256) {
            return Err(ModelIntegrityError::ChecksumMismatch {
                name: self.name.clone(),
                path,
                expected: self.sha256.clone(),
                got,
            });
        }
        Ok(())
    }
}

/// Lower-case hex SHA-256 of the file at `path`, streamed.
fn file_digest(path: &Path) -> Result<String, ModelIntegrityError> {
    let mut file = fs::File::open(path).map_err(|source| ModelIntegrityError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|source| ModelIntegrityError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("hello")
    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "glance-models-test-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    fn manifest(name: &str, sha256: &str) -> ModelManifest {
        ModelManifest {
            models: vec![ModelEntry {
                name: name.to_string(),
                sha256: sha256.to_string(),
            }],
        }
    }

    #[test]
    fn missing_model_is_reported() {
        let dir = scratch_dir("missing");
        let err = manifest("nope.bin", "00").verify_dir(&dir).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::MissingModel { .. }));
    }

    #[test]
    fn mismatch_reports_actual_digest() {
        let dir = scratch_dir("mismatch");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("model.bin"), b"hello").unwrap();

        let err = manifest("model.bin", "00").verify_dir(&dir).unwrap_err();
        match err {
            ModelIntegrityError::ChecksumMismatch { expected, got, .. } => {
                assert_eq!(expected, "00");
                assert_eq!(got, HELLO_SHA256);
            }
            other => panic!("unexpected error {other}"),
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn digest_comparison_ignores_case() {
        let dir = scratch_dir("case");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("model.bin"), b"hello").unwrap();

        manifest("model.bin", &HELLO_SHA256.to_uppercase())
            .verify_dir(&dir)
            .unwrap();

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_dir_checks_each_entry() {
        let dir = scratch_dir("dir");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("landmarks.bin"), b"hello").unwrap();

        let mut m = manifest("landmarks.bin", HELLO_SHA256);
        m.verify_dir(&dir).unwrap();
        m.models.push(ModelEntry {
            name: "embedding.bin".into(),
            sha256: HELLO_SHA256.into(),
        });
        let err = m.verify_dir(&dir).unwrap_err();
        assert!(matches!(
            err,
            ModelIntegrityError::MissingModel { ref name, .. } if name == "embedding.bin"
        ));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn manifest_parses_from_toml() {
        let m = ModelManifest::from_toml_str(
            r#"
            [[models]]
            name = "face_landmarker.bin"
            sha256 = "abc"

            [[models]]
            name = "face_recognition.bin"
            sha256 = "def"
            "#,
        )
        .unwrap();
        assert_eq!(m.models.len(), 2);
        assert_eq!(m.models[1].name, "face_recognition.bin");
    }

    #[test]
    fn manifest_rejects_bad_toml() {
        let err = ModelManifest::from_toml_str("[[models]]\nname = 3\n").unwrap_err();
        assert!(matches!(err, ModelIntegrityError::Manifest(_)));
    }
}
