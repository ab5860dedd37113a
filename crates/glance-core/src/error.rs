use serde::Serialize;
use thiserror::Error;

/// Terminal failure taxonomy reported through the `failure` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// No face seen for longer than the challenge timeout.
    FaceNotFound,
    /// Face present but the active challenge never passed in time.
    ChallengeTimeout,
    /// The camera could not be acquired because permission was denied.
    CameraAccessDenied,
    /// A collaborator failed to initialize.
    ModelLoadFailed,
    /// All challenges passed, but descriptor extraction failed.
    RecognitionFailed,
}

impl FailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCode::FaceNotFound => "FACE_NOT_FOUND",
            FailureCode::ChallengeTimeout => "CHALLENGE_TIMEOUT",
            FailureCode::CameraAccessDenied => "CAMERA_ACCESS_DENIED",
            FailureCode::ModelLoadFailed => "MODEL_LOAD_FAILED",
            FailureCode::RecognitionFailed => "RECOGNITION_FAILED",
        }
    }

    /// Default user-facing message for this code.
    pub fn message(self) -> &'static str {
        match self {
            FailureCode::FaceNotFound => "no face detected; position your face in the frame",
            FailureCode::ChallengeTimeout => "challenge not completed in time",
            FailureCode::CameraAccessDenied => "camera access was denied",
            FailureCode::ModelLoadFailed => "failed to load face models",
            FailureCode::RecognitionFailed => "failed to extract face descriptor",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a landmark or embedding collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("model initialization failed: {0}")]
    Init(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("collaborator used before load")]
    NotLoaded,
}

/// Error raised by the host's video source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera unavailable: {0}")]
    Unavailable(String),
}

/// Non-terminal session errors, published through the `error` event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("session started before models were loaded")]
    NotLoaded,
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("inference engine thread exited")]
    EngineClosed,
    #[error("landmark detection failed: {0}")]
    Detection(CollaboratorError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_codes_serialize_to_stable_names() {
        for code in [
            FailureCode::FaceNotFound,
            FailureCode::ChallengeTimeout,
            FailureCode::CameraAccessDenied,
            FailureCode::ModelLoadFailed,
            FailureCode::RecognitionFailed,
        ] {
            let tag = serde_json::to_value(code).unwrap();
            assert_eq!(tag, serde_json::Value::String(code.as_str().to_string()));
            assert_eq!(code.to_string(), code.as_str());
        }
    }
}
