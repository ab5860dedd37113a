//! Capabilities the engine consumes but does not implement.
//!
//! Inference collaborators run on the engine thread, so they must be `Send`.
//! Host hooks (`VideoSource`, `RenderSurface`) are only touched from the
//! session's own context.

use crate::error::{CameraError, CollaboratorError};
use crate::types::{Frame, LandmarkSet};

/// Detect face-mesh landmarks in a frame.
pub trait LandmarkDetector: Send + 'static {
    /// Initialize model weights. Called once, from `load`.
    fn load(&mut self) -> Result<(), CollaboratorError>;

    /// `Ok(None)` when no face is present.
    fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>, CollaboratorError>;
}

/// Produce a raw identity embedding from the face in a frame.
pub trait EmbeddingExtractor: Send + 'static {
    fn load(&mut self) -> Result<(), CollaboratorError>;

    /// The raw (un-normalized) embedding of the face in `frame`.
    fn extract(&mut self, frame: &Frame) -> Result<Vec<f32>, CollaboratorError>;
}

/// Host camera stream.
pub trait VideoSource {
    fn is_attached(&self) -> bool;

    /// Acquire the camera stream if not already attached.
    fn attach(&mut self) -> Result<(), CameraError>;

    /// Stop all tracks. Must be safe to call when nothing is attached.
    fn release(&mut self);
}

/// Host debug overlay.
pub trait RenderSurface {
    fn clear(&mut self);
}
