//! Synthetic landmark sets that reproduce a requested EAR and head yaw.
//!
//! Used by tests and by the CLI replay collaborators, so the state machine
//! and the metric functions can be exercised without real inference.

use crate::collaborator::{EmbeddingExtractor, LandmarkDetector};
use crate::error::CollaboratorError;
use crate::metrics::{EyeIndices, CHIN, LEFT_CHEEK, LEFT_EYE, RIGHT_CHEEK, RIGHT_EYE};
use crate::types::{Frame, LandmarkSet, Point3, DESCRIPTOR_LEN};

const EYE_WIDTH: f32 = 0.1;
const CHEEK_SPAN: f32 = 0.6;
const MAX_YAW: f32 = 0.99;
const FRAME_TAG: u8 = b'G';

/// Target signal values for one synthetic frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticFace {
    pub ear: f32,
    pub yaw: f32,
}

impl SyntheticFace {
    pub fn new(ear: f32, yaw: f32) -> Self {
        Self { ear, yaw }
    }

    /// Build a full face-mesh set whose mean EAR equals `ear` and whose
    /// yaw ratio equals `yaw` (clamped to +/-0.99).
    pub fn landmarks(&self) -> LandmarkSet {
        let mut set = neutral_face();
        place_eye(&mut set, LEFT_EYE, 0.35, self.ear);
        place_eye(&mut set, RIGHT_EYE, 0.65, self.ear);

        // d / sqrt(span^2 + d^2) = yaw  =>  d = yaw * span / sqrt(1 - yaw^2)
        let yaw = self.yaw.clamp(-MAX_YAW, MAX_YAW);
        let d = yaw * CHEEK_SPAN / (1.0 - yaw * yaw).sqrt();
        set.set(CHIN, Point3::new(0.5, 0.85, 0.0));
        set.set(LEFT_CHEEK, Point3::new(0.2, 0.55, -d / 2.0));
        set.set(RIGHT_CHEEK, Point3::new(0.8, 0.55, d / 2.0));
        set
    }

    /// Encode the target signals into an opaque frame that
    /// [`SyntheticDetector`] understands.
    pub fn encode_frame(&self) -> Frame {
        let mut data = Vec::with_capacity(9);
        data.push(FRAME_TAG);
        data.extend_from_slice(&self.ear.to_le_bytes());
        data.extend_from_slice(&self.yaw.to_le_bytes());
        Frame::new(1, 1, data)
    }

    /// Inverse of [`encode_frame`](Self::encode_frame); any other frame means "no face".
    pub fn decode_frame(frame: &Frame) -> Option<Self> {
        let [tag, rest @ ..] = frame.data.as_slice() else {
            return None;
        };
        if *tag != FRAME_TAG || rest.len() != 8 {
            return None;
        }
        let ear = f32::from_le_bytes(rest[0..4].try_into().ok()?);
        let yaw = f32::from_le_bytes(rest[4..8].try_into().ok()?);
        Some(Self { ear, yaw })
    }
}

/// Landmark detector that reads target signals back out of synthetic frames.
#[derive(Debug, Default)]
pub struct SyntheticDetector {
    fail_load: Option<String>,
}

impl SyntheticDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_load(reason: &str) -> Self {
        Self {
            fail_load: Some(reason.to_string()),
        }
    }
}

impl LandmarkDetector for SyntheticDetector {
    fn load(&mut self) -> Result<(), CollaboratorError> {
        match &self.fail_load {
            Some(reason) => Err(CollaboratorError::Init(reason.clone())),
            None => Ok(()),
        }
    }

    fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>, CollaboratorError> {
        Ok(SyntheticFace::decode_frame(frame).map(|face| face.landmarks()))
    }
}

/// Embedding extractor returning a fixed vector (or a fixed error).
#[derive(Debug)]
pub struct SyntheticExtractor {
    embedding: Result<Vec<f32>, String>,
}

impl SyntheticExtractor {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self {
            embedding: Ok(embedding),
        }
    }

    /// A deterministic, non-normalized 128-value embedding.
    pub fn fixed() -> Self {
        Self::new((0..DESCRIPTOR_LEN).map(|i| 1.0 + i as f32 / 64.0).collect())
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            embedding: Err(reason.to_string()),
        }
    }
}

impl EmbeddingExtractor for SyntheticExtractor {
    fn load(&mut self) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn extract(&mut self, _frame: &Frame) -> Result<Vec<f32>, CollaboratorError> {
        self.embedding
            .clone()
            .map_err(CollaboratorError::Inference)
    }
}

/// A full-cardinality set with every point at the frame centre.
pub fn neutral_face() -> LandmarkSet {
    LandmarkSet::uniform(Point3::new(0.5, 0.5, 0.0))
}

fn place_eye(set: &mut LandmarkSet, idx: EyeIndices, cx: f32, ear: f32) {
    let cy = 0.4;
    let w = EYE_WIDTH;
    let h = ear * w;
    set.set(idx.outer, Point3::new(cx - w / 2.0, cy, 0.0));
    set.set(idx.inner, Point3::new(cx + w / 2.0, cy, 0.0));
    set.set(idx.upper1, Point3::new(cx - w / 6.0, cy - h / 2.0, 0.0));
    set.set(idx.upper2, Point3::new(cx + w / 6.0, cy - h / 2.0, 0.0));
    set.set(idx.lower1, Point3::new(cx + w / 6.0, cy + h / 2.0, 0.0));
    set.set(idx.lower2, Point3::new(cx - w / 6.0, cy + h / 2.0, 0.0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{head_yaw, mean_eye_aspect_ratio};

    #[test]
    fn frame_encoding_round_trips_and_rejects_foreign_frames() {
        let face = SyntheticFace::new(0.12, -0.7);
        assert_eq!(SyntheticFace::decode_frame(&face.encode_frame()), Some(face));
        assert_eq!(SyntheticFace::decode_frame(&Frame::default()), None);
        assert_eq!(
            SyntheticFace::decode_frame(&Frame::new(2, 2, vec![0, 1, 2, 3])),
            None
        );
    }

    #[test]
    fn reproduces_requested_signals() {
        for &(ear, yaw) in &[(0.35, 0.0), (0.1, 0.5), (0.28, -0.45), (0.0, 0.9)] {
            let set = SyntheticFace::new(ear, yaw).landmarks();
            assert!((mean_eye_aspect_ratio(&set) - ear).abs() < 1e-4, "ear {ear}");
            assert!((head_yaw(&set) - yaw).abs() < 1e-4, "yaw {yaw}");
        }
    }
}
