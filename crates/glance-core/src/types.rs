use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum number of points in a face-mesh landmark set.
pub const FACE_MESH_POINTS: usize = 468;

/// Length of the identity descriptor produced by the embedding model.
pub const DESCRIPTOR_LEN: usize = 128;

/// A normalized face landmark: x/y in image space (0..1), z relative depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance in the image plane, ignoring depth.
    pub fn distance_2d(&self, other: &Point3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn distance_3d(&self, other: &Point3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("landmark set has {0} points (expected at least {FACE_MESH_POINTS})")]
pub struct LandmarkCountError(pub usize);

/// Face-mesh landmarks for a single frame.
///
/// Produced fresh by the landmark detector on every frame and only borrowed
/// for the duration of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Point3>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Point3>) -> Result<Self, LandmarkCountError> {
        if points.len() < FACE_MESH_POINTS {
            return Err(LandmarkCountError(points.len()));
        }
        Ok(Self { points })
    }

    /// A full face-mesh set with every point at `point`.
    pub fn uniform(point: Point3) -> Self {
        Self {
            points: vec![point; FACE_MESH_POINTS],
        }
    }

    pub fn get(&self, index: usize) -> Option<&Point3> {
        self.points.get(index)
    }

    pub fn set(&mut self, index: usize, point: Point3) {
        if let Some(slot) = self.points.get_mut(index) {
            *slot = point;
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }
}

/// An opaque video frame. Only the collaborators interpret the pixel data.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }
}

/// Which eye an EAR measurement refers to (subject's perspective).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeSide {
    Left,
    Right,
}

/// Per-frame output of a challenge metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSample {
    pub raw_value: f32,
    /// Completion estimate in [0, 1].
    pub progress: f32,
}

impl MetricSample {
    /// Non-finite progress is reported as 0.
    pub fn new(raw_value: f32, progress: f32) -> Self {
        let progress = if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            raw_value,
            progress,
        }
    }
}

/// Identity descriptor extracted at the end of a successful session.
///
/// `normalized` is false when the raw embedding had a near-zero norm and was
/// passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    #[serde(default = "default_normalized")]
    pub normalized: bool,
}

fn default_normalized() -> bool {
    true
}

impl Descriptor {
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landmark_set_rejects_short_input() {
        let err = LandmarkSet::new(vec![Point3::default(); 10]).unwrap_err();
        assert_eq!(err, LandmarkCountError(10));
    }

    #[test]
    fn landmark_set_accepts_full_mesh() {
        let set = LandmarkSet::new(vec![Point3::default(); FACE_MESH_POINTS]).unwrap();
        assert_eq!(set.len(), FACE_MESH_POINTS);
        assert!(set.get(FACE_MESH_POINTS).is_none());
    }

    #[test]
    fn metric_sample_clamps_progress() {
        assert_eq!(MetricSample::new(0.9, 2.5).progress, 1.0);
        assert_eq!(MetricSample::new(-0.1, -0.25).progress, 0.0);
    }

    #[test]
    fn metric_sample_zeroes_non_finite_progress() {
        assert_eq!(MetricSample::new(0.3, f32::NAN).progress, 0.0);
        assert_eq!(MetricSample::new(0.3, f32::INFINITY).progress, 0.0);
        assert_eq!(MetricSample::new(0.3, f32::NEG_INFINITY).progress, 0.0);
    }

    #[test]
    fn distances() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(3.0, 4.0, 12.0);
        assert!((a.distance_2d(&b) - 5.0).abs() < 1e-6);
        assert!((a.distance_3d(&b) - 13.0).abs() < 1e-6);
    }
}
