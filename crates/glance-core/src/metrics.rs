//! Landmark-derived liveness metrics and descriptor similarity.
//!
//! All functions here are pure and tolerate degenerate input: a missing
//! landmark or a collapsed geometry yields 0 rather than a panic or NaN.

use crate::types::{EyeSide, LandmarkSet, Point3};

/// Face-mesh indices for one eye, in EAR order:
/// outer corner, upper lid 1, upper lid 2, inner corner, lower lid 1, lower lid 2.
#[derive(Debug, Clone, Copy)]
pub struct EyeIndices {
    pub outer: usize,
    pub upper1: usize,
    pub upper2: usize,
    pub inner: usize,
    pub lower1: usize,
    pub lower2: usize,
}

pub const LEFT_EYE: EyeIndices = EyeIndices {
    outer: 33,
    upper1: 160,
    upper2: 158,
    inner: 133,
    lower1: 153,
    lower2: 144,
};

pub const RIGHT_EYE: EyeIndices = EyeIndices {
    outer: 362,
    upper1: 385,
    upper2: 387,
    inner: 263,
    lower1: 373,
    lower2: 380,
};

pub const CHIN: usize = 152;
pub const LEFT_CHEEK: usize = 234;
pub const RIGHT_CHEEK: usize = 454;

/// Cheek-to-cheek distance below which the yaw estimate is meaningless.
pub const MIN_FACE_WIDTH: f32 = 0.1;

/// Norm below which an embedding is emitted without normalization.
pub const MIN_DESCRIPTOR_NORM: f32 = 1e-6;

impl EyeSide {
    pub fn indices(self) -> EyeIndices {
        match self {
            EyeSide::Left => LEFT_EYE,
            EyeSide::Right => RIGHT_EYE,
        }
    }
}

/// Eye aspect ratio for one eye.
///
/// `(|upper1 - lower2| + |upper2 - lower1|) / (2 * |outer - inner|)`, measured
/// in the image plane. Returns 0 when the horizontal distance is exactly 0 or
/// any of the six points is missing.
pub fn eye_aspect_ratio(landmarks: &LandmarkSet, side: EyeSide) -> f32 {
    let idx = side.indices();
    let points = [
        idx.outer, idx.upper1, idx.upper2, idx.inner, idx.lower1, idx.lower2,
    ]
    .map(|i| landmarks.get(i).copied());

    let [Some(outer), Some(upper1), Some(upper2), Some(inner), Some(lower1), Some(lower2)] =
        points
    else {
        return 0.0;
    };

    ear_from_points(&outer, &upper1, &upper2, &inner, &lower1, &lower2)
}

fn ear_from_points(
    outer: &Point3,
    upper1: &Point3,
    upper2: &Point3,
    inner: &Point3,
    lower1: &Point3,
    lower2: &Point3,
) -> f32 {
    let horizontal = outer.distance_2d(inner);
    if horizontal == 0.0 {
        return 0.0;
    }
    let vertical = upper1.distance_2d(lower2) + upper2.distance_2d(lower1);
    vertical / (2.0 * horizontal)
}

/// Mean EAR of both eyes.
pub fn mean_eye_aspect_ratio(landmarks: &LandmarkSet) -> f32 {
    (eye_aspect_ratio(landmarks, EyeSide::Left) + eye_aspect_ratio(landmarks, EyeSide::Right))
        / 2.0
}

/// Head yaw estimate from cheek depth asymmetry relative to the chin.
///
/// Positive values mean the right cheek sits deeper than the left (a turn to
/// the subject's left); negative values the opposite. Returns 0 when the
/// cheeks are closer than [`MIN_FACE_WIDTH`] or a point is missing.
pub fn head_yaw(landmarks: &LandmarkSet) -> f32 {
    let (Some(chin), Some(left), Some(right)) = (
        landmarks.get(CHIN),
        landmarks.get(LEFT_CHEEK),
        landmarks.get(RIGHT_CHEEK),
    ) else {
        return 0.0;
    };

    let face_width = left.distance_3d(right);
    if face_width < MIN_FACE_WIDTH {
        return 0.0;
    }

    let left_depth = left.z - chin.z;
    let right_depth = right.z - chin.z;
    (right_depth - left_depth) / face_width
}

/// Dot product of two descriptors.
///
/// Callers must pass unit vectors; no magnitude division is performed.
/// Absent input or mismatched lengths yield 0.
pub fn cosine_similarity(a: Option<&[f32]>, b: Option<&[f32]>) -> f32 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// L2-normalize `values`.
///
/// Returns the input untouched together with `false` when its norm is below
/// [`MIN_DESCRIPTOR_NORM`].
pub fn l2_normalize(values: Vec<f32>) -> (Vec<f32>, bool) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < MIN_DESCRIPTOR_NORM {
        return (values, false);
    }
    (values.into_iter().map(|v| v / norm).collect(), true)
}
