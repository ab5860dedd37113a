use serde::{Deserialize, Serialize};

use crate::metrics::cosine_similarity;
use crate::types::Descriptor;

/// A previously captured descriptor the live one is compared against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledDescriptor {
    pub id: String,
    pub label: String,
    pub descriptor: Descriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    pub similarity: f32,
    pub model_id: Option<String>,
    pub model_label: Option<String>,
}

pub trait Matcher {
    /// Compare `query` against every gallery entry and report the best one.
    fn compare(
        &self,
        query: &Descriptor,
        gallery: &[EnrolledDescriptor],
        threshold: f32,
    ) -> MatchResult;
}

/// Best-of-gallery cosine similarity.
///
/// Descriptors that were emitted un-normalized make the score unbounded;
/// they are compared as-is.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        query: &Descriptor,
        gallery: &[EnrolledDescriptor],
        threshold: f32,
    ) -> MatchResult {
        let best = gallery
            .iter()
            .map(|entry| {
                let sim = cosine_similarity(
                    Some(query.as_slice()),
                    Some(entry.descriptor.as_slice()),
                );
                (entry, sim)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((entry, similarity)) => MatchResult {
                matched: similarity >= threshold,
                similarity,
                model_id: Some(entry.id.clone()),
                model_label: Some(entry.label.clone()),
            },
            None => MatchResult {
                matched: false,
                similarity: 0.0,
                model_id: None,
                model_label: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(values: &[f32]) -> Descriptor {
        let (values, normalized) = crate::metrics::l2_normalize(values.to_vec());
        Descriptor { values, normalized }
    }

    fn enrolled(id: &str, values: &[f32]) -> EnrolledDescriptor {
        EnrolledDescriptor {
            id: id.to_string(),
            label: format!("{id}-label"),
            descriptor: unit(values),
        }
    }

    #[test]
    fn picks_best_entry() {
        let gallery = vec![
            enrolled("far", &[0.0, 1.0, 0.0]),
            enrolled("near", &[1.0, 0.1, 0.0]),
        ];
        let r = CosineMatcher.compare(&unit(&[1.0, 0.0, 0.0]), &gallery, 0.9);
        assert!(r.matched);
        assert_eq!(r.model_id.as_deref(), Some("near"));
        assert_eq!(r.model_label.as_deref(), Some("near-label"));
    }

    #[test]
    fn below_threshold_is_not_a_match() {
        let gallery = vec![enrolled("a", &[1.0, 1.0, 0.0])];
        let r = CosineMatcher.compare(&unit(&[1.0, 0.0, 0.0]), &gallery, 0.9);
        assert!(!r.matched);
        assert!((r.similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
    }

    #[test]
    fn empty_gallery() {
        let r = CosineMatcher.compare(&unit(&[1.0, 0.0]), &[], 0.5);
        assert!(!r.matched);
        assert_eq!(r.model_id, None);
    }

    #[test]
    fn dimension_mismatch_scores_zero() {
        let gallery = vec![enrolled("short", &[1.0, 0.0])];
        let r = CosineMatcher.compare(&unit(&[1.0, 0.0, 0.0]), &gallery, 0.5);
        assert_eq!(r.similarity, 0.0);
        assert!(!r.matched);
    }
}
