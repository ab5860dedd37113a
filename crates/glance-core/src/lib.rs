//! glance-core — Active liveness challenge engine.
//!
//! Drives a subject through a randomized sequence of physical challenges
//! (blink, turn left, turn right) verified from face-mesh landmarks, then
//! extracts an identity descriptor. Landmark detection and embedding are
//! consumed through the [`LandmarkDetector`] and [`EmbeddingExtractor`]
//! capabilities and run on a dedicated engine thread.

pub mod challenge;
pub mod collaborator;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod liveness;
pub mod matcher;
pub mod metrics;
pub mod scheduler;
pub mod synthetic;
pub mod types;

pub use challenge::{Challenge, ChallengeKind, ChallengeSequence};
pub use collaborator::{EmbeddingExtractor, LandmarkDetector, RenderSurface, VideoSource};
pub use config::{ConfigError, LivenessConfig};
pub use controller::{SessionController, SessionObserver};
pub use engine::EngineError;
pub use error::{CameraError, CollaboratorError, FailureCode, SessionError};
pub use events::{Event, EventName, EventRegistry, HandlerId, LivenessSession};
pub use liveness::{LivenessMachine, LivenessState};
pub use matcher::{CosineMatcher, EnrolledDescriptor, MatchResult, Matcher};
pub use metrics::cosine_similarity;
pub use types::{Descriptor, Frame, LandmarkSet, MetricSample, Point3, DESCRIPTOR_LEN};
