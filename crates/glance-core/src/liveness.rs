//! Active liveness via randomized challenges.
//!
//! The subject is asked to perform a short, randomly ordered sequence of
//! actions (blink, turn left, turn right). Each frame's landmarks are reduced
//! to one metric for the active challenge; a pass starts a short settling
//! window, after which the next challenge becomes active. When the sequence
//! is exhausted the machine enters `Completing` and waits for the caller to
//! deliver the embedding extracted from the final frame.
//!
//! The machine never reads the clock and never calls inference itself. Every
//! time-dependent operation takes an explicit `Instant`, so timeouts are only
//! observed when the caller evaluates or polls.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Replayed recordings of a fixed action order, static photos
//!   (a photo cannot produce the open-then-closed EAR edge).
//! - **Does not block:** Live puppeteering, 3D masks with articulated eyes.

use std::time::{Duration, Instant};

use crate::challenge::{Challenge, ChallengeKind, ChallengeSequence};
use crate::error::{CollaboratorError, FailureCode};
use crate::metrics::{head_yaw, l2_normalize, mean_eye_aspect_ratio};
use crate::types::{Descriptor, LandmarkSet, MetricSample, DESCRIPTOR_LEN};

/// EAR above which the eyes are latched as open. Independent of the
/// configurable closed threshold.
pub const EYES_OPEN_EAR: f32 = 0.3;

/// Debounce between a challenge passing and the next one becoming active.
pub const SETTLE_WINDOW: Duration = Duration::from_millis(300);

/// Thresholds the machine evaluates against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub blink_ear: f32,
    pub head_turn: f32,
    pub challenge_timeout: Duration,
}

impl From<&crate::config::LivenessConfig> for Thresholds {
    fn from(c: &crate::config::LivenessConfig) -> Self {
        Self {
            blink_ear: c.blink_ear_threshold,
            head_turn: c.head_turn_threshold,
            challenge_timeout: c.challenge_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Idle,
    AwaitingChallenge(usize),
    ChallengeSettling,
    Completing,
    Succeeded,
    Failed(FailureCode),
}

/// Observable consequence of driving the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    ChallengeChanged(Challenge),
    Progress(MetricSample),
    Passed(Challenge),
    Completing,
    Succeeded(Descriptor),
    Failed(FailureCode),
}

/// Everything that lives for exactly one start-to-terminal cycle.
#[derive(Debug, Clone)]
pub struct SessionState {
    sequence: ChallengeSequence,
    index: usize,
    /// Blink hysteresis: set once EAR rose above [`EYES_OPEN_EAR`].
    eyes_open_seen: bool,
    challenge_started_at: Instant,
    /// Re-entrancy guard: set while settling or completing, suppresses evaluation.
    processing: bool,
    settle_deadline: Option<Instant>,
}

impl SessionState {
    fn new(sequence: ChallengeSequence, now: Instant) -> Self {
        Self {
            sequence,
            index: 0,
            eyes_open_seen: false,
            challenge_started_at: now,
            processing: false,
            settle_deadline: None,
        }
    }

    pub fn sequence(&self) -> &ChallengeSequence {
        &self.sequence
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn current(&self) -> Option<&Challenge> {
        self.sequence.get(self.index)
    }
}

pub struct LivenessMachine {
    thresholds: Thresholds,
    state: LivenessState,
    session: Option<SessionState>,
}

impl LivenessMachine {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: LivenessState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    pub fn current_challenge(&self) -> Option<&Challenge> {
        self.session.as_ref().and_then(SessionState::current)
    }

    /// True between `start` and a terminal state or `stop`.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            LivenessState::AwaitingChallenge(_)
                | LivenessState::ChallengeSettling
                | LivenessState::Completing
        )
    }

    /// Begin a fresh session with `sequence`, discarding any previous state.
    pub fn start(&mut self, sequence: ChallengeSequence, now: Instant) -> Vec<Transition> {
        let mut session = SessionState::new(sequence, now);
        match session.current().copied() {
            Some(first) => {
                self.session = Some(session);
                self.state = LivenessState::AwaitingChallenge(0);
                vec![Transition::ChallengeChanged(first)]
            }
            None => {
                // An empty sequence has nothing left to prove.
                session.processing = true;
                self.session = Some(session);
                self.state = LivenessState::Completing;
                vec![Transition::Completing]
            }
        }
    }

    /// Abandon the session without a terminal transition.
    pub fn stop(&mut self) {
        self.session = None;
        self.state = LivenessState::Idle;
    }

    /// Evaluate one frame's landmarks against the active challenge.
    ///
    /// `None` means the detector found no face. Frames are ignored outside
    /// `AwaitingChallenge` and while the re-entrancy guard is held.
    pub fn evaluate(&mut self, now: Instant, landmarks: Option<&LandmarkSet>) -> Vec<Transition> {
        let LivenessState::AwaitingChallenge(_) = self.state else {
            return Vec::new();
        };
        let thresholds = self.thresholds;
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if session.processing {
            return Vec::new();
        }
        let Some(challenge) = session.current().copied() else {
            return Vec::new();
        };

        // Captured before this challenge became active: the subject was still
        // answering the previous one.
        if now < session.challenge_started_at {
            tracing::debug!(
                challenge = challenge.kind.as_str(),
                "dropping frame captured before challenge start"
            );
            return Vec::new();
        }
        let elapsed = now.duration_since(session.challenge_started_at);

        let Some(landmarks) = landmarks else {
            if elapsed > thresholds.challenge_timeout {
                return self.fail(FailureCode::FaceNotFound);
            }
            return Vec::new();
        };

        let (sample, passed) = measure(&thresholds, session, challenge.kind, landmarks);
        tracing::trace!(
            challenge = challenge.kind.as_str(),
            raw = sample.raw_value,
            progress = sample.progress,
            "challenge metric"
        );
        let mut out = vec![Transition::Progress(sample)];

        if passed {
            session.processing = true;
            session.settle_deadline = Some(now + SETTLE_WINDOW);
            self.state = LivenessState::ChallengeSettling;
            tracing::debug!(
                challenge = challenge.kind.as_str(),
                index = session.index,
                elapsed_ms = elapsed.as_millis() as u64,
                "challenge passed"
            );
            out.push(Transition::Passed(challenge));
        } else if elapsed > thresholds.challenge_timeout {
            out.extend(self.fail(FailureCode::ChallengeTimeout));
        }
        out
    }

    /// Advance out of `ChallengeSettling` once the debounce window elapsed.
    pub fn poll(&mut self, now: Instant) -> Vec<Transition> {
        if self.state != LivenessState::ChallengeSettling {
            return Vec::new();
        }
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        match session.settle_deadline {
            Some(deadline) if now >= deadline => {}
            _ => return Vec::new(),
        }

        session.settle_deadline = None;
        session.index += 1;

        match session.current().copied() {
            Some(next) => {
                session.eyes_open_seen = false;
                session.challenge_started_at = now;
                session.processing = false;
                self.state = LivenessState::AwaitingChallenge(session.index);
                vec![Transition::ChallengeChanged(next)]
            }
            None => {
                self.state = LivenessState::Completing;
                vec![Transition::Completing]
            }
        }
    }

    /// Deliver the embedding collaborator's result while `Completing`.
    pub fn finish_extraction(&mut self, raw: Result<Vec<f32>, CollaboratorError>) -> Vec<Transition> {
        if self.state != LivenessState::Completing {
            return Vec::new();
        }
        match raw.map_err(|e| e.to_string()).and_then(validate_embedding) {
            Ok(values) => {
                let (values, normalized) = l2_normalize(values);
                if !normalized {
                    tracing::warn!("embedding norm near zero; emitting un-normalized descriptor");
                }
                self.session = None;
                self.state = LivenessState::Succeeded;
                vec![Transition::Succeeded(Descriptor { values, normalized })]
            }
            Err(reason) => {
                tracing::warn!(reason = %reason, "descriptor extraction failed");
                self.fail(FailureCode::RecognitionFailed)
            }
        }
    }

    fn fail(&mut self, code: FailureCode) -> Vec<Transition> {
        self.session = None;
        self.state = LivenessState::Failed(code);
        vec![Transition::Failed(code)]
    }
}

fn measure(
    thresholds: &Thresholds,
    session: &mut SessionState,
    kind: ChallengeKind,
    landmarks: &LandmarkSet,
) -> (MetricSample, bool) {
    match kind {
        ChallengeKind::Blink => {
            let ear = mean_eye_aspect_ratio(landmarks);
            if ear > EYES_OPEN_EAR {
                session.eyes_open_seen = true;
            }
            let passed = session.eyes_open_seen && ear < thresholds.blink_ear;
            let span = EYES_OPEN_EAR - thresholds.blink_ear;
            let progress = if passed {
                1.0
            } else if session.eyes_open_seen && span > 0.0 {
                (EYES_OPEN_EAR - ear) / span
            } else {
                0.0
            };
            (MetricSample::new(ear, progress), passed)
        }
        ChallengeKind::TurnLeft => {
            let yaw = head_yaw(landmarks);
            let t = thresholds.head_turn;
            (MetricSample::new(yaw, yaw / t), yaw > t)
        }
        ChallengeKind::TurnRight => {
            let yaw = head_yaw(landmarks);
            let t = thresholds.head_turn;
            (MetricSample::new(yaw, yaw / -t), yaw < -t)
        }
    }
}

fn validate_embedding(values: Vec<f32>) -> Result<Vec<f32>, String> {
    if values.len() != DESCRIPTOR_LEN {
        return Err(format!(
            "embedding has {} values (expected {DESCRIPTOR_LEN})",
            values.len()
        ));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err("embedding contains NaN/Inf".to_string());
    }
    Ok(values)
}
