//! Challenge kinds and per-session randomized ordering.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Blink,
    TurnLeft,
    TurnRight,
}

impl ChallengeKind {
    pub fn instruction(self) -> &'static str {
        match self {
            ChallengeKind::Blink => "Blink your eyes",
            ChallengeKind::TurnLeft => "Turn your head to the left",
            ChallengeKind::TurnRight => "Turn your head to the right",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::Blink => "blink",
            ChallengeKind::TurnLeft => "turn_left",
            ChallengeKind::TurnRight => "turn_right",
        }
    }
}

/// One liveness action paired with its instruction text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: ChallengeKind,
    pub instruction: &'static str,
}

impl From<ChallengeKind> for Challenge {
    fn from(kind: ChallengeKind) -> Self {
        Self {
            kind,
            instruction: kind.instruction(),
        }
    }
}

/// Ordered challenges for one session. Immutable once generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSequence(Vec<Challenge>);

impl ChallengeSequence {
    /// Randomized sequence containing one blink and one turn in each direction.
    ///
    /// The turn pairing is picked by coin flip, then the whole list goes
    /// through a Fisher-Yates shuffle, so all six orders are equally likely.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let turns = if rng.gen_bool(0.5) {
            [ChallengeKind::TurnLeft, ChallengeKind::TurnRight]
        } else {
            [ChallengeKind::TurnRight, ChallengeKind::TurnLeft]
        };
        let mut kinds = vec![ChallengeKind::Blink, turns[0], turns[1]];

        for i in (1..kinds.len()).rev() {
            let j = rng.gen_range(0..=i);
            kinds.swap(i, j);
        }

        Self(kinds.into_iter().map(Challenge::from).collect())
    }

    /// Fixed order, for callers that need a deterministic session.
    pub fn from_kinds(kinds: &[ChallengeKind]) -> Self {
        Self(kinds.iter().copied().map(Challenge::from).collect())
    }

    pub fn get(&self, index: usize) -> Option<&Challenge> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Challenge> {
        self.0.iter()
    }
}
