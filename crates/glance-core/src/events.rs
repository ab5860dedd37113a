//! Multi-subscriber event façade over the session controller.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use serde::{Serialize, Serializer};

use crate::challenge::{Challenge, ChallengeKind, ChallengeSequence};
use crate::collaborator::{EmbeddingExtractor, LandmarkDetector, RenderSurface, VideoSource};
use crate::config::LivenessConfig;
use crate::controller::{SessionController, SessionObserver};
use crate::engine::EngineError;
use crate::error::{FailureCode, SessionError};
use crate::liveness::LivenessState;
use crate::types::{Descriptor, Frame, MetricSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Ready,
    Challenge,
    Progress,
    Success,
    Failure,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Ready,
    Challenge {
        #[serde(rename = "type")]
        kind: ChallengeKind,
        instruction: &'static str,
    },
    Progress {
        progress: f32,
        raw_value: f32,
    },
    Success {
        descriptor: Vec<f32>,
        normalized: bool,
    },
    Failure {
        code: FailureCode,
        message: String,
    },
    Error {
        #[serde(serialize_with = "serialize_display")]
        error: SessionError,
    },
}

fn serialize_display<S: Serializer>(error: &SessionError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(error)
}

impl Event {
    pub fn name(&self) -> EventName {
        match self {
            Event::Ready => EventName::Ready,
            Event::Challenge { .. } => EventName::Challenge,
            Event::Progress { .. } => EventName::Progress,
            Event::Success { .. } => EventName::Success,
            Event::Failure { .. } => EventName::Failure,
            Event::Error { .. } => EventName::Error,
        }
    }
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type Handler = Box<dyn FnMut(&Event) -> Result<(), HandlerError>>;

/// Identity of a registered handler, used to unsubscribe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Ordered handlers per event name.
#[derive(Default)]
pub struct EventRegistry {
    next_id: u64,
    handlers: HashMap<EventName, Vec<(HandlerId, Handler)>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&mut self, name: EventName, handler: F) -> HandlerId
    where
        F: FnMut(&Event) -> Result<(), HandlerError> + 'static,
    {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers
            .entry(name)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Remove one handler. Returns false if it was not registered under `name`.
    pub fn off(&mut self, name: EventName, id: HandlerId) -> bool {
        let Some(list) = self.handlers.get_mut(&name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(h, _)| *h != id);
        list.len() != before
    }

    pub fn handler_count(&self, name: EventName) -> usize {
        self.handlers.get(&name).map_or(0, Vec::len)
    }

    /// Deliver `event` to every handler registered for its name, in
    /// registration order. A failing or panicking handler is logged and
    /// skipped; the rest still run.
    pub fn emit(&mut self, event: &Event) {
        let name = event.name();
        let Some(list) = self.handlers.get_mut(&name) else {
            return;
        };
        for (id, handler) in list.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(event = ?name, handler = id.0, error = %e, "event handler failed");
                }
                Err(_) => {
                    tracing::warn!(event = ?name, handler = id.0, "event handler panicked");
                }
            }
        }
    }
}

impl SessionObserver for EventRegistry {
    fn on_ready(&mut self) {
        self.emit(&Event::Ready);
    }

    fn on_challenge(&mut self, challenge: &Challenge) {
        self.emit(&Event::Challenge {
            kind: challenge.kind,
            instruction: challenge.instruction,
        });
    }

    fn on_progress(&mut self, sample: &MetricSample) {
        self.emit(&Event::Progress {
            progress: sample.progress,
            raw_value: sample.raw_value,
        });
    }

    fn on_success(&mut self, descriptor: Descriptor) {
        self.emit(&Event::Success {
            descriptor: descriptor.values,
            normalized: descriptor.normalized,
        });
    }

    fn on_failure(&mut self, code: FailureCode, message: &str) {
        self.emit(&Event::Failure {
            code,
            message: message.to_string(),
        });
    }

    fn on_error(&mut self, error: &SessionError) {
        self.emit(&Event::Error {
            error: error.clone(),
        });
    }
}

/// A liveness session with `on`/`off` subscriptions.
pub struct LivenessSession {
    controller: SessionController,
    events: EventRegistry,
}

impl LivenessSession {
    pub fn new<D, E>(config: LivenessConfig, detector: D, extractor: E) -> Result<Self, EngineError>
    where
        D: LandmarkDetector,
        E: EmbeddingExtractor,
    {
        Ok(Self::from_controller(SessionController::new(
            config, detector, extractor,
        )?))
    }

    pub fn from_controller(controller: SessionController) -> Self {
        Self {
            controller,
            events: EventRegistry::new(),
        }
    }

    pub fn on<F>(&mut self, name: EventName, handler: F) -> HandlerId
    where
        F: FnMut(&Event) -> Result<(), HandlerError> + 'static,
    {
        self.events.on(name, handler)
    }

    pub fn off(&mut self, name: EventName, id: HandlerId) -> bool {
        self.events.off(name, id)
    }

    pub async fn load(&mut self) -> Result<(), EngineError> {
        self.controller.load(&mut self.events).await
    }

    pub fn start(
        &mut self,
        now: Instant,
        video: &mut dyn VideoSource,
        surface: &mut dyn RenderSurface,
    ) -> Result<(), SessionError> {
        self.controller.start(now, video, surface, &mut self.events)
    }

    pub fn start_with_sequence(
        &mut self,
        now: Instant,
        sequence: ChallengeSequence,
        video: &mut dyn VideoSource,
        surface: &mut dyn RenderSurface,
    ) -> Result<(), SessionError> {
        self.controller
            .start_with_sequence(now, sequence, video, surface, &mut self.events)
    }

    pub fn tick(&mut self, now: Instant, frame: &Frame) {
        self.controller.tick(now, frame, &mut self.events);
    }

    pub async fn wait_reply(&mut self) -> bool {
        self.controller.wait_reply(&mut self.events).await
    }

    pub fn stop(
        &mut self,
        video: Option<&mut dyn VideoSource>,
        surface: Option<&mut dyn RenderSurface>,
    ) {
        self.controller.stop(video, surface);
    }

    pub fn in_flight(&self) -> usize {
        self.controller.in_flight()
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    pub fn state(&self) -> LivenessState {
        self.controller.state()
    }
}
