//! Session controller: composes the frame scheduler, the liveness state
//! machine and the inference engine behind a callback contract.
//!
//! Everything here runs in the host's refresh-callback context. Inference is
//! dispatched to the engine thread without waiting; results re-enter on the
//! next `tick` (or through `wait_reply`) and are matched against the current
//! session epoch so that replies from a stopped session are dropped.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::challenge::{Challenge, ChallengeSequence};
use crate::collaborator::{EmbeddingExtractor, LandmarkDetector, RenderSurface, VideoSource};
use crate::config::LivenessConfig;
use crate::engine::{spawn_engine, EngineError, EngineHandle, EngineReply};
use crate::error::{CameraError, FailureCode, SessionError};
use crate::liveness::{LivenessMachine, LivenessState, Thresholds, Transition};
use crate::scheduler::FrameScheduler;
use crate::types::{Descriptor, Frame, MetricSample};

/// Callback contract of the session controller. All methods default to no-ops.
pub trait SessionObserver {
    fn on_ready(&mut self) {}
    fn on_challenge(&mut self, _challenge: &Challenge) {}
    fn on_progress(&mut self, _sample: &MetricSample) {}
    /// Terminal. The descriptor is handed over and not retained.
    fn on_success(&mut self, _descriptor: Descriptor) {}
    /// Terminal.
    fn on_failure(&mut self, _code: FailureCode, _message: &str) {}
    fn on_error(&mut self, _error: &SessionError) {}
}

pub struct SessionController {
    config: LivenessConfig,
    engine: EngineHandle,
    replies: mpsc::UnboundedReceiver<EngineReply>,
    machine: LivenessMachine,
    scheduler: FrameScheduler,
    rng: StdRng,
    loaded: bool,
    /// Tick registration; cleared by `stop` and by terminal transitions.
    running: bool,
    epoch: u64,
    session_id: Option<Uuid>,
    in_flight: usize,
    pending_extraction: bool,
}

impl SessionController {
    pub fn new<D, E>(config: LivenessConfig, detector: D, extractor: E) -> Result<Self, EngineError>
    where
        D: LandmarkDetector,
        E: EmbeddingExtractor,
    {
        Self::with_rng(config, detector, extractor, StdRng::from_entropy())
    }

    /// Like [`new`](Self::new) with a caller-supplied RNG for challenge ordering.
    ///
    /// The config is validated before the engine thread is spawned.
    pub fn with_rng<D, E>(
        config: LivenessConfig,
        detector: D,
        extractor: E,
        rng: StdRng,
    ) -> Result<Self, EngineError>
    where
        D: LandmarkDetector,
        E: EmbeddingExtractor,
    {
        config.validate()?;
        let (engine, replies) = spawn_engine(detector, extractor)?;
        Ok(Self {
            machine: LivenessMachine::new(Thresholds::from(&config)),
            scheduler: FrameScheduler::new(config.frame_interval()),
            config,
            engine,
            replies,
            rng,
            loaded: false,
            running: false,
            epoch: 0,
            session_id: None,
            in_flight: 0,
            pending_extraction: false,
        })
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    pub fn state(&self) -> LivenessState {
        self.machine.state()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Inference requests dispatched whose replies have not been received yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Initialize the landmark and embedding collaborators.
    pub async fn load(&mut self, observer: &mut dyn SessionObserver) -> Result<(), EngineError> {
        tracing::info!("loading face models");
        match self.engine.load().await {
            Ok(()) => {
                self.loaded = true;
                tracing::info!("face models loaded");
                observer.on_ready();
                Ok(())
            }
            Err(e) => {
                self.loaded = false;
                tracing::error!(error = %e, "face model load failed");
                let code = FailureCode::ModelLoadFailed;
                observer.on_failure(code, code.message());
                Err(e)
            }
        }
    }

    /// Begin a session with a freshly randomized challenge sequence.
    pub fn start(
        &mut self,
        now: Instant,
        video: &mut dyn VideoSource,
        surface: &mut dyn RenderSurface,
        observer: &mut dyn SessionObserver,
    ) -> Result<(), SessionError> {
        let sequence = ChallengeSequence::generate(&mut self.rng);
        self.start_with_sequence(now, sequence, video, surface, observer)
    }

    /// Begin a session with a caller-chosen challenge sequence.
    pub fn start_with_sequence(
        &mut self,
        now: Instant,
        sequence: ChallengeSequence,
        video: &mut dyn VideoSource,
        surface: &mut dyn RenderSurface,
        observer: &mut dyn SessionObserver,
    ) -> Result<(), SessionError> {
        if !self.loaded {
            let err = SessionError::NotLoaded;
            tracing::error!(error = %err, "start rejected");
            observer.on_error(&err);
            return Err(err);
        }

        if !video.is_attached() {
            if let Err(e) = video.attach() {
                tracing::error!(error = %e, "camera acquisition failed");
                if e == CameraError::PermissionDenied {
                    let code = FailureCode::CameraAccessDenied;
                    observer.on_failure(code, code.message());
                } else {
                    observer.on_error(&SessionError::Camera(e.clone()));
                }
                return Err(SessionError::Camera(e));
            }
        }

        surface.clear();
        self.epoch += 1;
        let session_id = Uuid::new_v4();
        self.session_id = Some(session_id);
        self.scheduler.reset();
        self.pending_extraction = false;
        self.running = true;

        tracing::info!(
            %session_id,
            challenges = ?sequence.iter().map(|c| c.kind.as_str()).collect::<Vec<_>>(),
            "liveness session started"
        );

        let transitions = self.machine.start(sequence, now);
        self.apply(transitions, observer);
        Ok(())
    }

    /// Host display-refresh callback.
    ///
    /// Processes completed inference, advances the settling window, and
    /// forwards `frame` for detection when the scheduler allows it.
    pub fn tick(&mut self, now: Instant, frame: &Frame, observer: &mut dyn SessionObserver) {
        if !self.running {
            return;
        }

        while let Ok(reply) = self.replies.try_recv() {
            self.handle_reply(reply, observer);
        }
        if !self.running {
            return;
        }

        let transitions = self.machine.poll(now);
        self.apply(transitions, observer);

        if self.pending_extraction {
            self.dispatch_extraction(frame, observer);
            return;
        }

        let detecting = matches!(
            self.machine.state(),
            LivenessState::AwaitingChallenge(_) | LivenessState::ChallengeSettling
        );
        if detecting && self.scheduler.tick(now) {
            match self.engine.dispatch_detect(self.epoch, now, frame.clone()) {
                Ok(()) => self.in_flight += 1,
                Err(EngineError::QueueFull) => {
                    tracing::trace!("engine busy; frame dropped");
                }
                Err(e) => self.engine_lost(e, observer),
            }
        }
    }

    /// Wait for one inference reply and process it.
    ///
    /// Returns false if the engine thread is gone.
    pub async fn wait_reply(&mut self, observer: &mut dyn SessionObserver) -> bool {
        match self.replies.recv().await {
            Some(reply) => {
                self.handle_reply(reply, observer);
                true
            }
            None => false,
        }
    }

    /// Halt the session. Safe to call repeatedly; never emits a terminal event.
    pub fn stop(
        &mut self,
        video: Option<&mut dyn VideoSource>,
        surface: Option<&mut dyn RenderSurface>,
    ) {
        if self.running {
            tracing::info!(session_id = ?self.session_id, "liveness session stopped");
        }
        self.running = false;
        self.pending_extraction = false;
        // Invalidate anything still in flight.
        self.epoch += 1;
        if self.machine.is_active() {
            self.machine.stop();
        }
        if let Some(surface) = surface {
            surface.clear();
        }
        if let Some(video) = video {
            video.release();
        }
    }

    fn handle_reply(&mut self, reply: EngineReply, observer: &mut dyn SessionObserver) {
        self.in_flight = self.in_flight.saturating_sub(1);

        if reply.epoch() != self.epoch || !self.running || !self.machine.is_active() {
            tracing::debug!(
                reply_epoch = reply.epoch(),
                epoch = self.epoch,
                "dropping inference reply from inactive session"
            );
            return;
        }

        let transitions = match reply {
            EngineReply::Landmarks {
                captured_at,
                result,
                ..
            } => match result {
                Ok(landmarks) => self.machine.evaluate(captured_at, landmarks.as_ref()),
                Err(e) => {
                    tracing::warn!(error = %e, "landmark detection failed");
                    observer.on_error(&SessionError::Detection(e));
                    self.machine.evaluate(captured_at, None)
                }
            },
            EngineReply::Embedding { result, .. } => self.machine.finish_extraction(result),
        };
        self.apply(transitions, observer);
    }

    fn dispatch_extraction(&mut self, frame: &Frame, observer: &mut dyn SessionObserver) {
        match self.engine.dispatch_extract(self.epoch, frame.clone()) {
            Ok(()) => {
                self.in_flight += 1;
                self.pending_extraction = false;
                tracing::debug!(session_id = ?self.session_id, "descriptor extraction dispatched");
            }
            // Retried on the next tick.
            Err(EngineError::QueueFull) => {}
            Err(e) => self.engine_lost(e, observer),
        }
    }

    fn engine_lost(&mut self, e: EngineError, observer: &mut dyn SessionObserver) {
        tracing::error!(error = %e, "inference engine unavailable");
        observer.on_error(&SessionError::EngineClosed);
    }

    fn apply(&mut self, transitions: Vec<Transition>, observer: &mut dyn SessionObserver) {
        for t in transitions {
            match t {
                Transition::ChallengeChanged(challenge) => {
                    tracing::info!(
                        session_id = ?self.session_id,
                        challenge = challenge.kind.as_str(),
                        "challenge active"
                    );
                    observer.on_challenge(&challenge);
                }
                Transition::Progress(sample) => observer.on_progress(&sample),
                Transition::Passed(_) => {}
                Transition::Completing => self.pending_extraction = true,
                Transition::Succeeded(descriptor) => {
                    self.running = false;
                    tracing::info!(
                        session_id = ?self.session_id,
                        normalized = descriptor.normalized,
                        "liveness verified"
                    );
                    observer.on_success(descriptor);
                }
                Transition::Failed(code) => {
                    self.running = false;
                    tracing::info!(session_id = ?self.session_id, %code, "liveness failed");
                    observer.on_failure(code, code.message());
                }
            }
        }
    }
}
