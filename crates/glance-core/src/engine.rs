use std::time::Instant;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::collaborator::{EmbeddingExtractor, LandmarkDetector};
use crate::config::ConfigError;
use crate::error::CollaboratorError;
use crate::types::{Frame, LandmarkSet};

/// Requests buffered between the session and the engine thread.
const QUEUE_DEPTH: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),
    #[error("engine request queue is full")]
    QueueFull,
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("invalid liveness config: {0}")]
    Config(#[from] ConfigError),
}

/// Completed inference, tagged with the session epoch it was dispatched under.
#[derive(Debug)]
pub enum EngineReply {
    Landmarks {
        epoch: u64,
        captured_at: Instant,
        result: Result<Option<LandmarkSet>, CollaboratorError>,
    },
    Embedding {
        epoch: u64,
        result: Result<Vec<f32>, CollaboratorError>,
    },
}

impl EngineReply {
    pub fn epoch(&self) -> u64 {
        match self {
            EngineReply::Landmarks { epoch, .. } | EngineReply::Embedding { epoch, .. } => *epoch,
        }
    }
}

/// Messages sent from the session to the engine thread.
enum EngineRequest {
    Load {
        reply: oneshot::Sender<Result<(), CollaboratorError>>,
    },
    Detect {
        epoch: u64,
        captured_at: Instant,
        frame: Frame,
    },
    Extract {
        epoch: u64,
        frame: Frame,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Initialize both collaborators on the engine thread.
    pub async fn load(&self) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Load { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)??;
        Ok(())
    }

    /// Queue landmark detection without waiting. The result arrives on the
    /// reply channel returned by [`spawn_engine`].
    pub fn dispatch_detect(
        &self,
        epoch: u64,
        captured_at: Instant,
        frame: Frame,
    ) -> Result<(), EngineError> {
        self.try_send(EngineRequest::Detect {
            epoch,
            captured_at,
            frame,
        })
    }

    /// Queue embedding extraction without waiting.
    pub fn dispatch_extract(&self, epoch: u64, frame: Frame) -> Result<(), EngineError> {
        self.try_send(EngineRequest::Extract { epoch, frame })
    }

    fn try_send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.try_send(req).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EngineError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => EngineError::ChannelClosed,
        })
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns both collaborators and serves requests in order until every
/// handle is dropped. Detection and extraction results are delivered on the
/// returned receiver.
pub fn spawn_engine<D, E>(
    mut detector: D,
    mut extractor: E,
) -> Result<(EngineHandle, mpsc::UnboundedReceiver<EngineReply>), EngineError>
where
    D: LandmarkDetector,
    E: EmbeddingExtractor,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(QUEUE_DEPTH);
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<EngineReply>();

    std::thread::Builder::new()
        .name("glance-engine".into())
        .spawn(move || {
            tracing::debug!("engine thread started");
            let mut loaded = false;
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Load { reply } => {
                        let result = detector.load().and_then(|()| extractor.load());
                        loaded = result.is_ok();
                        let _ = reply.send(result);
                    }
                    EngineRequest::Detect {
                        epoch,
                        captured_at,
                        frame,
                    } => {
                        let result = if loaded {
                            detector.detect(&frame)
                        } else {
                            Err(CollaboratorError::NotLoaded)
                        };
                        let _ = reply_tx.send(EngineReply::Landmarks {
                            epoch,
                            captured_at,
                            result,
                        });
                    }
                    EngineRequest::Extract { epoch, frame } => {
                        let result = if loaded {
                            extractor.extract(&frame)
                        } else {
                            Err(CollaboratorError::NotLoaded)
                        };
                        let _ = reply_tx.send(EngineReply::Embedding { epoch, result });
                    }
                }
            }
            tracing::debug!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok((EngineHandle { tx }, reply_rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{SyntheticDetector, SyntheticExtractor, SyntheticFace};

    #[tokio::test]
    async fn load_then_detect_round_trip() {
        let (handle, mut replies) =
            spawn_engine(SyntheticDetector::new(), SyntheticExtractor::fixed()).unwrap();
        handle.load().await.unwrap();

        let now = Instant::now();
        let frame = SyntheticFace::new(0.3, 0.1).encode_frame();
        handle.dispatch_detect(7, now, frame).unwrap();

        match replies.recv().await.unwrap() {
            EngineReply::Landmarks {
                epoch,
                captured_at,
                result,
            } => {
                assert_eq!(epoch, 7);
                assert_eq!(captured_at, now);
                assert!(result.unwrap().is_some());
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn extract_before_load_is_rejected() {
        let (handle, mut replies) =
            spawn_engine(SyntheticDetector::new(), SyntheticExtractor::fixed()).unwrap();
        handle.dispatch_extract(1, Frame::default()).unwrap();
        let reply = replies.recv().await.unwrap();
        assert!(matches!(
            reply,
            EngineReply::Embedding {
                result: Err(CollaboratorError::NotLoaded),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn load_failure_is_reported() {
        let (handle, _replies) = spawn_engine(
            SyntheticDetector::failing_load("weights missing"),
            SyntheticExtractor::fixed(),
        )
        .unwrap();
        let err = handle.load().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Collaborator(CollaboratorError::Init(_))
        ));
    }
}
