use emote_core::{DetectOptions, Detection, EngineError as InferenceError, ExpressionEngine};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the controller to the engine thread.
enum EngineRequest {
    Load {
        model_dir: PathBuf,
        reply: oneshot::Sender<Result<(), InferenceError>>,
    },
    Detect {
        image: Arc<RgbImage>,
        options: DetectOptions,
        reply: oneshot::Sender<Result<Vec<Detection>, InferenceError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Load model weights. Idempotent on the engine side.
    pub async fn load(&self, model_dir: PathBuf) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Load {
                model_dir,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Run detection + expression scoring on one frame.
    pub async fn detect(
        &self,
        image: Arc<RgbImage>,
        options: DetectOptions,
    ) -> Result<Vec<Detection>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect {
                image,
                options,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn `engine` on a dedicated OS thread and return a handle to it.
///
/// The thread exits when every handle has been dropped.
pub fn spawn_engine<E>(mut engine: E) -> Result<EngineHandle, EngineError>
where
    E: ExpressionEngine + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("emote-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Load { model_dir, reply } => {
                        let result = engine.load(&model_dir);
                        if let Err(e) = &result {
                            tracing::error!(dir = %model_dir.display(), error = %e, "model load failed");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Detect {
                        image,
                        options,
                        reply,
                    } => {
                        let started = std::time::Instant::now();
                        let result = engine.detect(&image, &options);
                        tracing::trace!(elapsed = ?started.elapsed(), "inference finished");
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
