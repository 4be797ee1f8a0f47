use rollcall_core::{EmbedOutcome, FaceEmbedder};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine thread exited")]
    ChannelClosed,
}

enum EngineRequest {
    Embed {
        image: Vec<u8>,
        reply: oneshot::Sender<EmbedOutcome>,
    },
}

/// Clone-safe handle to the embedding thread.
///
/// The ONNX session needs `&mut self` and can block for hundreds of
/// milliseconds per frame, so it lives on a dedicated OS thread behind a
/// channel instead of inside shared async state. A dead thread surfaces
/// as [`EngineError::ChannelClosed`] — an infrastructure failure, never
/// folded into a no-face outcome.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Submit one frame for embedding extraction.
    pub async fn embed(&self, image: Vec<u8>) -> Result<EmbedOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the embedding engine on a dedicated OS thread.
///
/// The embedder is constructed by the caller (fail-fast for model-load
/// problems) and moved onto the thread; requests are served one at a
/// time in arrival order.
pub fn spawn_engine<E>(mut embedder: E) -> EngineHandle
where
    E: FaceEmbedder + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Embed { image, reply } => {
                        let outcome = embedder.embed(&image);
                        let _ = reply.send(outcome);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}
