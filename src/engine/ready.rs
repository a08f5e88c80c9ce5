use std::sync::Arc;

use tokio::sync::watch;

use super::DocumentEngine;
use crate::error::Error;

#[derive(Clone)]
enum Readiness {
    Pending,
    Ready(Arc<dyn DocumentEngine>),
    Failed(String),
}

/// Initializer side of the one-shot engine ready signal. Consumed on use, so
/// readiness resolves exactly once.
pub struct EngineInit {
    tx: watch::Sender<Readiness>,
}

/// Awaitable engine ready signal shared by every controller.
#[derive(Clone)]
pub struct EngineReady {
    rx: watch::Receiver<Readiness>,
}

pub fn engine_ready() -> (EngineInit, EngineReady) {
    let (tx, rx) = watch::channel(Readiness::Pending);
    (EngineInit { tx }, EngineReady { rx })
}

impl EngineInit {
    pub fn ready(self, engine: Arc<dyn DocumentEngine>) {
        tracing::debug!("rendering engine ready");
        self.tx.send_replace(Readiness::Ready(engine));
    }

    pub fn fail(self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(%reason, "rendering engine failed to initialize");
        self.tx.send_replace(Readiness::Failed(reason));
    }
}

impl EngineReady {
    /// A signal that is already resolved with `engine`.
    pub fn immediate(engine: Arc<dyn DocumentEngine>) -> Self {
        let (init, ready) = engine_ready();
        init.ready(engine);
        ready
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.rx.borrow(), Readiness::Ready(_))
    }

    /// Waits until the engine is ready. Fails with
    /// [`Error::EngineUnavailable`] if initialization failed or the
    /// initializer was dropped without signalling.
    pub async fn wait(&self) -> Result<Arc<dyn DocumentEngine>, Error> {
        let mut rx = self.rx.clone();
        let outcome = rx
            .wait_for(|state| !matches!(state, Readiness::Pending))
            .await
            .map(|state| state.clone());
        match outcome {
            Ok(Readiness::Ready(engine)) => Ok(engine),
            Ok(Readiness::Failed(reason)) => Err(Error::EngineUnavailable(reason)),
            Ok(Readiness::Pending) | Err(_) => Err(Error::EngineUnavailable(
                "engine initializer dropped before signalling".into(),
            )),
        }
    }
}
