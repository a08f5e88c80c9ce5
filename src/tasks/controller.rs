//! Plumbing shared by the surface controllers.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;

use crate::error::Error;
use crate::render::job::{JobId, JobOutcome, OwnerId, RenderJob};
use crate::render::queue::RenderQueue;
use crate::render::session::{DocumentLoader, DocumentSession};

/// Host callback fired by a controller (click, delete, close).
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Process-wide collaborators every controller is mounted with.
#[derive(Clone)]
pub struct Services {
    pub queue: RenderQueue,
    pub loader: DocumentLoader,
}

impl Services {
    pub fn new(queue: RenderQueue, loader: DocumentLoader) -> Self {
        Self { queue, loader }
    }
}

pub(crate) enum LoadEvent {
    /// Bytes arrived; parsing started.
    Opening,
    Opened(DocumentSession),
    Failed(Error),
}

enum LoadStep {
    Fetched {
        generation: u64,
        url: String,
        bytes: Result<Vec<u8>, Error>,
    },
    Parsed {
        generation: u64,
        session: Result<DocumentSession, Error>,
    },
}

impl LoadStep {
    fn generation(&self) -> u64 {
        match self {
            Self::Fetched { generation, .. } | Self::Parsed { generation, .. } => *generation,
        }
    }
}

/// Fetch then parse of the controller's current source. Starting a new load
/// aborts the previous one.
pub(crate) struct SourceLoad {
    loader: DocumentLoader,
    steps: JoinSet<LoadStep>,
    generation: u64,
}

impl SourceLoad {
    pub(crate) fn new(loader: DocumentLoader) -> Self {
        Self {
            loader,
            steps: JoinSet::new(),
            generation: 0,
        }
    }

    pub(crate) fn start(&mut self, url: String) {
        self.steps.abort_all();
        self.generation += 1;
        let generation = self.generation;
        let loader = self.loader.clone();
        self.steps.spawn(async move {
            let bytes = loader.fetch(&url).await;
            LoadStep::Fetched {
                generation,
                url,
                bytes,
            }
        });
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.steps.is_empty()
    }

    /// Next event of the current load; `None` once nothing is in flight.
    /// Cancel safe.
    pub(crate) async fn next(&mut self) -> Option<LoadEvent> {
        loop {
            let step = match self.steps.join_next().await? {
                Ok(step) => step,
                Err(err) if err.is_cancelled() => continue,
                Err(err) => {
                    return Some(LoadEvent::Failed(Error::Parse(format!(
                        "document loader crashed: {err}"
                    ))));
                }
            };
            if step.generation() != self.generation {
                continue;
            }
            return Some(match step {
                LoadStep::Fetched {
                    generation,
                    url,
                    bytes: Ok(bytes),
                } => {
                    let loader = self.loader.clone();
                    self.steps.spawn(async move {
                        let session = loader.parse(&url, bytes).await;
                        LoadStep::Parsed {
                            generation,
                            session,
                        }
                    });
                    LoadEvent::Opening
                }
                LoadStep::Fetched { bytes: Err(err), .. } => LoadEvent::Failed(err),
                LoadStep::Parsed {
                    session: Ok(session),
                    ..
                } => LoadEvent::Opened(session),
                LoadStep::Parsed {
                    session: Err(err), ..
                } => LoadEvent::Failed(err),
            });
        }
    }
}

pub(crate) struct Settled {
    pub page: usize,
    pub outcome: JobOutcome,
}

/// The render jobs one controller has in the queue.
///
/// Ticket waiters run in a `JoinSet` so the controller keeps serving commands
/// while its jobs wait. Dropping the batch cancels everything it submitted.
pub(crate) struct RenderBatch {
    queue: RenderQueue,
    owner: OwnerId,
    generation: u64,
    waiters: JoinSet<(u64, Settled)>,
    outstanding: usize,
}

impl RenderBatch {
    pub(crate) fn new(queue: RenderQueue) -> Self {
        Self {
            queue,
            owner: OwnerId::next(),
            generation: 0,
            waiters: JoinSet::new(),
            outstanding: 0,
        }
    }

    pub(crate) fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Cancels every outstanding job; their outcomes are never reported.
    pub(crate) fn restart(&mut self) -> usize {
        let cancelled = self.queue.cancel_owner(self.owner);
        self.waiters.abort_all();
        self.generation += 1;
        self.outstanding = 0;
        debug!(owner = %self.owner, cancelled, "render batch restarted");
        cancelled
    }

    pub(crate) fn submit(&mut self, job: RenderJob) -> JobId {
        debug_assert_eq!(job.owner, self.owner);
        let page = job.page;
        let ticket = self.queue.enqueue(job);
        let id = ticket.id();
        let generation = self.generation;
        self.outstanding += 1;
        self.waiters.spawn(async move {
            let outcome = ticket.settled().await;
            (generation, Settled { page, outcome })
        });
        id
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.outstanding == 0
    }

    /// Next settled job of the current generation. Cancel safe.
    pub(crate) async fn next(&mut self) -> Option<Settled> {
        loop {
            match self.waiters.join_next().await? {
                Ok((generation, settled)) if generation == self.generation => {
                    self.outstanding = self.outstanding.saturating_sub(1);
                    return Some(settled);
                }
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
    }
}

impl Drop for RenderBatch {
    fn drop(&mut self) {
        self.queue.cancel_owner(self.owner);
    }
}
