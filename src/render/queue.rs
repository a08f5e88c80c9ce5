//! Process-wide render serialization.
//!
//! Jobs execute strictly one at a time in arrival order, whichever controller
//! submitted them. This is the only gate to the engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Error};
use crate::render::job::{JobId, JobOutcome, OwnerId, RenderJob};

/// Constructible FIFO render queue. Clones share the same queue.
///
/// Nothing executes until [`RenderQueue::run`] is driven (usually through
/// [`RenderQueue::spawn`]).
#[derive(Clone, Default)]
pub struct RenderQueue {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    wake: Notify,
    next_id: AtomicU64,
    running: AtomicBool,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Queued>,
    executing: Option<Executing>,
    closed: bool,
}

struct Queued {
    id: JobId,
    job: RenderJob,
    cancel: CancellationToken,
    done: oneshot::Sender<JobOutcome>,
}

struct Executing {
    id: JobId,
    owner: OwnerId,
    cancel: CancellationToken,
}

/// Handle to a submitted job; settles once the job ran, failed or was cancelled.
#[derive(Debug)]
pub struct RenderTicket {
    id: JobId,
    owner: OwnerId,
    page: usize,
    done: oneshot::Receiver<JobOutcome>,
}

impl RenderTicket {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub async fn settled(self) -> JobOutcome {
        // a dropped sender means the queue shut down before running the job
        self.done.await.unwrap_or(JobOutcome::Cancelled)
    }
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the execution loop onto the current runtime. Only the first
    /// executor of a queue runs jobs; later ones return at once.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(cancel))
    }

    /// Appends `job` to the tail of the pending sequence.
    pub fn enqueue(&self, job: RenderJob) -> RenderTicket {
        let id = JobId(self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (done_tx, done_rx) = oneshot::channel();
        let ticket = RenderTicket {
            id,
            owner: job.owner,
            page: job.page,
            done: done_rx,
        };

        let mut state = self.shared.lock();
        if state.closed {
            drop(state);
            debug!(job = %id, "queue closed; job settles cancelled");
            let _ = done_tx.send(JobOutcome::Cancelled);
            return ticket;
        }
        debug!(job = %id, owner = %job.owner, page = job.page, pending = state.pending.len(), "render job queued");
        state.pending.push_back(Queued {
            id,
            job,
            cancel: CancellationToken::new(),
            done: done_tx,
        });
        drop(state);
        self.shared.wake.notify_one();
        ticket
    }

    /// Cancels one job. Pending jobs are removed and settle `Cancelled`
    /// without side effects; an executing job has its raster task asked to
    /// stop. Returns false when the job had already settled or was already
    /// cancelled.
    pub fn cancel(&self, id: JobId) -> bool {
        let mut state = self.shared.lock();
        if let Some(pos) = state.pending.iter().position(|q| q.id == id) {
            let queued = state.pending.remove(pos);
            drop(state);
            if let Some(queued) = queued {
                settle_cancelled(queued);
            }
            return true;
        }
        match &state.executing {
            Some(exec) if exec.id == id && !exec.cancel.is_cancelled() => {
                debug!(job = %id, "cancelling in-flight render");
                exec.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancels every pending and in-flight job submitted by `owner`.
    /// Returns how many jobs were newly cancelled.
    pub fn cancel_owner(&self, owner: OwnerId) -> usize {
        let mut state = self.shared.lock();
        let (mine, others): (VecDeque<Queued>, VecDeque<Queued>) = state
            .pending
            .drain(..)
            .partition(|q| q.job.owner == owner);
        state.pending = others;
        let mut cancelled = mine.len();
        if let Some(exec) = &state.executing {
            if exec.owner == owner && !exec.cancel.is_cancelled() {
                exec.cancel.cancel();
                cancelled += 1;
            }
        }
        drop(state);
        for queued in mine {
            settle_cancelled(queued);
        }
        if cancelled > 0 {
            debug!(%owner, cancelled, "cancelled owner's render jobs");
        }
        cancelled
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// The job currently executing, if any.
    pub fn executing(&self) -> Option<JobId> {
        self.shared.lock().executing.as_ref().map(|exec| exec.id)
    }

    /// Executes queued jobs one at a time until `cancel` fires. On exit every
    /// pending job settles `Cancelled` and later submissions are refused.
    pub async fn run(self, cancel: CancellationToken) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            warn!("render queue already has an executor; ignoring");
            return;
        }
        info!("render queue started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let next = self.shared.begin_next();
            let Some(Queued {
                id,
                job,
                cancel: job_cancel,
                done,
            }) = next
            else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.shared.wake.notified() => {}
                }
                continue;
            };

            let page = job.page;
            let owner = job.owner;
            debug!(job = %id, %owner, page, "render job started");

            let mut task = tokio::spawn(execute(job, job_cancel.clone()));
            let joined = tokio::select! {
                joined = &mut task => joined,
                _ = cancel.cancelled() => {
                    job_cancel.cancel();
                    task.await
                }
            };
            let outcome = joined.unwrap_or_else(|err| {
                JobOutcome::Failed(Error::Render {
                    page,
                    reason: format!("render task aborted: {err}"),
                })
            });
            self.shared.finish(id);

            match &outcome {
                JobOutcome::Rendered(viewport) => debug!(
                    job = %id,
                    %owner,
                    page,
                    width = viewport.width,
                    height = viewport.height,
                    "render job done"
                ),
                JobOutcome::Cancelled => debug!(job = %id, %owner, page, "render job cancelled"),
                JobOutcome::Failed(err) => warn!(job = %id, %owner, page, error = %err, "render job failed"),
            }
            let _ = done.send(outcome);
        }
        self.shared.close();
        info!("render queue stopped");
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_next(&self) -> Option<Queued> {
        let mut state = self.lock();
        let queued = state.pending.pop_front()?;
        state.executing = Some(Executing {
            id: queued.id,
            owner: queued.job.owner,
            cancel: queued.cancel.clone(),
        });
        Some(queued)
    }

    fn finish(&self, id: JobId) {
        let mut state = self.lock();
        if state.executing.as_ref().is_some_and(|exec| exec.id == id) {
            state.executing = None;
        }
    }

    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        let drained: Vec<Queued> = state.pending.drain(..).collect();
        drop(state);
        for queued in drained {
            settle_cancelled(queued);
        }
    }
}

fn settle_cancelled(queued: Queued) {
    queued.cancel.cancel();
    debug!(job = %queued.id, page = queued.job.page, "pending render job cancelled");
    let _ = queued.done.send(JobOutcome::Cancelled);
}

async fn execute(job: RenderJob, cancel: CancellationToken) -> JobOutcome {
    if cancel.is_cancelled() {
        return JobOutcome::Cancelled;
    }
    let page = match job.session.page(job.page).await {
        Ok(page) => page,
        Err(err) => return JobOutcome::Failed(err),
    };
    let viewport = job.sizing.viewport_for(page.size());
    match page.render(viewport, cancel.clone()).await {
        // the engine may finish despite cancellation; never present a stale raster
        Ok(_) if cancel.is_cancelled() => JobOutcome::Cancelled,
        Ok(raster) => {
            job.surface.present(raster, viewport);
            JobOutcome::Rendered(viewport)
        }
        Err(EngineError::Cancelled) => JobOutcome::Cancelled,
        Err(_) if cancel.is_cancelled() => JobOutcome::Cancelled,
        Err(err) => JobOutcome::Failed(Error::Render {
            page: job.page,
            reason: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::viewport::Sizing;
    use crate::render::session::DocumentSession;
    use crate::render::surface::Surface;
    use crate::testkit::{ScriptedEngine, open_scripted};
    use std::time::Duration;

    async fn session(engine: &ScriptedEngine, url: &str, pages: usize) -> DocumentSession {
        open_scripted(engine, url, pages).await.unwrap()
    }

    fn job(owner: OwnerId, session: &DocumentSession, page: usize) -> RenderJob {
        RenderJob {
            owner,
            session: session.clone(),
            page,
            surface: Surface::new(),
            sizing: Sizing::Fixed(1.0),
        }
    }

    #[tokio::test]
    async fn nothing_runs_until_driven() {
        let engine = ScriptedEngine::new();
        let doc = session(&engine, "mem://a", 1).await;
        let queue = RenderQueue::new();
        let ticket = queue.enqueue(job(OwnerId::next(), &doc, 1));
        assert_eq!(queue.pending_len(), 1);

        let cancel = CancellationToken::new();
        let worker = queue.spawn(cancel.clone());
        assert!(ticket.settled().await.is_rendered());
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.executing(), None);
        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_pending_is_idempotent_and_draws_nothing() {
        let engine = ScriptedEngine::new().with_render_delay(Duration::from_millis(30));
        let doc = session(&engine, "mem://a", 2).await;
        let queue = RenderQueue::new();
        let owner = OwnerId::next();
        let first = queue.enqueue(job(owner, &doc, 1));
        let second_job = job(owner, &doc, 2);
        let surface = second_job.surface.clone();
        let second = queue.enqueue(second_job);

        assert!(queue.cancel(second.id()));
        assert!(!queue.cancel(second.id()));

        let cancel = CancellationToken::new();
        let worker = queue.spawn(cancel.clone());
        assert!(first.settled().await.is_rendered());
        assert!(second.settled().await.is_cancelled());
        assert_eq!(surface.presentations(), 0);
        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn cancelling_completed_job_has_no_effect() {
        let engine = ScriptedEngine::new();
        let doc = session(&engine, "mem://a", 1).await;
        let queue = RenderQueue::new();
        let cancel = CancellationToken::new();
        let worker = queue.spawn(cancel.clone());

        let j = job(OwnerId::next(), &doc, 1);
        let surface = j.surface.clone();
        let ticket = queue.enqueue(j);
        let id = ticket.id();
        assert!(ticket.settled().await.is_rendered());
        assert!(!queue.cancel(id));
        assert!(!queue.cancel(id));
        assert_eq!(surface.presentations(), 1);
        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn in_flight_cancel_discards_raster() {
        let engine = ScriptedEngine::new()
            .with_render_delay(Duration::from_millis(100))
            .ignoring_cancel();
        let doc = session(&engine, "mem://a", 1).await;
        let queue = RenderQueue::new();
        let cancel = CancellationToken::new();
        let worker = queue.spawn(cancel.clone());

        let j = job(OwnerId::next(), &doc, 1);
        let surface = j.surface.clone();
        let ticket = queue.enqueue(j);
        let id = ticket.id();
        tokio::time::timeout(Duration::from_secs(1), async {
            while queue.executing() != Some(id) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("job never started");

        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(ticket.settled().await.is_cancelled());
        assert_eq!(surface.presentations(), 0);
        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn failing_job_does_not_block_the_queue() {
        let engine = ScriptedEngine::new().failing_page(1).panicking_page(2);
        let doc = session(&engine, "mem://a", 3).await;
        let queue = RenderQueue::new();
        let cancel = CancellationToken::new();
        let worker = queue.spawn(cancel.clone());
        let owner = OwnerId::next();

        let failed = queue.enqueue(job(owner, &doc, 1));
        let panicked = queue.enqueue(job(owner, &doc, 2));
        let fine = queue.enqueue(job(owner, &doc, 3));
        assert!(matches!(
            failed.settled().await,
            JobOutcome::Failed(Error::Render { page: 1, .. })
        ));
        assert!(matches!(
            panicked.settled().await,
            JobOutcome::Failed(Error::Render { page: 2, .. })
        ));
        assert!(fine.settled().await.is_rendered());
        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn out_of_range_page_fails_only_that_job() {
        let engine = ScriptedEngine::new();
        let doc = session(&engine, "mem://a", 1).await;
        let queue = RenderQueue::new();
        let cancel = CancellationToken::new();
        let worker = queue.spawn(cancel.clone());

        let ticket = queue.enqueue(job(OwnerId::next(), &doc, 5));
        assert!(matches!(
            ticket.settled().await,
            JobOutcome::Failed(Error::PageRange { page: 5, page_count: 1 })
        ));
        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_owner_leaves_other_owners_alone() {
        let engine = ScriptedEngine::new();
        let doc = session(&engine, "mem://a", 3).await;
        let queue = RenderQueue::new();
        let (a, b) = (OwnerId::next(), OwnerId::next());
        let a1 = queue.enqueue(job(a, &doc, 1));
        let b1 = queue.enqueue(job(b, &doc, 1));
        let a2 = queue.enqueue(job(a, &doc, 2));

        assert_eq!(queue.cancel_owner(a), 2);
        assert_eq!(queue.cancel_owner(a), 0);
        assert_eq!(queue.pending_len(), 1);

        let cancel = CancellationToken::new();
        let worker = queue.spawn(cancel.clone());
        assert!(a1.settled().await.is_cancelled());
        assert!(a2.settled().await.is_cancelled());
        assert!(b1.settled().await.is_rendered());
        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_and_refuses_new_jobs() {
        let engine = ScriptedEngine::new();
        let doc = session(&engine, "mem://a", 1).await;
        let queue = RenderQueue::new();
        let cancel = CancellationToken::new();
        let pending = queue.enqueue(job(OwnerId::next(), &doc, 1));
        cancel.cancel();
        queue.clone().run(cancel).await;

        assert!(pending.settled().await.is_cancelled());
        let late = queue.enqueue(job(OwnerId::next(), &doc, 1));
        assert!(late.settled().await.is_cancelled());
    }
}
