//! Inline thumbnail set: the first few pages of one document rendered at a
//! fixed scale into offscreen surfaces.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ThumbnailSettings;
use crate::events::{PageView, Phase, ThumbnailCommand};
use crate::layout::viewport::Sizing;
use crate::render::job::{JobOutcome, RenderJob};
use crate::render::surface::Surface;
use crate::tasks::controller::{Callback, LoadEvent, RenderBatch, Services, SourceLoad};

#[derive(Debug, Clone)]
pub struct ThumbnailProps {
    pub file_url: String,
    pub file_name: String,
    /// Overrides [`ThumbnailSettings::max_pages`].
    pub max_pages: Option<usize>,
}

/// One rendered (or failed) page of the set.
#[derive(Debug, Clone)]
pub struct ThumbnailSlot {
    pub page: usize,
    pub view: PageView,
    pub surface: Surface,
}

impl ThumbnailSlot {
    /// PNG encoding of the rendered page, once it is available.
    pub fn png(&self) -> Option<Vec<u8>> {
        match self.view {
            PageView::Rendered(_) => self.surface.snapshot()?.to_png().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThumbnailState {
    pub source: String,
    pub file_name: String,
    pub phase: Phase,
    pub page_count: Option<usize>,
    pub slots: Vec<ThumbnailSlot>,
}

impl ThumbnailState {
    pub fn rendered(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.view, PageView::Rendered(_)))
            .count()
    }

    pub fn unavailable(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.view, PageView::Unavailable(_)))
            .count()
    }
}

pub struct ThumbnailSetHandle {
    commands: mpsc::Sender<ThumbnailCommand>,
    state: watch::Receiver<ThumbnailState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ThumbnailSetHandle {
    pub fn state(&self) -> ThumbnailState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ThumbnailState> {
        self.state.clone()
    }

    pub async fn click(&self) {
        self.send(ThumbnailCommand::Click).await;
    }

    pub async fn delete(&self) {
        self.send(ThumbnailCommand::Delete).await;
    }

    pub async fn set_source(&self, url: impl Into<String>) {
        self.send(ThumbnailCommand::SetSource(url.into())).await;
    }

    async fn send(&self, command: ThumbnailCommand) {
        if self.commands.send(command).await.is_err() {
            debug!("thumbnail set already stopped; command dropped");
        }
    }

    /// Waits for a state matching `pred`; `None` if the controller stopped first.
    pub async fn wait_until(
        &self,
        mut pred: impl FnMut(&ThumbnailState) -> bool,
    ) -> Option<ThumbnailState> {
        let mut rx = self.state.clone();
        rx.wait_for(|state| pred(state))
            .await
            .ok()
            .map(|state| state.clone())
    }

    pub async fn settled(&self) -> Option<ThumbnailState> {
        self.wait_until(|state| state.phase.is_settled()).await
    }

    /// Stops the controller and cancels its outstanding render jobs.
    pub async fn unmount(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!("thumbnail task ended abnormally: {err}");
        }
    }
}

/// Mounts a thumbnail set for `props.file_url` and starts loading it.
#[instrument(skip_all, fields(url = %props.file_url))]
pub fn mount(
    services: &Services,
    settings: &ThumbnailSettings,
    props: ThumbnailProps,
    on_click: Callback,
    on_delete: Option<Callback>,
) -> ThumbnailSetHandle {
    let max_pages = props.max_pages.unwrap_or(settings.max_pages);
    let (state_tx, state_rx) = watch::channel(ThumbnailState {
        source: props.file_url.clone(),
        file_name: props.file_name.clone(),
        phase: Phase::Idle,
        page_count: None,
        slots: Vec::new(),
    });
    let (commands_tx, commands_rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let controller = ThumbnailSet {
        load: SourceLoad::new(services.loader.clone()),
        batch: RenderBatch::new(services.queue.clone()),
        scale: settings.scale,
        max_pages,
        on_click,
        on_delete,
        state: state_tx,
    };
    let task = tokio::spawn(controller.run(props.file_url, commands_rx, cancel.clone()));
    ThumbnailSetHandle {
        commands: commands_tx,
        state: state_rx,
        cancel,
        task,
    }
}

struct ThumbnailSet {
    load: SourceLoad,
    batch: RenderBatch,
    scale: f32,
    max_pages: usize,
    on_click: Callback,
    on_delete: Option<Callback>,
    state: watch::Sender<ThumbnailState>,
}

impl ThumbnailSet {
    async fn run(
        mut self,
        url: String,
        mut commands: mpsc::Receiver<ThumbnailCommand>,
        cancel: CancellationToken,
    ) {
        self.load_source(url);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                command = commands.recv() => match command {
                    Some(ThumbnailCommand::Click) => (self.on_click)(),
                    Some(ThumbnailCommand::Delete) => {
                        if let Some(on_delete) = &self.on_delete {
                            on_delete();
                        }
                    }
                    Some(ThumbnailCommand::SetSource(url)) => self.load_source(url),
                    None => break,
                },

                Some(event) = self.load.next(), if !self.load.is_idle() => self.on_load(event),

                Some(settled) = self.batch.next(), if !self.batch.is_idle() => {
                    self.on_settled(settled.page, settled.outcome);
                }
            }
        }
        debug!(owner = %self.batch.owner(), "thumbnail set stopped");
    }

    fn load_source(&mut self, url: String) {
        self.batch.restart();
        self.state.send_modify(|state| {
            state.source = url.clone();
            state.phase = Phase::Loading;
            state.page_count = None;
            state.slots.clear();
        });
        self.load.start(url);
    }

    fn on_load(&mut self, event: LoadEvent) {
        match event {
            LoadEvent::Opening => self.state.send_modify(|state| state.phase = Phase::Opening),
            LoadEvent::Failed(err) => {
                warn!(error = %err, "thumbnail document failed to load");
                self.state.send_modify(|state| {
                    state.phase = Phase::Failed {
                        message: err.to_string(),
                    }
                });
            }
            LoadEvent::Opened(session) => {
                let shown = session.page_count().min(self.max_pages);
                let slots: Vec<ThumbnailSlot> = (1..=shown)
                    .map(|page| ThumbnailSlot {
                        page,
                        view: PageView::Pending,
                        surface: Surface::new(),
                    })
                    .collect();
                for slot in &slots {
                    self.batch.submit(RenderJob {
                        owner: self.batch.owner(),
                        session: session.clone(),
                        page: slot.page,
                        surface: slot.surface.clone(),
                        sizing: Sizing::Fixed(self.scale),
                    });
                }
                info!(
                    pages = session.page_count(),
                    shown,
                    "rendering thumbnails"
                );
                let phase = if shown == 0 {
                    Phase::Ready
                } else {
                    Phase::Rendering
                };
                self.state.send_modify(|state| {
                    state.page_count = Some(session.page_count());
                    state.slots = slots;
                    state.phase = phase;
                });
            }
        }
    }

    fn on_settled(&mut self, page: usize, outcome: JobOutcome) {
        let view = match outcome {
            JobOutcome::Rendered(viewport) => PageView::Rendered(viewport),
            JobOutcome::Failed(err) => PageView::Unavailable(err.to_string()),
            JobOutcome::Cancelled => PageView::Unavailable("render cancelled".into()),
        };
        let done = self.batch.is_idle();
        self.state.send_modify(|state| {
            if let Some(slot) = state.slots.iter_mut().find(|slot| slot.page == page) {
                slot.view = view;
            }
            if done {
                state.phase = Phase::Ready;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::queue::RenderQueue;
    use crate::testkit::{ScriptedEngine, StaticSource, loader};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Callback) {
        let count = Arc::new(AtomicUsize::new(0));
        let cb: Callback = Arc::new({
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        (count, cb)
    }

    fn props(url: &str, max_pages: Option<usize>) -> ThumbnailProps {
        ThumbnailProps {
            file_url: url.into(),
            file_name: "doc.pdf".into(),
            max_pages,
        }
    }

    #[tokio::test]
    async fn renders_leading_pages_at_fixed_scale() {
        let engine = ScriptedEngine::new();
        let queue = RenderQueue::new();
        let cancel = CancellationToken::new();
        let worker = queue.spawn(cancel.clone());
        let services = Services::new(
            queue,
            loader(StaticSource::new().with_document("mem://a", 8), &engine),
        );
        let (_, on_click) = counter();

        let set = mount(
            &services,
            &ThumbnailSettings::default(),
            props("mem://a", None),
            on_click,
            None,
        );
        let state = set.settled().await.unwrap();
        assert_eq!(state.phase, Phase::Ready);
        assert_eq!(state.page_count, Some(8));
        assert_eq!(state.slots.len(), 5);
        assert_eq!(state.rendered(), 5);
        match state.slots[0].view {
            PageView::Rendered(viewport) => {
                assert_eq!((viewport.width, viewport.height), (892, 1263));
            }
            ref other => panic!("unexpected view {other:?}"),
        }
        assert!(state.slots[0].png().unwrap().starts_with(b"\x89PNG"));

        set.unmount().await;
        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn click_and_delete_only_fire_callbacks() {
        let engine = ScriptedEngine::new();
        let queue = RenderQueue::new();
        let services = Services::new(
            queue.clone(),
            loader(StaticSource::new().with_document("mem://a", 2), &engine),
        );
        let (clicks, on_click) = counter();
        let (deletes, on_delete) = counter();
        let set = mount(
            &services,
            &ThumbnailSettings::default(),
            props("mem://a", Some(2)),
            on_click,
            Some(on_delete),
        );
        set.click().await;
        set.delete().await;
        set.delete().await;
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while clicks.load(Ordering::SeqCst) != 1 || deletes.load(Ordering::SeqCst) != 2 {
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        // the queue is not running, so nothing was drawn
        assert!(set.state().slots.iter().all(|s| s.surface.presentations() == 0));
        set.unmount().await;
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_is_terminal() {
        let engine = ScriptedEngine::new();
        let services = Services::new(
            RenderQueue::new(),
            loader(StaticSource::new().failing("mem://a", "HTTP status 500"), &engine),
        );
        let (_, on_click) = counter();
        let set = mount(
            &services,
            &ThumbnailSettings::default(),
            props("mem://a", None),
            on_click,
            None,
        );
        let state = set.settled().await.unwrap();
        assert!(matches!(state.phase, Phase::Failed { ref message } if message.contains("500")));
        assert!(state.slots.is_empty());
        set.unmount().await;
    }
}
