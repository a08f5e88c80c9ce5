//! Full-screen paging viewer.
//!
//! Every page gets its own surface in a single scroll column. Rendering starts
//! once the host attaches the column (reports its container size); zoom and
//! width changes cancel this viewer's outstanding jobs and resubmit every page.
//! Navigation of any kind funnels into a single go-to-page step, which scrolls the
//! target surface into view.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ViewerSettings;
use crate::events::{NavKey, PageView, Phase, ViewerCommand};
use crate::layout::column::{ContainerSize, ScrollColumn};
use crate::layout::viewport::{Sizing, Zoom};
use crate::layout::visibility::Rect;
use crate::render::job::{JobOutcome, RenderJob};
use crate::render::session::DocumentSession;
use crate::render::surface::Surface;
use crate::tasks::controller::{Callback, LoadEvent, RenderBatch, Services, SourceLoad};

#[derive(Debug, Clone)]
pub struct ViewerProps {
    pub file_url: String,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct ViewerPage {
    pub page: usize,
    pub view: PageView,
    pub surface: Surface,
    /// Position of the surface in the scroll column.
    pub rect: Rect,
}

#[derive(Debug, Clone)]
pub struct ViewerState {
    pub source: String,
    pub file_name: String,
    pub phase: Phase,
    pub page_count: Option<usize>,
    /// 1-based page the user is looking at.
    pub current_page: usize,
    pub zoom: Zoom,
    pub attached: bool,
    pub container: Option<ContainerSize>,
    pub scroll_top: f32,
    pub pages: Vec<ViewerPage>,
}

impl ViewerState {
    /// The visible part of the column, once the host reported a container.
    pub fn container_rect(&self) -> Option<Rect> {
        self.container
            .map(|size| Rect::new(0.0, self.scroll_top, size.width, size.height))
    }

    pub fn page(&self, number: usize) -> Option<&ViewerPage> {
        number.checked_sub(1).and_then(|index| self.pages.get(index))
    }

    pub fn rendered(&self) -> usize {
        self.pages
            .iter()
            .filter(|page| matches!(page.view, PageView::Rendered(_)))
            .count()
    }

    pub fn unavailable(&self) -> usize {
        self.pages
            .iter()
            .filter(|page| matches!(page.view, PageView::Unavailable(_)))
            .count()
    }

    /// Page indicator text, e.g. `"2 / 5"`.
    pub fn indicator(&self) -> String {
        format!("{} / {}", self.current_page, self.page_count.unwrap_or(0))
    }
}

pub struct ViewerHandle {
    commands: mpsc::Sender<ViewerCommand>,
    state: watch::Receiver<ViewerState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ViewerHandle {
    pub fn state(&self) -> ViewerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewerState> {
        self.state.clone()
    }

    pub fn surface(&self, page: usize) -> Option<Surface> {
        self.state.borrow().page(page).map(|p| p.surface.clone())
    }

    pub async fn attach(&self, container: ContainerSize) {
        self.send(ViewerCommand::Attach(container)).await;
    }

    pub async fn resize(&self, container: ContainerSize) {
        self.send(ViewerCommand::Resize(container)).await;
    }

    pub async fn scroll(&self, offset: f32) {
        self.send(ViewerCommand::Scroll(offset)).await;
    }

    pub async fn zoom_in(&self) {
        self.send(ViewerCommand::ZoomIn).await;
    }

    pub async fn zoom_out(&self) {
        self.send(ViewerCommand::ZoomOut).await;
    }

    pub async fn set_zoom(&self, zoom: f32) {
        self.send(ViewerCommand::SetZoom(zoom)).await;
    }

    pub async fn wheel(&self, delta_y: f32, ctrl: bool) {
        self.send(ViewerCommand::Wheel { delta_y, ctrl }).await;
    }

    pub async fn go_to(&self, page: usize) {
        self.send(ViewerCommand::GoTo(page)).await;
    }

    pub async fn key(&self, key: NavKey) {
        self.send(ViewerCommand::Key(key)).await;
    }

    /// Forwards a DOM-style key name; unbound keys are ignored.
    pub async fn key_name(&self, name: &str) {
        if let Some(key) = NavKey::from_key_name(name) {
            self.key(key).await;
        }
    }

    pub async fn jump(&self, text: &str) {
        self.send(ViewerCommand::Jump(text.to_string())).await;
    }

    pub async fn set_source(&self, url: impl Into<String>) {
        self.send(ViewerCommand::SetSource(url.into())).await;
    }

    pub async fn close(&self) {
        self.send(ViewerCommand::Close).await;
    }

    async fn send(&self, command: ViewerCommand) {
        if self.commands.send(command).await.is_err() {
            debug!("viewer already stopped; command dropped");
        }
    }

    /// Waits for a state matching `pred`; `None` if the viewer stopped first.
    pub async fn wait_until(
        &self,
        mut pred: impl FnMut(&ViewerState) -> bool,
    ) -> Option<ViewerState> {
        let mut rx = self.state.clone();
        rx.wait_for(|state| pred(state))
            .await
            .ok()
            .map(|state| state.clone())
    }

    pub async fn unmount(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!("viewer task ended abnormally: {err}");
        }
    }
}

/// Mounts a full viewer for `props.file_url` and starts loading it.
#[instrument(skip_all, fields(url = %props.file_url))]
pub fn mount(
    services: &Services,
    settings: &ViewerSettings,
    props: ViewerProps,
    on_close: Callback,
) -> ViewerHandle {
    let zoom = settings.zoom();
    let (state_tx, state_rx) = watch::channel(ViewerState {
        source: props.file_url.clone(),
        file_name: props.file_name.clone(),
        phase: Phase::Idle,
        page_count: None,
        current_page: 1,
        zoom,
        attached: false,
        container: None,
        scroll_top: 0.0,
        pages: Vec::new(),
    });
    let (commands_tx, commands_rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let viewer = Viewer {
        load: SourceLoad::new(services.loader.clone()),
        batch: RenderBatch::new(services.queue.clone()),
        settings: settings.clone(),
        on_close,
        source: props.file_url.clone(),
        file_name: props.file_name,
        phase: Phase::Idle,
        zoom,
        container: None,
        attached: false,
        column: None,
        session: None,
        surfaces: Vec::new(),
        views: Vec::new(),
        current: 1,
        state: state_tx,
    };
    let task = tokio::spawn(viewer.run(props.file_url, commands_rx, cancel.clone()));
    ViewerHandle {
        commands: commands_tx,
        state: state_rx,
        cancel,
        task,
    }
}

struct Viewer {
    load: SourceLoad,
    batch: RenderBatch,
    settings: ViewerSettings,
    on_close: Callback,
    source: String,
    file_name: String,
    phase: Phase,
    zoom: Zoom,
    container: Option<ContainerSize>,
    attached: bool,
    column: Option<ScrollColumn>,
    session: Option<DocumentSession>,
    surfaces: Vec<Surface>,
    views: Vec<PageView>,
    current: usize,
    state: watch::Sender<ViewerState>,
}

impl Viewer {
    async fn run(
        mut self,
        url: String,
        mut commands: mpsc::Receiver<ViewerCommand>,
        cancel: CancellationToken,
    ) {
        self.load_source(url);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },

                Some(event) = self.load.next(), if !self.load.is_idle() => self.on_load(event),

                Some(settled) = self.batch.next(), if !self.batch.is_idle() => {
                    self.on_settled(settled.page, settled.outcome);
                }
            }
            self.publish();
        }
        debug!(owner = %self.batch.owner(), "viewer stopped");
    }

    fn handle(&mut self, command: ViewerCommand) {
        match command {
            ViewerCommand::Attach(container) => self.attach(container),
            ViewerCommand::Resize(container) => self.resize(container),
            ViewerCommand::Scroll(offset) => self.scroll_to(offset),
            ViewerCommand::ZoomIn => self.set_zoom(self.zoom.step_in()),
            ViewerCommand::ZoomOut => self.set_zoom(self.zoom.step_out()),
            ViewerCommand::SetZoom(value) => self.set_zoom(Zoom::new(value)),
            ViewerCommand::Wheel { delta_y, ctrl } => self.wheel(delta_y, ctrl),
            ViewerCommand::GoTo(page) => self.go_to(page),
            ViewerCommand::Key(key) => self.key(key),
            ViewerCommand::Jump(text) => self.jump(&text),
            ViewerCommand::SetSource(url) => self.load_source(url),
            ViewerCommand::Close => (self.on_close)(),
        }
    }

    fn page_count(&self) -> usize {
        self.session.as_ref().map_or(0, DocumentSession::page_count)
    }

    fn load_source(&mut self, url: String) {
        self.batch.restart();
        self.session = None;
        self.column = None;
        self.surfaces.clear();
        self.views.clear();
        self.current = 1;
        self.phase = Phase::Loading;
        self.source = url.clone();
        self.load.start(url);
        self.publish();
    }

    fn on_load(&mut self, event: LoadEvent) {
        match event {
            LoadEvent::Opening => self.phase = Phase::Opening,
            LoadEvent::Failed(err) => {
                warn!(error = %err, "viewer document failed to load");
                self.phase = Phase::Failed {
                    message: err.to_string(),
                };
            }
            LoadEvent::Opened(session) => {
                let count = session.page_count();
                let container = self.container.unwrap_or(ContainerSize::new(0.0, 0.0));
                self.column = Some(ScrollColumn::new(
                    count,
                    container,
                    self.settings.column_padding_px,
                    self.settings.page_gap_px,
                ));
                self.surfaces = (0..count).map(|_| Surface::new()).collect();
                self.views = vec![PageView::Pending; count];
                self.current = 1;
                self.session = Some(session);
                self.phase = Phase::Rendering;
                info!(pages = count, file = %self.file_name, "viewer document opened");
                if self.attached {
                    self.render_all();
                } else {
                    debug!("waiting for the host to attach the page column");
                }
            }
        }
    }

    /// Cancels outstanding jobs and submits every page at the current
    /// container width and zoom.
    fn render_all(&mut self) {
        let (Some(session), Some(container)) = (self.session.clone(), self.container) else {
            return;
        };
        self.batch.restart();
        let sizing = Sizing::Fit {
            container_width: container.width,
            zoom: self.zoom,
            padding: self.settings.landscape_padding_px,
        };
        for (index, surface) in self.surfaces.iter().enumerate() {
            self.batch.submit(RenderJob {
                owner: self.batch.owner(),
                session: session.clone(),
                page: index + 1,
                surface: surface.clone(),
                sizing,
            });
        }
        self.views.fill(PageView::Pending);
        self.phase = Phase::Rendering;
        debug!(
            pages = self.surfaces.len(),
            zoom = self.zoom.value(),
            width = container.width,
            "render jobs submitted"
        );
    }

    fn on_settled(&mut self, page: usize, outcome: JobOutcome) {
        let view = match outcome {
            JobOutcome::Rendered(viewport) => {
                if let Some(column) = self.column.as_mut() {
                    column.set_page_size(page, viewport.width, viewport.height);
                }
                PageView::Rendered(viewport)
            }
            JobOutcome::Failed(err) => PageView::Unavailable(err.to_string()),
            JobOutcome::Cancelled => PageView::Unavailable("render cancelled".into()),
        };
        if let Some(slot) = page.checked_sub(1).and_then(|i| self.views.get_mut(i)) {
            *slot = view;
        }
        if self.batch.is_idle() {
            self.phase = Phase::Ready;
            info!(pages = self.views.len(), "viewer ready");
        }
    }

    fn attach(&mut self, container: ContainerSize) {
        if self.attached {
            self.resize(container);
            return;
        }
        self.attached = true;
        self.container = Some(container);
        if let Some(column) = self.column.as_mut() {
            column.set_container(container);
        }
        debug!(width = container.width, height = container.height, "page column attached");
        self.render_all();
    }

    fn resize(&mut self, container: ContainerSize) {
        let width_changed = self
            .container
            .is_none_or(|previous| previous.width != container.width);
        self.container = Some(container);
        if let Some(column) = self.column.as_mut() {
            column.set_container(container);
            self.current = column.most_visible_page(self.current);
        }
        if self.attached && width_changed {
            debug!(width = container.width, "container width changed");
            self.render_all();
        }
    }

    fn set_zoom(&mut self, zoom: Zoom) {
        if zoom == self.zoom {
            return;
        }
        info!(from = self.zoom.value(), to = zoom.value(), "zoom changed");
        self.zoom = zoom;
        if self.attached {
            self.render_all();
        }
    }

    fn wheel(&mut self, delta_y: f32, ctrl: bool) {
        if ctrl {
            if delta_y < 0.0 {
                self.set_zoom(self.zoom.step_in());
            } else if delta_y > 0.0 {
                self.set_zoom(self.zoom.step_out());
            }
        } else if let Some(column) = &self.column {
            let offset = column.scroll_top() + delta_y;
            self.scroll_to(offset);
        }
    }

    fn scroll_to(&mut self, offset: f32) {
        if let Some(column) = self.column.as_mut() {
            column.set_scroll(offset);
            self.current = column.most_visible_page(self.current);
        }
    }

    /// Scrolls the surface of page `page` into view and makes it current.
    fn go_to(&mut self, page: usize) {
        let count = self.page_count();
        if count == 0 {
            return;
        }
        let page = page.clamp(1, count);
        if let Some(column) = self.column.as_mut() {
            column.scroll_into_view(page);
        }
        self.current = page;
        debug!(page, "navigated");
    }

    fn key(&mut self, key: NavKey) {
        match key {
            NavKey::Previous => self.go_to(self.current.saturating_sub(1).max(1)),
            NavKey::Next => self.go_to(self.current + 1),
            NavKey::First => self.go_to(1),
            NavKey::Last => self.go_to(self.page_count()),
            NavKey::Close => (self.on_close)(),
        }
    }

    fn jump(&mut self, text: &str) {
        match text.trim().parse::<usize>() {
            Ok(page) if (1..=self.page_count()).contains(&page) => self.go_to(page),
            _ => debug!(input = text, "ignoring page jump"),
        }
    }

    fn publish(&self) {
        let rects = self
            .column
            .as_ref()
            .map(ScrollColumn::surface_rects)
            .unwrap_or_default();
        let pages = self
            .surfaces
            .iter()
            .zip(&self.views)
            .enumerate()
            .map(|(index, (surface, view))| ViewerPage {
                page: index + 1,
                view: view.clone(),
                surface: surface.clone(),
                rect: rects.get(index).copied().unwrap_or_default(),
            })
            .collect();
        self.state.send_replace(ViewerState {
            source: self.source.clone(),
            file_name: self.file_name.clone(),
            phase: self.phase.clone(),
            page_count: self.session.as_ref().map(DocumentSession::page_count),
            current_page: self.current,
            zoom: self.zoom,
            attached: self.attached,
            container: self.container,
            scroll_top: self.column.as_ref().map_or(0.0, ScrollColumn::scroll_top),
            pages,
        });
    }
}
