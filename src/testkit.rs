//! In-memory collaborators for exercising the pipeline without a network or a
//! real document engine.
//!
//! [`ScriptedEngine`] opens byte strings of the form
//! `scripted:<label>:<W>x<H>,<W>x<H>,...` (one entry per page) and rejects
//! anything else. [`StaticSource`] serves canned bytes per URL.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use tokio_util::sync::CancellationToken;

use crate::engine::{DocumentEngine, EngineDocument, EnginePage, EngineReady};
use crate::error::{EngineError, Error, Result};
use crate::fetch::ByteSource;
use crate::layout::viewport::{PageSize, Viewport};
use crate::render::session::{DocumentLoader, DocumentSession};

/// Intrinsic size of an A4 page at 72 dpi.
pub const A4: (u32, u32) = (595, 842);

const SCRIPT_PREFIX: &str = "scripted:";

/// Encodes a scripted document understood by [`ScriptedEngine`].
pub fn scripted_bytes(label: &str, pages: &[(u32, u32)]) -> Vec<u8> {
    let sizes: Vec<String> = pages.iter().map(|(w, h)| format!("{w}x{h}")).collect();
    format!("{SCRIPT_PREFIX}{label}:{}", sizes.join(",")).into_bytes()
}

fn parse_script(bytes: &[u8]) -> Option<(String, Vec<PageSize>)> {
    let text = std::str::from_utf8(bytes).ok()?;
    let body = text.strip_prefix(SCRIPT_PREFIX)?;
    let (label, sizes) = body.rsplit_once(':')?;
    let mut pages = Vec::new();
    for entry in sizes.split(',').filter(|s| !s.is_empty()) {
        let (w, h) = entry.split_once('x')?;
        pages.push(PageSize::new(w.parse().ok()?, h.parse().ok()?));
    }
    Some((label.to_string(), pages))
}

/// Serves fixed bytes per URL; unknown URLs fail like a 404.
#[derive(Default)]
pub struct StaticSource {
    entries: HashMap<String, Served>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

enum Served {
    Bytes(Vec<u8>),
    Failure(String),
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A document of `pages` A4 portrait pages, labelled with its URL.
    pub fn with_document(self, url: &str, pages: usize) -> Self {
        let sizes = vec![A4; pages];
        self.with_pages(url, &sizes)
    }

    pub fn with_pages(self, url: &str, pages: &[(u32, u32)]) -> Self {
        let bytes = scripted_bytes(url, pages);
        self.with_bytes(url, bytes)
    }

    pub fn with_bytes(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.entries.insert(url.to_string(), Served::Bytes(bytes));
        self
    }

    /// Fetching `url` fails with `reason`.
    pub fn failing(mut self, url: &str, reason: &str) -> Self {
        self.entries
            .insert(url.to_string(), Served::Failure(reason.to_string()));
        self
    }

    /// Every fetch waits `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ByteSource for StaticSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.entries.get(url) {
            Some(Served::Bytes(bytes)) => Ok(bytes.clone()),
            Some(Served::Failure(reason)) => Err(Error::fetch(url, reason.clone())),
            None => Err(Error::fetch(url, "HTTP status 404 Not Found")),
        }
    }
}

/// One rasterization observed by an [`EngineProbe`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRecord {
    pub document: String,
    pub page: usize,
    pub viewport: Viewport,
}

/// Shared counters recording what a [`ScriptedEngine`] was asked to do.
#[derive(Debug, Default)]
pub struct EngineProbe {
    active: AtomicUsize,
    max_active: AtomicUsize,
    started: Mutex<Vec<RenderRecord>>,
    completed: Mutex<Vec<RenderRecord>>,
}

impl EngineProbe {
    /// Highest number of rasterizations that were ever running at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<RenderRecord> {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rasterizations that ran to completion, in completion order.
    pub fn completed(&self) -> Vec<RenderRecord> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn begin(&self, record: RenderRecord) -> ActiveGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        ActiveGuard { probe: self }
    }

    fn complete(&self, record: RenderRecord) {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

struct ActiveGuard<'a> {
    probe: &'a EngineProbe,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.probe.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
struct Script {
    open_delay: Option<Duration>,
    render_delay: Option<Duration>,
    failing: HashSet<usize>,
    panicking: HashSet<usize>,
    ignore_cancel: bool,
}

/// Fake engine with programmable latency and failures.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    script: Arc<Script>,
    probe: Arc<EngineProbe>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn edit(mut self, f: impl FnOnce(&mut Script)) -> Self {
        f(Arc::make_mut(&mut self.script));
        self
    }

    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.edit(|s| s.open_delay = Some(delay))
    }

    pub fn with_render_delay(self, delay: Duration) -> Self {
        self.edit(|s| s.render_delay = Some(delay))
    }

    /// Rendering `page` of any document returns a raster error.
    pub fn failing_page(self, page: usize) -> Self {
        self.edit(|s| {
            s.failing.insert(page);
        })
    }

    /// Rendering `page` of any document panics.
    pub fn panicking_page(self, page: usize) -> Self {
        self.edit(|s| {
            s.panicking.insert(page);
        })
    }

    /// Renders run their full delay even after cancellation.
    pub fn ignoring_cancel(self) -> Self {
        self.edit(|s| s.ignore_cancel = true)
    }

    pub fn probe(&self) -> Arc<EngineProbe> {
        Arc::clone(&self.probe)
    }
}

#[async_trait]
impl DocumentEngine for ScriptedEngine {
    async fn open(&self, bytes: Vec<u8>) -> std::result::Result<Arc<dyn EngineDocument>, EngineError> {
        if let Some(delay) = self.script.open_delay {
            tokio::time::sleep(delay).await;
        }
        let (label, sizes) = parse_script(&bytes)
            .ok_or_else(|| EngineError::Rejected("unrecognized document format".into()))?;
        let pages = sizes
            .into_iter()
            .enumerate()
            .map(|(index, size)| {
                Arc::new(ScriptedPage {
                    document: label.clone(),
                    number: index + 1,
                    size,
                    script: Arc::clone(&self.script),
                    probe: Arc::clone(&self.probe),
                })
            })
            .collect();
        Ok(Arc::new(ScriptedDocument { pages }))
    }
}

struct ScriptedDocument {
    pages: Vec<Arc<ScriptedPage>>,
}

#[async_trait]
impl EngineDocument for ScriptedDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    async fn page(&self, number: usize) -> std::result::Result<Arc<dyn EnginePage>, EngineError> {
        number
            .checked_sub(1)
            .and_then(|index| self.pages.get(index))
            .map(|page| page.clone() as Arc<dyn EnginePage>)
            .ok_or_else(|| EngineError::Raster(format!("no page {number}")))
    }
}

struct ScriptedPage {
    document: String,
    number: usize,
    size: PageSize,
    script: Arc<Script>,
    probe: Arc<EngineProbe>,
}

#[async_trait]
impl EnginePage for ScriptedPage {
    fn size(&self) -> PageSize {
        self.size
    }

    async fn render(
        &self,
        viewport: Viewport,
        cancel: CancellationToken,
    ) -> std::result::Result<RgbaImage, EngineError> {
        let record = RenderRecord {
            document: self.document.clone(),
            page: self.number,
            viewport,
        };
        let _active = self.probe.begin(record.clone());

        if let Some(delay) = self.script.render_delay {
            if self.script.ignore_cancel {
                tokio::time::sleep(delay).await;
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        if self.script.panicking.contains(&self.number) {
            panic!("scripted panic on page {}", self.number);
        }
        if self.script.failing.contains(&self.number) {
            return Err(EngineError::Raster(format!(
                "scripted failure on page {}",
                self.number
            )));
        }

        self.probe.complete(record);
        let shade = (self.number.min(255)) as u8;
        Ok(RgbaImage::from_pixel(
            viewport.width,
            viewport.height,
            Rgba([shade, 0, 0, 255]),
        ))
    }
}

/// Loader over `source` with `engine` already ready.
pub fn loader(source: StaticSource, engine: &ScriptedEngine) -> DocumentLoader {
    DocumentLoader::new(
        Arc::new(source),
        EngineReady::immediate(Arc::new(engine.clone())),
    )
}

/// Opens a scripted A4 document of `pages` pages through `engine`.
pub async fn open_scripted(
    engine: &ScriptedEngine,
    url: &str,
    pages: usize,
) -> Result<DocumentSession> {
    loader(StaticSource::new().with_document(url, pages), engine)
        .open(url)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_round_trip_keeps_labels_with_colons() {
        let bytes = scripted_bytes("mem://a", &[(10, 20), (30, 40)]);
        let (label, pages) = parse_script(&bytes).unwrap();
        assert_eq!(label, "mem://a");
        assert_eq!(pages, vec![PageSize::new(10.0, 20.0), PageSize::new(30.0, 40.0)]);
        assert_eq!(parse_script(b"scripted:empty:").unwrap().1.len(), 0);
        assert!(parse_script(b"%PDF-1.7").is_none());
    }
}
