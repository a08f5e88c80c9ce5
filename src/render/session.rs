use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::engine::{EngineDocument, EnginePage, EngineReady};
use crate::error::{EngineError, Error, Result};
use crate::fetch::ByteSource;

/// Fetches document bytes and opens them with the engine once it is ready.
#[derive(Clone)]
pub struct DocumentLoader {
    source: Arc<dyn ByteSource>,
    engine: EngineReady,
}

impl DocumentLoader {
    pub fn new(source: Arc<dyn ByteSource>, engine: EngineReady) -> Self {
        Self { source, engine }
    }

    pub fn engine(&self) -> &EngineReady {
        &self.engine
    }

    /// Fetches and parses `url` in one step.
    pub async fn open(&self, url: &str) -> Result<DocumentSession> {
        let bytes = self.fetch(url).await?;
        self.parse(url, bytes).await
    }

    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        match self.source.fetch(url).await {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                warn!(error = %err, "document fetch failed");
                Err(err)
            }
        }
    }

    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub async fn parse(&self, url: &str, bytes: Vec<u8>) -> Result<DocumentSession> {
        let engine = self.engine.wait().await?;
        let document = engine.open(bytes).await.map_err(|err| {
            warn!(error = %err, "engine rejected document");
            Error::Parse(err.to_string())
        })?;
        let page_count = document.page_count();
        if page_count == 0 {
            return Err(Error::Parse("document has no pages".into()));
        }
        info!(page_count, "document opened");
        Ok(DocumentSession {
            source: Arc::from(url),
            document,
            page_count,
        })
    }
}

/// An opened document. Only exists once parsing succeeded, so the page count
/// is always valid.
#[derive(Clone)]
pub struct DocumentSession {
    source: Arc<str>,
    document: Arc<dyn EngineDocument>,
    page_count: usize,
}

impl DocumentSession {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Returns a 1-based page, or [`Error::PageRange`] outside `[1, page_count]`.
    pub async fn page(&self, number: usize) -> Result<Arc<dyn EnginePage>> {
        if number == 0 || number > self.page_count {
            return Err(Error::PageRange {
                page: number,
                page_count: self.page_count,
            });
        }
        debug!(page = number, "resolving page");
        self.document
            .page(number)
            .await
            .map_err(|err| match err {
                EngineError::Cancelled => Error::Render {
                    page: number,
                    reason: "page lookup cancelled".into(),
                },
                other => Error::Render {
                    page: number,
                    reason: other.to_string(),
                },
            })
    }
}

impl fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSession")
            .field("source", &self.source)
            .field("page_count", &self.page_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::engine_ready;
    use crate::testkit::{ScriptedEngine, StaticSource};

    fn loader(source: StaticSource, engine: ScriptedEngine) -> DocumentLoader {
        DocumentLoader::new(Arc::new(source), EngineReady::immediate(Arc::new(engine)))
    }

    #[tokio::test]
    async fn opens_document_and_reports_pages() {
        let source = StaticSource::new().with_document("mem://a", 4);
        let session = loader(source, ScriptedEngine::new())
            .open("mem://a")
            .await
            .unwrap();
        assert_eq!(session.source(), "mem://a");
        assert_eq!(session.page_count(), 4);
        assert!(session.page(1).await.is_ok());
        assert!(session.page(4).await.is_ok());
    }

    #[tokio::test]
    async fn out_of_range_pages_are_rejected() {
        let source = StaticSource::new().with_document("mem://a", 2);
        let session = loader(source, ScriptedEngine::new())
            .open("mem://a")
            .await
            .unwrap();
        for page in [0, 3, 100] {
            match session.page(page).await {
                Err(Error::PageRange {
                    page: p,
                    page_count,
                }) => {
                    assert_eq!(p, page);
                    assert_eq!(page_count, 2);
                }
                _ => panic!("page {page} should be out of range"),
            }
        }
    }

    #[tokio::test]
    async fn missing_document_is_fetch_error() {
        let err = loader(StaticSource::new(), ScriptedEngine::new())
            .open("mem://missing")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[tokio::test]
    async fn corrupt_bytes_are_parse_error() {
        let source = StaticSource::new().with_bytes("mem://bad", b"not a document".to_vec());
        let err = loader(source, ScriptedEngine::new())
            .open("mem://bad")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn zero_page_document_is_parse_error() {
        let source = StaticSource::new().with_document("mem://empty", 0);
        let err = loader(source, ScriptedEngine::new())
            .open("mem://empty")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn parse_waits_for_engine_ready() {
        let (init, ready) = engine_ready();
        let source = StaticSource::new().with_document("mem://a", 1);
        let loader = DocumentLoader::new(Arc::new(source), ready);
        let pending = tokio::spawn({
            let loader = loader.clone();
            async move { loader.open("mem://a").await.map(|s| s.page_count()) }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        init.ready(Arc::new(ScriptedEngine::new()));
        assert_eq!(pending.await.unwrap().unwrap(), 1);
    }
}
