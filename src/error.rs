use thiserror::Error;

/// Library error type for the render pipeline.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The document bytes could not be fetched (network failure or non-success status).
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The engine rejected the bytes as not an openable document.
    #[error("document could not be opened: {0}")]
    Parse(String),

    /// A page outside `[1, page_count]` was requested.
    #[error("page {page} is out of range (document has {page_count} pages)")]
    PageRange { page: usize, page_count: usize },

    /// Rasterizing a single page failed.
    #[error("page {page} failed to render: {reason}")]
    Render { page: usize, reason: String },

    /// The rendering engine never became ready.
    #[error("rendering engine unavailable: {0}")]
    EngineUnavailable(String),
}

impl Error {
    /// Terminal errors fail the whole controller; the rest are local to one page.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::Parse(_) | Self::EngineUnavailable(_)
        )
    }

    pub(crate) fn fetch(url: &str, reason: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors reported by a [`crate::engine::DocumentEngine`] implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The bytes are corrupt or in a format the engine does not parse.
    #[error("{0}")]
    Rejected(String),

    /// Rasterization of a page failed.
    #[error("{0}")]
    Raster(String),

    /// The in-flight raster task observed its cancellation token.
    #[error("render cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(Error::fetch("http://x", "404").is_terminal());
        assert!(Error::Parse("bad".into()).is_terminal());
        assert!(Error::EngineUnavailable("gone".into()).is_terminal());
        assert!(
            !Error::Render {
                page: 3,
                reason: "boom".into()
            }
            .is_terminal()
        );
        assert!(
            !Error::PageRange {
                page: 9,
                page_count: 2
            }
            .is_terminal()
        );
    }
}
