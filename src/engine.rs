//! The rendering engine capability.
//!
//! The engine is a black box that parses document bytes and rasterizes pages.
//! It is not reentrant: every page lookup and rasterization goes through the
//! [`crate::render::queue::RenderQueue`].

pub mod image;
pub mod ready;

use std::sync::Arc;

use ::image::RgbaImage;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::layout::viewport::{PageSize, Viewport};

pub use ready::{EngineInit, EngineReady, engine_ready};

/// Parses document bytes into an [`EngineDocument`].
#[async_trait]
pub trait DocumentEngine: Send + Sync {
    async fn open(&self, bytes: Vec<u8>) -> Result<Arc<dyn EngineDocument>, EngineError>;
}

/// A parsed document.
#[async_trait]
pub trait EngineDocument: Send + Sync {
    fn page_count(&self) -> usize;

    /// Returns a 1-based page. Callers validate the range first.
    async fn page(&self, number: usize) -> Result<Arc<dyn EnginePage>, EngineError>;
}

/// One page of a parsed document.
#[async_trait]
pub trait EnginePage: Send + Sync {
    /// Intrinsic size at scale 1.
    fn size(&self) -> PageSize;

    /// Rasterizes the page at `viewport`. Implementations should return
    /// [`EngineError::Cancelled`] promptly once `cancel` fires.
    async fn render(
        &self,
        viewport: Viewport,
        cancel: CancellationToken,
    ) -> Result<RgbaImage, EngineError>;
}
