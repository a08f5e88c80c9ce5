//! Engine for raster image documents.
//!
//! A still image is a one-page document; an animated GIF is a document with
//! one page per frame.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use fast_image_resize as fir;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ImageFormat, RgbaImage};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DocumentEngine, EngineDocument, EnginePage};
use crate::error::EngineError;
use crate::layout::viewport::{PageSize, Viewport};

/// Largest raster a single page render may allocate (256 MiB of RGBA).
pub const MAX_RASTER_PIXELS: u64 = 64 * 1024 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct ImageEngine;

impl ImageEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentEngine for ImageEngine {
    async fn open(&self, bytes: Vec<u8>) -> Result<Arc<dyn EngineDocument>, EngineError> {
        let pages = tokio::task::spawn_blocking(move || decode_pages(&bytes))
            .await
            .map_err(|err| EngineError::Rejected(format!("decoder task failed: {err}")))??;
        debug!(pages = pages.len(), "image document decoded");
        let pages = pages
            .into_iter()
            .map(|image| Arc::new(ImagePage { image: Arc::new(image) }))
            .collect();
        Ok(Arc::new(ImageDocument { pages }))
    }
}

struct ImageDocument {
    pages: Vec<Arc<ImagePage>>,
}

#[async_trait]
impl EngineDocument for ImageDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    async fn page(&self, number: usize) -> Result<Arc<dyn EnginePage>, EngineError> {
        number
            .checked_sub(1)
            .and_then(|index| self.pages.get(index))
            .map(|page| page.clone() as Arc<dyn EnginePage>)
            .ok_or_else(|| EngineError::Raster(format!("no page {number}")))
    }
}

struct ImagePage {
    image: Arc<RgbaImage>,
}

#[async_trait]
impl EnginePage for ImagePage {
    fn size(&self) -> PageSize {
        PageSize::new(self.image.width() as f32, self.image.height() as f32)
    }

    async fn render(
        &self,
        viewport: Viewport,
        cancel: CancellationToken,
    ) -> Result<RgbaImage, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let source = self.image.clone();
        let resize = tokio::task::spawn_blocking(move || {
            resize_rgba(&source, viewport.width, viewport.height)
        });
        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            joined = resize => joined
                .map_err(|err| EngineError::Raster(format!("raster task failed: {err}")))?,
        }
    }
}

fn decode_pages(bytes: &[u8]) -> Result<Vec<RgbaImage>, EngineError> {
    let format = image::guess_format(bytes)
        .map_err(|err| EngineError::Rejected(format!("unrecognized document format: {err}")))?;

    let pages = if format == ImageFormat::Gif {
        let decoder = GifDecoder::new(Cursor::new(bytes))
            .map_err(|err| EngineError::Rejected(err.to_string()))?;
        decoder
            .into_frames()
            .collect_frames()
            .map_err(|err| EngineError::Rejected(err.to_string()))?
            .into_iter()
            .map(|frame| frame.into_buffer())
            .collect()
    } else {
        let image = image::load_from_memory_with_format(bytes, format)
            .map_err(|err| EngineError::Rejected(err.to_string()))?;
        vec![image.to_rgba8()]
    };

    if pages.is_empty() {
        return Err(EngineError::Rejected("document has no pages".into()));
    }
    Ok(pages)
}

fn resize_rgba(source: &RgbaImage, target_w: u32, target_h: u32) -> Result<RgbaImage, EngineError> {
    if target_w == 0 || target_h == 0 {
        return Err(EngineError::Raster("viewport dimensions must be positive".into()));
    }
    if u64::from(target_w) * u64::from(target_h) > MAX_RASTER_PIXELS {
        return Err(EngineError::Raster(format!(
            "viewport {target_w}x{target_h} exceeds the {MAX_RASTER_PIXELS} pixel raster cap"
        )));
    }
    if source.width() == target_w && source.height() == target_h {
        return Ok(source.clone());
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .map_err(|err| EngineError::Raster(format!("invalid source raster: {err}")))?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|err| EngineError::Raster(format!("resize failed: {err}")))?;
    RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| EngineError::Raster("resized buffer has unexpected length".into()))
}
