use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};

use image::{ImageFormat, RgbaImage};

use crate::layout::viewport::Viewport;

/// An RGBA drawing target owned by one controller.
///
/// Cloning yields another handle to the same target; the host reads it through
/// [`Surface::snapshot`].
#[derive(Clone, Default)]
pub struct Surface {
    inner: Arc<Mutex<SurfaceState>>,
}

#[derive(Default)]
struct SurfaceState {
    raster: Option<RgbaImage>,
    viewport: Option<Viewport>,
    presentations: u64,
}

/// Copy of a surface's current contents.
#[derive(Debug, Clone)]
pub struct SurfaceSnapshot {
    pub viewport: Viewport,
    pub pixels: RgbaImage,
    pub presentations: u64,
}

impl SurfaceSnapshot {
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut out = Cursor::new(Vec::new());
        self.pixels.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }
}

impl Surface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the surface to `viewport` and draws `raster` into it.
    pub fn present(&self, raster: RgbaImage, viewport: Viewport) {
        let raster = if raster.dimensions() == (viewport.width, viewport.height) {
            raster
        } else {
            let mut canvas = RgbaImage::new(viewport.width, viewport.height);
            image::imageops::replace(&mut canvas, &raster, 0, 0);
            canvas
        };
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.raster = Some(raster);
        state.viewport = Some(viewport);
        state.presentations += 1;
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.raster = None;
        state.viewport = None;
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .viewport
    }

    /// Number of times a raster has been drawn to this surface.
    pub fn presentations(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .presentations
    }

    pub fn snapshot(&self) -> Option<SurfaceSnapshot> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match (&state.raster, state.viewport) {
            (Some(pixels), Some(viewport)) => Some(SurfaceSnapshot {
                viewport,
                pixels: pixels.clone(),
                presentations: state.presentations,
            }),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("viewport", &self.viewport())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn present_sizes_to_viewport() {
        let surface = Surface::new();
        assert!(surface.snapshot().is_none());

        let viewport = Viewport {
            width: 6,
            height: 4,
            scale: 2.0,
        };
        surface.present(RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255])), viewport);
        let snap = surface.snapshot().unwrap();
        assert_eq!(snap.pixels.dimensions(), (6, 4));
        assert_eq!(snap.pixels.get_pixel(0, 0), &Rgba([1, 2, 3, 255]));
        assert_eq!(snap.pixels.get_pixel(5, 3), &Rgba([0, 0, 0, 0]));
        assert_eq!(snap.presentations, 1);
        assert!(snap.to_png().unwrap().starts_with(b"\x89PNG"));
    }

    #[test]
    fn clones_share_the_target() {
        let surface = Surface::new();
        let host_view = surface.clone();
        let viewport = Viewport {
            width: 1,
            height: 1,
            scale: 1.0,
        };
        surface.present(RgbaImage::new(1, 1), viewport);
        assert_eq!(host_view.viewport(), Some(viewport));
        host_view.clear();
        assert!(surface.snapshot().is_none());
        assert_eq!(surface.presentations(), 1);
    }
}
