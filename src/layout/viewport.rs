//! Per-page render sizing.
//!
//! Portrait pages render at the user zoom. Landscape pages may grow to fill
//! the container width, up to 1.5x the requested zoom, so wide pages keep a
//! usable height on narrow displays.

pub const MIN_ZOOM: f32 = 1.0;
pub const MAX_ZOOM: f32 = 4.0;
pub const ZOOM_STEP: f32 = 0.25;
pub const LANDSCAPE_BOOST: f32 = 1.5;
pub const DEFAULT_LANDSCAPE_PADDING: f32 = 80.0;

/// Intrinsic page dimensions at scale 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }

    fn sanitized(self) -> Self {
        let clean = |v: f32| if v.is_finite() && v > 0.0 { v } else { 1.0 };
        Self {
            width: clean(self.width),
            height: clean(self.height),
        }
    }
}

/// Device-pixel dimensions a page is rasterized at, plus the scale that produced them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub scale: f32,
}

impl Viewport {
    /// Viewport for `page` at exactly `scale`, without zoom clamping.
    pub fn at_scale(page: PageSize, scale: f32) -> Self {
        let page = page.sanitized();
        let scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        };
        Self {
            width: pixels(page.width * scale),
            height: pixels(page.height * scale),
            scale,
        }
    }
}

fn pixels(extent: f32) -> u32 {
    // absorb float error from scale = width / page_width round trips
    (extent + 1e-3).floor().max(1.0) as u32
}

/// User zoom factor, always within `[MIN_ZOOM, MAX_ZOOM]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Zoom(f32);

impl Zoom {
    pub fn new(value: f32) -> Self {
        if !value.is_finite() {
            return Self(MIN_ZOOM);
        }
        Self(value.clamp(MIN_ZOOM, MAX_ZOOM))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    pub fn step_in(self) -> Self {
        Self::new(self.0 + ZOOM_STEP)
    }

    pub fn step_out(self) -> Self {
        Self::new(self.0 - ZOOM_STEP)
    }

    /// Zoom as a whole percentage, for indicators.
    pub fn percent(self) -> u32 {
        (self.0 * 100.0).round() as u32
    }
}

impl Default for Zoom {
    fn default() -> Self {
        Self(1.8)
    }
}

/// Inputs a render job needs to derive its viewport once the page size is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sizing {
    /// Fixed scale, used for thumbnails.
    Fixed(f32),
    /// Fit to the viewer's container at the given zoom.
    Fit {
        container_width: f32,
        zoom: Zoom,
        padding: f32,
    },
}

impl Sizing {
    pub fn viewport_for(&self, page: PageSize) -> Viewport {
        match *self {
            Self::Fixed(scale) => Viewport::at_scale(page, scale),
            Self::Fit {
                container_width,
                zoom,
                padding,
            } => compute_viewport_padded(container_width, page.width, page.height, zoom, padding),
        }
    }
}

/// Computes the viewport for one page using the default landscape padding.
pub fn compute_viewport(
    container_width: f32,
    page_width: f32,
    page_height: f32,
    zoom: Zoom,
) -> Viewport {
    compute_viewport_padded(
        container_width,
        page_width,
        page_height,
        zoom,
        DEFAULT_LANDSCAPE_PADDING,
    )
}

pub fn compute_viewport_padded(
    container_width: f32,
    page_width: f32,
    page_height: f32,
    zoom: Zoom,
    padding: f32,
) -> Viewport {
    let page = PageSize::new(page_width, page_height).sanitized();
    let zoom = zoom.value();
    let available = container_width - padding.max(0.0);

    let scale = if page.is_landscape() && available.is_finite() && available > 0.0 {
        available.min(zoom * LANDSCAPE_BOOST * page.width) / page.width
    } else {
        zoom
    };
    Viewport::at_scale(page, scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A4: PageSize = PageSize {
        width: 595.0,
        height: 842.0,
    };

    #[test]
    fn portrait_uses_zoom() {
        let vp = compute_viewport(1000.0, A4.width, A4.height, Zoom::new(2.0));
        assert!((vp.scale - 2.0).abs() < f32::EPSILON);
        assert_eq!((vp.width, vp.height), (1190, 1684));
    }

    #[test]
    fn landscape_fills_available_width() {
        // available = 1000 - 80 = 920; boost cap = 1.0 * 1.5 * 842 = 1263
        let vp = compute_viewport(1000.0, 842.0, 595.0, Zoom::new(1.0));
        assert!((vp.scale - 920.0 / 842.0).abs() < 1e-5);
        assert_eq!(vp.width, 920);
    }

    #[test]
    fn landscape_capped_by_boost() {
        // available = 3920; cap = 1.0 * 1.5 * 842 = 1263
        let vp = compute_viewport(4000.0, 842.0, 595.0, Zoom::new(1.0));
        assert!((vp.scale - 1.5).abs() < 1e-5);
        assert_eq!(vp.width, 1263);
    }

    #[test]
    fn landscape_in_tiny_container_falls_back_to_zoom() {
        let vp = compute_viewport(40.0, 842.0, 595.0, Zoom::new(1.25));
        assert!((vp.scale - 1.25).abs() < f32::EPSILON);
    }

    #[test]
    fn zoom_is_clamped_and_stepped() {
        assert_eq!(Zoom::new(0.2).value(), MIN_ZOOM);
        assert_eq!(Zoom::new(9.0).value(), MAX_ZOOM);
        assert_eq!(Zoom::new(f32::NAN).value(), MIN_ZOOM);
        assert_eq!(Zoom::new(1.0).step_in().value(), 1.25);
        assert_eq!(Zoom::new(1.0).step_out().value(), 1.0);
        assert_eq!(Zoom::new(4.0).step_in().value(), 4.0);
        assert_eq!(Zoom::default().percent(), 180);
    }

    #[test]
    fn portrait_scale_is_monotonic_in_zoom() {
        let mut previous: Option<Viewport> = None;
        let mut z = MIN_ZOOM;
        while z <= MAX_ZOOM {
            let vp = compute_viewport(800.0, A4.width, A4.height, Zoom::new(z));
            if let Some(prev) = previous {
                assert!(vp.scale > prev.scale, "scale regressed at zoom {z}");
                assert!(vp.height >= prev.height);
            }
            previous = Some(vp);
            z += 0.05;
        }
    }

    #[test]
    fn degenerate_page_sizes_do_not_panic() {
        let vp = compute_viewport(800.0, 0.0, f32::NAN, Zoom::new(1.0));
        assert_eq!((vp.width, vp.height), (1, 1));
        let fixed = Sizing::Fixed(0.3).viewport_for(PageSize::new(100.0, 200.0));
        assert_eq!((fixed.width, fixed.height), (30, 60));
    }
}
