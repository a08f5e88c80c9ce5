//! Headless model of the viewer's scrollable page column.

use super::visibility::{Rect, most_visible_page};

/// Size of a surface that has not been rendered yet (an unsized canvas).
pub const UNSIZED_SURFACE: (u32, u32) = (300, 150);

/// Visible size of the scroll container reported by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerSize {
    pub width: f32,
    pub height: f32,
}

impl ContainerSize {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Pages stacked top to bottom, horizontally centred, with a uniform gap and
/// padding above the first and below the last page.
#[derive(Debug, Clone)]
pub struct ScrollColumn {
    container: ContainerSize,
    padding: f32,
    gap: f32,
    sizes: Vec<(u32, u32)>,
    scroll_top: f32,
}

impl ScrollColumn {
    pub fn new(page_count: usize, container: ContainerSize, padding: f32, gap: f32) -> Self {
        Self {
            container,
            padding: padding.max(0.0),
            gap: gap.max(0.0),
            sizes: vec![UNSIZED_SURFACE; page_count],
            scroll_top: 0.0,
        }
    }

    pub fn page_count(&self) -> usize {
        self.sizes.len()
    }

    pub fn container(&self) -> ContainerSize {
        self.container
    }

    pub fn set_container(&mut self, container: ContainerSize) {
        self.container = container;
        self.scroll_top = self.scroll_top.clamp(0.0, self.max_scroll());
    }

    /// Records the rendered size of a 1-based page. Out-of-range pages are ignored.
    pub fn set_page_size(&mut self, page: usize, width: u32, height: u32) {
        if let Some(slot) = page.checked_sub(1).and_then(|i| self.sizes.get_mut(i)) {
            *slot = (width, height);
        }
    }

    pub fn surface_rects(&self) -> Vec<Rect> {
        let mut y = self.padding;
        self.sizes
            .iter()
            .map(|&(w, h)| {
                let (w, h) = (w as f32, h as f32);
                let x = ((self.container.width - w) / 2.0).max(0.0);
                let rect = Rect::new(x, y, w, h);
                y += h + self.gap;
                rect
            })
            .collect()
    }

    pub fn content_height(&self) -> f32 {
        let pages: f32 = self.sizes.iter().map(|&(_, h)| h as f32).sum();
        let gaps = self.gap * self.sizes.len().saturating_sub(1) as f32;
        self.padding * 2.0 + pages + gaps
    }

    pub fn max_scroll(&self) -> f32 {
        (self.content_height() - self.container.height).max(0.0)
    }

    pub fn scroll_top(&self) -> f32 {
        self.scroll_top
    }

    /// Sets the scroll offset, clamped to the scrollable range.
    pub fn set_scroll(&mut self, offset: f32) {
        let offset = if offset.is_finite() { offset } else { 0.0 };
        self.scroll_top = offset.clamp(0.0, self.max_scroll());
    }

    /// The container's visible rectangle in content coordinates.
    pub fn container_rect(&self) -> Rect {
        Rect::new(
            0.0,
            self.scroll_top,
            self.container.width,
            self.container.height,
        )
    }

    /// Aligns the top of a 1-based page with the top of the container, as far
    /// as the scroll range allows. Returns false for pages outside the column.
    pub fn scroll_into_view(&mut self, page: usize) -> bool {
        let rects = self.surface_rects();
        match page.checked_sub(1).and_then(|i| rects.get(i)) {
            Some(rect) => {
                self.set_scroll(rect.top());
                true
            }
            None => false,
        }
    }

    pub fn most_visible_page(&self, current: usize) -> usize {
        most_visible_page(&self.surface_rects(), self.container_rect(), current)
    }
}
