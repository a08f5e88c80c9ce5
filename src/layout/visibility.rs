/// Axis-aligned rectangle in content coordinates (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Height of the vertical overlap with `other`, zero when disjoint.
    pub fn vertical_overlap(&self, other: &Rect) -> f32 {
        let top = self.top().max(other.top());
        let bottom = self.bottom().min(other.bottom());
        (bottom - top).max(0.0)
    }

    /// True when this rectangle lies vertically inside `other`.
    pub fn within_vertically(&self, other: &Rect) -> bool {
        self.top() >= other.top() && self.bottom() <= other.bottom()
    }
}

/// Returns the 1-based number of the page whose surface shows the most area
/// inside `container`.
///
/// Layout is a single vertical column, so only the vertical intersection is
/// measured (times the surface width). Equal areas resolve to the lower page.
/// When nothing overlaps, `current` is returned unchanged.
pub fn most_visible_page(surfaces: &[Rect], container: Rect, current: usize) -> usize {
    let mut best_page = current;
    let mut best_area = 0.0_f32;
    for (index, rect) in surfaces.iter().enumerate() {
        let area = rect.vertical_overlap(&container) * rect.width.max(0.0);
        if area > best_area {
            best_area = area;
            best_page = index + 1;
        }
    }
    best_page
}
