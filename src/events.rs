use crate::layout::column::ContainerSize;
use crate::layout::viewport::Viewport;

/// Lifecycle of a surface controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    /// Fetching document bytes.
    Loading,
    /// Waiting for the engine and parsing.
    Opening,
    /// Render jobs outstanding.
    Rendering,
    Ready,
    Failed { message: String },
}

impl Phase {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed { .. })
    }
}

/// What one page slot currently shows.
#[derive(Debug, Clone, PartialEq)]
pub enum PageView {
    Pending,
    Rendered(Viewport),
    Unavailable(String),
}

/// Keyboard navigation understood by the full viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    Previous,
    Next,
    First,
    Last,
    Close,
}

impl NavKey {
    /// Maps a DOM-style key name.
    pub fn from_key_name(name: &str) -> Option<Self> {
        match name {
            "ArrowLeft" | "ArrowUp" | "PageUp" => Some(Self::Previous),
            "ArrowRight" | "ArrowDown" | "PageDown" | " " | "Space" | "Spacebar" => Some(Self::Next),
            "Home" => Some(Self::First),
            "End" => Some(Self::Last),
            "Escape" | "Esc" => Some(Self::Close),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ViewerCommand {
    /// The host laid out the surfaces; rendering may begin.
    Attach(ContainerSize),
    Resize(ContainerSize),
    Scroll(f32),
    ZoomIn,
    ZoomOut,
    SetZoom(f32),
    /// Wheel delta; only zooms when `ctrl` is held.
    Wheel { delta_y: f32, ctrl: bool },
    GoTo(usize),
    Key(NavKey),
    /// Free-form page number typed by the user.
    Jump(String),
    SetSource(String),
    Close,
}

#[derive(Debug, Clone)]
pub enum ThumbnailCommand {
    Click,
    Delete,
    SetSource(String),
}
