use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;
use crate::layout::viewport::{Sizing, Viewport};
use crate::render::session::DocumentSession;
use crate::render::surface::Surface;

/// Unique identifier for a submitted render job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Identifies the controller that submitted a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OwnerId(pub u64);

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

impl OwnerId {
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// A request to rasterize one page of one session onto one surface.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub owner: OwnerId,
    pub session: DocumentSession,
    /// 1-based page number.
    pub page: usize,
    pub surface: Surface,
    pub sizing: Sizing,
}

/// How a job settled.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The page was drawn to its surface at this viewport.
    Rendered(Viewport),
    /// Superseded before or during execution; nothing was drawn.
    Cancelled,
    Failed(Error),
}

impl JobOutcome {
    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
