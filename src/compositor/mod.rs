//! Redirection, damage and surface lifetimes.

use std::fmt;
use std::num::NonZeroU64;

use crate::protocol::{Extensions, Window};
use crate::utils::id::IdCounter;

pub mod pixmap;
pub mod redirect;
pub mod surfaces;

pub use pixmap::Pixmap;
pub use redirect::{RedirectState, Redirection};
pub use surfaces::{CompositeSurface, SurfaceCache};

static VIEW_ID_COUNTER: IdCounter = IdCounter::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(NonZeroU64);

impl ViewId {
    fn next() -> ViewId {
        ViewId(VIEW_ID_COUNTER.next())
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    #[cfg(test)]
    pub(crate) fn from_raw(id: u64) -> ViewId {
        ViewId(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
    }
}

/// A consumer's lease on a window's contents and its own damage accumulator.
///
/// Only a handle: the damage lives with the window's proxy and is looked up on use. Give it
/// back with [`State::destroy_view`](crate::state::State::destroy_view).
#[derive(PartialEq, Eq, Hash)]
pub struct View {
    id: ViewId,
    window: Window,
}

impl View {
    pub(crate) fn new(window: Window) -> Self {
        Self {
            id: ViewId::next(),
            window,
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn window(&self) -> Window {
        self.window
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("id", &self.id.get())
            .field("window", &format_args!("{:#x}", self.window))
            .finish()
    }
}

/// Global compositing switch plus the surfaces kept for rendering.
#[derive(Debug, Default)]
pub struct Compositor {
    supported: bool,
    enabled: bool,
    pub surfaces: SurfaceCache,
}

impl Compositor {
    pub fn new(extensions: &Extensions) -> Self {
        Self {
            supported: extensions.can_composite(),
            enabled: false,
            surfaces: SurfaceCache::default(),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turns compositing on. Returns whether anything changed.
    pub fn enable(&mut self) -> bool {
        if !self.supported {
            warn!("compositing is not supported by the X server");
            return false;
        }
        !std::mem::replace(&mut self.enabled, true)
    }

    /// Turns compositing off. Returns whether anything changed.
    pub fn disable(&mut self) -> bool {
        std::mem::replace(&mut self.enabled, false)
    }
}
