//! Composite surfaces that outlive their windows.
//!
//! A render pass may already have queued a window's pixmap for painting when the window is
//! destroyed. The surface stays in the cache until every keeper has released it and the
//! window is known to be gone, whichever happens last.

use std::collections::HashMap;
use std::rc::Rc;

use super::pixmap::Pixmap;
use crate::protocol::Window;
use crate::utils::xid;

#[derive(Debug, Default)]
pub struct CompositeSurface {
    keep_count: u32,
    destroyed: bool,
    pixmap: Option<Rc<Pixmap>>,
}

impl CompositeSurface {
    pub fn keep_count(&self) -> u32 {
        self.keep_count
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Last good contents of the window.
    pub fn pixmap(&self) -> Option<&Rc<Pixmap>> {
        self.pixmap.as_ref()
    }

    fn is_evictable(&self) -> bool {
        self.keep_count == 0 && self.destroyed
    }
}

#[derive(Debug, Default)]
pub struct SurfaceCache {
    surfaces: HashMap<Window, CompositeSurface>,
}

impl SurfaceCache {
    pub fn get(&self, window: Window) -> Option<&CompositeSurface> {
        self.surfaces.get(&window)
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// Takes a reference on the surface of `window`, creating it on first use.
    ///
    /// A fresh `pixmap` replaces the stored one. Returns the new keep count.
    pub fn keep(&mut self, window: Window, pixmap: Option<Rc<Pixmap>>) -> u32 {
        let surface = self.surfaces.entry(window).or_default();
        surface.keep_count += 1;
        if pixmap.is_some() {
            surface.pixmap = pixmap;
        }
        trace!("keeping surface of {} ({})", xid(window), surface.keep_count);
        surface.keep_count
    }

    /// Drops a reference taken with [`SurfaceCache::keep`]. Returns whether the surface was
    /// evicted.
    pub fn release(&mut self, window: Window) -> bool {
        let Some(surface) = self.surfaces.get_mut(&window) else {
            warn!("releasing unknown surface of {}", xid(window));
            return false;
        };
        let Some(count) = surface.keep_count.checked_sub(1) else {
            warn!("surface of {} released more often than kept", xid(window));
            return false;
        };
        surface.keep_count = count;
        if count == 0 && !surface.destroyed {
            // Nobody needs the old contents of a live window.
            surface.pixmap = None;
        }
        self.evict_if_unused(window)
    }

    /// Records that the window is gone. The surface stays while anybody keeps it.
    pub fn on_window_destroyed(&mut self, window: Window) -> bool {
        let Some(surface) = self.surfaces.get_mut(&window) else {
            return false;
        };
        surface.destroyed = true;
        self.evict_if_unused(window)
    }

    fn evict_if_unused(&mut self, window: Window) -> bool {
        if !self.surfaces.get(&window).is_some_and(|s| s.is_evictable()) {
            return false;
        }
        debug!("evicting surface of {}", xid(window));
        self.surfaces.remove(&window);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    const W: Window = 0x40_0001;

    #[test]
    fn destroyed_surface_waits_for_last_release() {
        let mut cache = SurfaceCache::default();
        cache.keep(W, None);
        cache.keep(W, None);
        assert!(!cache.release(W));
        assert_eq!(cache.get(W).map(|s| s.keep_count()), Some(1));

        assert!(!cache.on_window_destroyed(W));
        assert!(cache.get(W).is_some_and(|s| s.is_destroyed()));

        assert!(cache.release(W));
        assert!(cache.get(W).is_none());
    }

    #[test]
    fn released_surface_of_live_window_stays_until_destroyed() {
        let mut cache = SurfaceCache::default();
        cache.keep(W, None);
        assert!(!cache.release(W));
        assert_eq!(cache.len(), 1);

        assert!(cache.on_window_destroyed(W));
        assert!(cache.is_empty());
    }

    #[test]
    fn pixmap_survives_window_until_released() {
        let reaper = Rc::new(RefCell::new(Vec::new()));
        let pixmap = Rc::new(Pixmap::new(0x77, (10, 10), 24, 0x21, Rc::downgrade(&reaper)));
        let mut cache = SurfaceCache::default();

        cache.keep(W, Some(pixmap));
        cache.on_window_destroyed(W);
        assert!(cache.get(W).and_then(|s| s.pixmap()).is_some());
        assert!(reaper.borrow().is_empty());

        cache.release(W);
        assert_eq!(*reaper.borrow(), [0x77]);
    }

    #[test]
    fn unbalanced_release_is_ignored() {
        let mut cache = SurfaceCache::default();
        assert!(!cache.release(W));

        cache.keep(W, None);
        cache.release(W);
        assert!(!cache.release(W));
        assert_eq!(cache.get(W).map(|s| s.keep_count()), Some(0));
    }
}
