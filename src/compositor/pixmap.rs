use std::cell::RefCell;
use std::fmt;
use std::rc::Weak;

use crate::protocol::{self, Visualid};

/// A server-side pixmap holding a snapshot of a redirected window.
///
/// Share it through `Rc`. When the last handle is dropped the pixmap id goes to the connection's
/// reaper and is freed on the next flush, however the handles were passed around.
pub struct Pixmap {
    id: protocol::Pixmap,
    width: i32,
    height: i32,
    depth: u8,
    visual: Visualid,
    reaper: Weak<RefCell<Vec<protocol::Pixmap>>>,
}

impl Pixmap {
    pub(crate) fn new(
        id: protocol::Pixmap,
        (width, height): (i32, i32),
        depth: u8,
        visual: Visualid,
        reaper: Weak<RefCell<Vec<protocol::Pixmap>>>,
    ) -> Self {
        Self {
            id,
            width,
            height,
            depth,
            visual,
            reaper,
        }
    }

    pub fn id(&self) -> protocol::Pixmap {
        self.id
    }

    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn visual(&self) -> Visualid {
        self.visual
    }
}

impl fmt::Debug for Pixmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pixmap")
            .field("id", &format_args!("{:#x}", self.id))
            .field("size", &(self.width, self.height))
            .field("depth", &self.depth)
            .finish()
    }
}

impl Drop for Pixmap {
    fn drop(&mut self) {
        // With the connection gone, so is the pixmap.
        if let Some(reaper) = self.reaper.upgrade() {
            reaper.borrow_mut().push(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    #[test]
    fn last_drop_queues_free() {
        let reaper = Rc::new(RefCell::new(Vec::new()));
        let pixmap = Rc::new(Pixmap::new(0x10, (64, 32), 24, 0x21, Rc::downgrade(&reaper)));
        let other = pixmap.clone();

        drop(pixmap);
        assert!(reaper.borrow().is_empty());

        drop(other);
        assert_eq!(*reaper.borrow(), [0x10]);
    }

    #[test]
    fn drop_after_connection_is_harmless() {
        let reaper = Rc::new(RefCell::new(Vec::new()));
        let pixmap = Pixmap::new(0x10, (1, 1), 24, 0x21, Rc::downgrade(&reaper));
        drop(reaper);
        drop(pixmap);
    }
}
