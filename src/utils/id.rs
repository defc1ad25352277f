use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of process-unique ids for handles that must never be mistaken for one another, such as
/// two views of the same window.
pub struct IdCounter(AtomicU64);

impl IdCounter {
    pub const fn new() -> Self {
        // Zero is never handed out so ids fit in a NonZeroU64.
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> NonZeroU64 {
        let id = self.0.fetch_add(1, Ordering::Relaxed);
        NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN)
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}
