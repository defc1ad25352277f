use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::utils::get_monotonic_time;

/// Shareable clock used for protocol deadlines.
///
/// A default clock follows the monotonic system time. A clock created with [`Clock::with_time`]
/// is frozen: it only moves when explicitly set or advanced, which is what the headless backend
/// uses to run timeouts without sleeping.
#[derive(Debug, Default, Clone)]
pub struct Clock {
    inner: Rc<RefCell<LazyClock>>,
}

#[derive(Debug, Default)]
struct LazyClock {
    time: Option<Duration>,
}

impl Clock {
    /// Creates a new frozen clock with the given time.
    pub fn with_time(time: Duration) -> Self {
        Self {
            inner: Rc::new(RefCell::new(LazyClock::with_time(time))),
        }
    }

    /// Returns the current time.
    pub fn now(&self) -> Duration {
        self.inner.borrow().now()
    }

    /// Returns whether the clock only moves when told to.
    pub fn is_frozen(&self) -> bool {
        self.inner.borrow().time.is_some()
    }

    /// Sets the clock time, freezing it.
    pub fn set(&self, time: Duration) {
        self.inner.borrow_mut().set(time);
    }

    /// Moves a frozen clock forward. Does nothing for a live clock.
    pub fn advance(&self, by: Duration) {
        let mut inner = self.inner.borrow_mut();
        if let Some(time) = inner.time.as_mut() {
            *time = time.saturating_add(by);
        }
    }

    /// Unfreezes the clock so it follows the system time again.
    pub fn clear(&self) {
        self.inner.borrow_mut().clear();
    }
}

impl PartialEq for Clock {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Clock {}

impl LazyClock {
    fn with_time(time: Duration) -> Self {
        Self { time: Some(time) }
    }

    fn clear(&mut self) {
        self.time = None;
    }

    fn set(&mut self, time: Duration) {
        self.time = Some(time);
    }

    fn now(&self) -> Duration {
        self.time.unwrap_or_else(get_monotonic_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_clock() {
        let clock = Clock::with_time(Duration::ZERO);
        assert!(clock.is_frozen());
        assert_eq!(clock.now(), Duration::ZERO);

        clock.set(Duration::from_millis(100));
        assert_eq!(clock.now(), Duration::from_millis(100));

        clock.advance(Duration::from_millis(150));
        assert_eq!(clock.now(), Duration::from_millis(250));
    }

    #[test]
    fn clones_share_time() {
        let clock = Clock::with_time(Duration::from_secs(1));
        let other = clock.clone();
        other.advance(Duration::from_secs(2));
        assert_eq!(clock.now(), Duration::from_secs(3));
        assert_eq!(clock, other);
    }

    #[test]
    fn live_clock_ignores_advance() {
        let clock = Clock::default();
        assert!(!clock.is_frozen());
        let before = clock.now();
        clock.advance(Duration::from_secs(3600));
        assert!(clock.now() < before + Duration::from_secs(3600));
    }
}
