use std::num::NonZeroU64;
use std::time::Duration;

use crate::clock::Clock;

pub const DEFAULT_REFRESH_RATE: u32 = 60;

/// Schedules repaint ticks on a fixed grid so that a late tick does not shift all later ones.
#[derive(Debug)]
pub struct FrameClock {
    clock: Clock,
    last_tick_time: Option<Duration>,
    refresh_interval_ns: NonZeroU64,
}

impl FrameClock {
    pub fn new(clock: Clock, refresh_rate: u32) -> Self {
        let refresh_rate = u64::from(refresh_rate.max(1));
        let refresh_interval_ns =
            NonZeroU64::new(1_000_000_000 / refresh_rate).unwrap_or(NonZeroU64::MIN);

        Self {
            clock,
            last_tick_time: None,
            refresh_interval_ns,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_nanos(self.refresh_interval_ns.get())
    }

    /// Records that a tick ran at `time`.
    pub fn ticked(&mut self, time: Duration) {
        self.last_tick_time = Some(time);
    }

    pub fn next_tick_time(&self) -> Duration {
        let mut now = self.clock.now();

        let Some(last_tick_time) = self.last_tick_time else {
            return now;
        };

        let refresh_interval_ns = self.refresh_interval_ns.get();

        if now < last_tick_time {
            // The clock went backwards.
            error!(?now, ?last_tick_time, "last tick is in the future");
            now = last_tick_time;
        }

        let since_last = now - last_tick_time;
        let since_last_ns =
            since_last.as_secs() * 1_000_000_000 + u64::from(since_last.subsec_nanos());
        let to_next_ns = (since_last_ns / refresh_interval_ns + 1) * refresh_interval_ns;

        last_tick_time + Duration::from_nanos(to_next_ns)
    }

    /// How long until the next tick is due.
    pub fn time_to_next_tick(&self) -> Duration {
        self.next_tick_time().saturating_sub(self.clock.now())
    }
}
