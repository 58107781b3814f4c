//! # Tick Pacing
//!
//! Decides when [`crate::Controller::tick`] runs. Time comes from a
//! [`crate::Clock`] reading, so pacing is testable with a manual clock.
//!
//! ## Design
//!
//! ```text
//!   next_due ──┬── now < next_due ─► 0 ticks, idle_time() until due
//!              └── now >= next_due ─► 1 + missed periods (capped)
//! ```
//!
//! A stalled host does not produce a burst of catch-up ticks: at most
//! [`MAX_CATCH_UP_TICKS`] run, the rest are counted as skipped.

use std::time::Duration;

use crate::clock::Timestamp;

/// Most ticks run back to back after a stall.
pub const MAX_CATCH_UP_TICKS: u32 = 4;

/// Timing statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Ticks run.
    pub ticks: u64,
    /// Ticks whose work took longer than one period.
    pub overruns: u64,
    /// Owed ticks dropped by the catch-up cap.
    pub skipped: u64,
    /// Longest tick body.
    pub slowest_us: u64,
    /// Moving average of tick bodies.
    pub mean_us: u64,
}

/// Fixed-rate tick scheduler.
#[derive(Clone, Debug)]
pub struct TickLoop {
    period_ms: u64,
    next_due: Option<Timestamp>,
    stats: TickStats,
}

impl TickLoop {
    /// Scheduler for `tick_rate` ticks per second.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        Self {
            period_ms: (1000 / u64::from(tick_rate.max(1))).max(1),
            next_due: None,
            stats: TickStats::default(),
        }
    }

    /// Tick period.
    #[inline]
    #[must_use]
    pub const fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Number of ticks to run now. The first call always owes one.
    pub fn due_ticks(&mut self, now: Timestamp) -> u32 {
        let due = self.next_due.unwrap_or(now);
        if now < due {
            return 0;
        }

        let owed = now.millis_since(due) / self.period_ms + 1;
        let run = owed.min(u64::from(MAX_CATCH_UP_TICKS));
        if owed > run {
            self.stats.skipped += owed - run;
            tracing::debug!(skipped = owed - run, "tick backlog dropped");
        }
        self.next_due = Some(due.plus_millis(owed * self.period_ms));
        // Bounded by MAX_CATCH_UP_TICKS.
        u32::try_from(run).unwrap_or(MAX_CATCH_UP_TICKS)
    }

    /// Time left until the next tick is owed.
    #[must_use]
    pub fn idle_time(&self, now: Timestamp) -> Duration {
        self.next_due
            .map_or(Duration::ZERO, |due| Duration::from_millis(due.millis_since(now)))
    }

    /// Records how long one tick body took.
    pub fn record(&mut self, busy: Duration) {
        let busy_us = u64::try_from(busy.as_micros()).unwrap_or(u64::MAX);
        let overran = busy > self.period();
        let stats = &mut self.stats;

        stats.mean_us = if stats.ticks == 0 {
            busy_us
        } else {
            (stats.mean_us.saturating_mul(7).saturating_add(busy_us)) / 8
        };
        stats.ticks += 1;
        stats.slowest_us = stats.slowest_us.max(busy_us);

        if overran {
            stats.overruns += 1;
            tracing::debug!(busy_us, "tick overran its period");
        }
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::new(100)
    }
}
