//! # Server Tick Loop
//!
//! Fixed-rate pacing for the simulation thread.
//!
//! ## Design
//!
//! A tick that overruns its budget delays the next one; ticks are never
//! skipped and never run in a catch-up burst:
//!
//! ```text
//!  deadline:  |----P----|----P----|----P----|
//!  on time:   [tick]    [tick]    [tick]
//!  overrun:   [tick········]▸[tick]    [tick]
//!                           ^ next deadline = max(deadline + P, now)
//! ```

use std::time::{Duration, Instant};

/// Fixed-rate tick loop controller.
#[derive(Debug)]
pub struct TickLoop {
    /// Target tick duration.
    tick_duration: Duration,
    /// When the next tick should start.
    next_deadline: Instant,
    /// Total ticks executed.
    tick_count: u64,
    /// Frame time statistics.
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickStats {
    /// Minimum tick duration observed.
    pub min_tick_us: u64,
    /// Maximum tick duration observed.
    pub max_tick_us: u64,
    /// Average tick duration (rolling).
    pub avg_tick_us: u64,
    /// Ticks that took longer than the budget and delayed the next one.
    pub late_ticks: u64,
    /// Total ticks measured.
    pub total_ticks: u64,
}

impl TickStats {
    fn new(budget: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: micros(budget),
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl TickLoop {
    /// Creates a tick loop running `tick_rate` times per second.
    ///
    /// A rate of zero is treated as one tick per second.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        Self {
            tick_duration,
            next_deadline: Instant::now(),
            tick_count: 0,
            stats: TickStats::new(tick_duration),
        }
    }

    /// Sleeps until the next tick is due. Returns at once if it is overdue.
    pub fn wait_for_next_tick(&self) {
        let now = Instant::now();
        if self.next_deadline > now {
            std::thread::sleep(self.next_deadline - now);
        }
    }

    /// Marks the start of a tick.
    ///
    /// Returns the tick start time for duration measurement.
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.tick_count += 1;
        Instant::now()
    }

    /// Marks the end of a tick, records its duration and schedules the next.
    pub fn end_tick(&mut self, start: Instant) {
        let duration = start.elapsed();
        let duration_us = micros(duration);

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(duration_us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(duration_us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + duration_us) / 16;

        if duration > self.tick_duration {
            self.stats.late_ticks += 1;
            tracing::warn!(
                tick = self.tick_count,
                duration_us,
                budget_us = micros(self.tick_duration),
                "tick overran its budget"
            );
        }

        self.next_deadline = (self.next_deadline + self.tick_duration).max(Instant::now());
    }

    /// Returns the number of ticks started.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Returns tick statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Returns the target tick duration.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Resets statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TickStats::new(self.tick_duration);
    }
}
