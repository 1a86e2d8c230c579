use std::time::Duration;
use tokio::time::Instant;

/// Fixed-step time keeping for the session loop.
///
/// Wall-clock time is accumulated on every loop pass, and it is consumed in chunks of exactly one
///  tick interval. If the loop falls behind, several ticks become due at once, so simulation time
///  stays in step with wall-clock time regardless of how often the loop actually runs.
///
/// The timer starts with an empty accumulator at the moment it is created; the first tick is due
///  one interval later.
pub struct TickTimer {
    tick_interval: Duration,
    accumulator: Duration,
    last_advance: Instant,
}

impl TickTimer {
    pub fn new(tick_interval: Duration) -> TickTimer {
        assert!(!tick_interval.is_zero(), "tick interval must not be zero");

        TickTimer {
            tick_interval,
            accumulator: Duration::ZERO,
            last_advance: Instant::now(),
        }
    }

    /// adds the time that passed since the previous call and returns it
    pub fn advance(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_advance);
        self.last_advance = now;
        self.accumulator += elapsed;
        elapsed
    }

    /// consumes one tick interval from the accumulated time if enough time has accumulated
    pub fn try_consume_tick(&mut self) -> bool {
        if self.accumulator >= self.tick_interval {
            self.accumulator -= self.tick_interval;
            true
        }
        else {
            false
        }
    }

    pub fn until_next_tick(&self) -> Duration {
        self.tick_interval.saturating_sub(self.accumulator)
    }

    pub fn next_tick_deadline(&self) -> Instant {
        self.last_advance + self.until_next_tick()
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }
}
