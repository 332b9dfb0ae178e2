use std::time::Duration;

/// Smallest delay handed out, so a zero setting cannot turn retries into a busy loop.
pub const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Exponential backoff between reconnection attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(MIN_BACKOFF);
        let initial = initial.clamp(MIN_BACKOFF, max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Delay before the next attempt; doubles on every call up to the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    /// Start over from the initial delay after a successful attempt.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}
