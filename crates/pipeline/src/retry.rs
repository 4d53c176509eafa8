//! Restart backoff
//!
//! Translates a section's `RetryOptions` into a sequence of delays:
//! exponential doubling from `delay` up to `max_delay`, bounded by
//! `max_retries` (-1 retries forever, 0 means a single attempt with no
//! restart).

use std::time::Duration;

use relay_config::RetryOptions;

/// Stateful backoff for one runner's restart loop
#[derive(Debug)]
pub struct Backoff {
    next: Duration,
    max_delay: Duration,
    max_retries: i32,
    attempts: u32,
}

impl Backoff {
    /// Build a backoff from a section's retry options
    pub fn new(options: &RetryOptions) -> Self {
        Self {
            next: options.delay,
            max_delay: options.max_delay,
            max_retries: options.max_retries,
            attempts: 0,
        }
    }

    /// Delay to sleep before the next restart attempt, or `None` when
    /// retries are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_retries >= 0 && self.attempts >= self.max_retries as u32 {
            return None;
        }
        self.attempts += 1;
        let delay = self.next;
        self.next = (self.next * 2).min(self.max_delay);
        Some(delay)
    }

    /// Number of restart attempts handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start over after a healthy run
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next = self.next.min(self.max_delay);
    }
}
