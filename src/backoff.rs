//! Wrapping binary backoff shared by component retries and role checks.
//!
//! The delay starts at one second and doubles on every failure. Once the
//! doubled value passes the ceiling the sequence restarts at one second
//! instead of saturating, so a ceiling of 3 yields `1, 2, 1, 2, ...` and a
//! ceiling of 32 yields `1, 2, 4, 8, 16, 32, 1, ...`.

use std::time::Duration;

/// Ceiling used by the client when the backend cannot be reached.
pub const ROLE_CHECK_CEILING_SECS: u64 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    current: u64,
    ceiling: u64,
}

impl Backoff {
    pub fn new(ceiling: u64) -> Self {
        Self {
            current: 0,
            ceiling: ceiling.max(1),
        }
    }

    /// Advance to the next delay and return it.
    pub fn advance(&mut self) -> Duration {
        self.current = if self.current == 0 {
            1
        } else {
            self.current.saturating_mul(2)
        };
        if self.current > self.ceiling {
            self.current = 1;
        }
        Duration::from_secs(self.current)
    }

    /// Forget any previous failures.
    pub fn reset(&mut self) {
        self.current = 0;
    }

    /// Current delay; zero when no failure has been recorded since the last reset.
    pub fn current(&self) -> Duration {
        Duration::from_secs(self.current)
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }
}
