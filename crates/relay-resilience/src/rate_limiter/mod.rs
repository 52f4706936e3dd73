//! Rolling-window send rate limiter.
//!
//! Two counters (minute and hour) are reset lazily: each read first checks
//! whether its window has elapsed against the injected clock. The limiter
//! is in-process only; separate processes do not share counts.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use relay_core::SharedClock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

fn minute() -> Duration {
    Duration::seconds(60)
}

fn hour() -> Duration {
    Duration::seconds(3600)
}

/// Configured ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub per_minute: u32,
    pub per_hour: u32,
}

impl RateLimits {
    /// Creates limits with an explicit hourly ceiling.
    pub const fn new(per_minute: u32, per_hour: u32) -> Self {
        Self {
            per_minute,
            per_hour,
        }
    }

    /// Creates limits with the hourly ceiling at ten times the minute one.
    pub const fn per_minute(per_minute: u32) -> Self {
        Self::new(per_minute, per_minute.saturating_mul(10))
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Counters for the current minute and hour windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub count_in_minute: u32,
    pub count_in_hour: u32,
    pub last_minute_reset: DateTime<Utc>,
    pub last_hour_reset: DateTime<Utc>,
}

impl RateLimitWindow {
    fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            count_in_minute: 0,
            count_in_hour: 0,
            last_minute_reset: now,
            last_hour_reset: now,
        }
    }

    fn reset_elapsed(&mut self, now: DateTime<Utc>) {
        if now - self.last_minute_reset >= minute() {
            self.count_in_minute = 0;
            self.last_minute_reset = now;
        }
        if now - self.last_hour_reset >= hour() {
            self.count_in_hour = 0;
            self.last_hour_reset = now;
        }
    }

    fn has_capacity(&self, limits: &RateLimits) -> bool {
        self.count_in_minute < limits.per_minute && self.count_in_hour < limits.per_hour
    }

    fn increment(&mut self) {
        self.count_in_minute = self.count_in_minute.saturating_add(1);
        self.count_in_hour = self.count_in_hour.saturating_add(1);
    }
}

/// Point-in-time view of the limiter for stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub per_minute_limit: u32,
    pub per_hour_limit: u32,
    pub sent_this_minute: u32,
    pub sent_this_hour: u32,
    pub minute_resets_at: DateTime<Utc>,
    pub hour_resets_at: DateTime<Utc>,
}

impl RateLimitSnapshot {
    /// Sends still allowed before either ceiling is hit.
    pub fn remaining(&self) -> u32 {
        let minute = self.per_minute_limit.saturating_sub(self.sent_this_minute);
        let hour = self.per_hour_limit.saturating_sub(self.sent_this_hour);
        minute.min(hour)
    }
}

#[derive(Debug)]
struct Inner {
    limits: RateLimits,
    clock: SharedClock,
    window: Mutex<RateLimitWindow>,
}

/// Rate limiter over rolling minute and hour windows.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    /// Creates a limiter reading time from `clock`.
    pub fn new(limits: RateLimits, clock: SharedClock) -> Self {
        let window = RateLimitWindow::starting_at(clock.now());
        Self {
            inner: Arc::new(Inner {
                limits,
                clock,
                window: Mutex::new(window),
            }),
        }
    }

    /// Configured ceilings.
    pub fn limits(&self) -> RateLimits {
        self.inner.limits
    }

    /// Returns true if a send is currently allowed. Does not count it.
    pub fn try_acquire(&self) -> bool {
        let now = self.inner.clock.now();
        let mut window = self.inner.window.lock();
        window.reset_elapsed(now);
        window.has_capacity(&self.inner.limits)
    }

    /// Counts one completed send against both windows.
    pub fn record_sent(&self) {
        let now = self.inner.clock.now();
        let mut window = self.inner.window.lock();
        window.reset_elapsed(now);
        window.increment();
    }

    /// Checks and counts a send in one step.
    ///
    /// The returned permit holds the slot: [`RatePermit::commit`] keeps it,
    /// dropping the permit uncommitted gives it back.
    pub fn try_reserve(&self) -> Option<RatePermit> {
        let now = self.inner.clock.now();
        let mut window = self.inner.window.lock();
        window.reset_elapsed(now);
        if !window.has_capacity(&self.inner.limits) {
            debug!(
                sent_this_minute = window.count_in_minute,
                sent_this_hour = window.count_in_hour,
                "Send rate limit reached"
            );
            return None;
        }
        window.increment();
        Some(RatePermit {
            inner: Arc::clone(&self.inner),
            minute_window: window.last_minute_reset,
            hour_window: window.last_hour_reset,
            committed: false,
        })
    }

    /// Returns the current counters.
    pub fn snapshot(&self) -> RateLimitSnapshot {
        let now = self.inner.clock.now();
        let mut window = self.inner.window.lock();
        window.reset_elapsed(now);
        RateLimitSnapshot {
            per_minute_limit: self.inner.limits.per_minute,
            per_hour_limit: self.inner.limits.per_hour,
            sent_this_minute: window.count_in_minute,
            sent_this_hour: window.count_in_hour,
            minute_resets_at: window.last_minute_reset + minute(),
            hour_resets_at: window.last_hour_reset + hour(),
        }
    }
}

/// A reserved send slot.
#[derive(Debug)]
#[must_use = "dropping a permit releases its slot"]
pub struct RatePermit {
    inner: Arc<Inner>,
    minute_window: DateTime<Utc>,
    hour_window: DateTime<Utc>,
    committed: bool,
}

impl RatePermit {
    /// Keeps the slot; the send happened.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut window = self.inner.window.lock();
        // A slot only belongs to the window it was taken from.
        if window.last_minute_reset == self.minute_window {
            window.count_in_minute = window.count_in_minute.saturating_sub(1);
        }
        if window.last_hour_reset == self.hour_window {
            window.count_in_hour = window.count_in_hour.saturating_sub(1);
        }
    }
}
