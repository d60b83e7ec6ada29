//! Rate limiting of downstream book notifications.
//!
//! [`UpdateThrottle`] only decides *when* to notify; the caller owns the book
//! and publishes whatever it holds at that moment, so a notification always
//! carries the latest state. Semantics match a leading + trailing edge
//! throttle:
//!
//! - the first mutation after a quiet period is published immediately;
//! - mutations inside the interval are coalesced;
//! - once the interval elapses, the coalesced state is published even if no
//!   further mutation arrives, so the last change of a burst is never lost.

use std::time::Duration;

use tokio::time::Instant;

/// Leading + trailing edge notification throttle
#[derive(Debug, Clone)]
pub struct UpdateThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    pending: bool,
}

impl UpdateThrottle {
    /// Create a throttle emitting at most once per `interval`.
    ///
    /// A zero interval emits on every mutation.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            pending: false,
        }
    }

    /// Configured interval
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Record a mutation at `now`.
    ///
    /// Returns `true` if the caller should publish right away; otherwise the
    /// mutation is pending until [`deadline`](Self::deadline).
    pub fn record(&mut self, now: Instant) -> bool {
        let due = match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_emit = Some(now);
            self.pending = false;
        } else {
            self.pending = true;
        }
        due
    }

    /// When the pending trailing notification is due, if one is pending
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        if !self.pending {
            return None;
        }
        self.last_emit.map(|last| last + self.interval)
    }

    /// Take the pending notification if its deadline has passed.
    ///
    /// Returns `true` if the caller should publish now.
    pub fn poll_due(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.last_emit = Some(now);
                self.pending = false;
                true
            }
            _ => false,
        }
    }

    /// Whether a trailing notification is outstanding
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending
    }

    /// Forget any pending notification and start a fresh window
    pub fn reset(&mut self) {
        self.last_emit = None;
        self.pending = false;
    }
}

impl Default for UpdateThrottle {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_emits_every_time() {
        let mut throttle = UpdateThrottle::new(Duration::ZERO);
        let now = Instant::now();

        assert!(throttle.record(now));
        assert!(throttle.record(now));
        assert!(throttle.record(now + Duration::from_nanos(1)));
        assert!(!throttle.is_pending());
        assert_eq!(throttle.deadline(), None);
    }

    #[test]
    fn test_burst_is_coalesced_with_trailing_emit() {
        let mut throttle = UpdateThrottle::new(Duration::from_millis(100));
        let start = Instant::now();

        // Leading edge
        assert!(throttle.record(start));

        // Burst inside the window
        assert!(!throttle.record(start + Duration::from_millis(10)));
        assert!(!throttle.record(start + Duration::from_millis(50)));
        assert!(!throttle.record(start + Duration::from_millis(90)));
        assert!(throttle.is_pending());
        assert_eq!(throttle.deadline(), Some(start + Duration::from_millis(100)));

        // Not yet due
        assert!(!throttle.poll_due(start + Duration::from_millis(99)));

        // Trailing edge delivers the last mutation of the burst
        assert!(throttle.poll_due(start + Duration::from_millis(100)));
        assert!(!throttle.is_pending());
        assert!(!throttle.poll_due(start + Duration::from_millis(500)));
    }

    #[test]
    fn test_mutation_after_quiet_period_is_immediate() {
        let mut throttle = UpdateThrottle::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(throttle.record(start));
        assert!(throttle.record(start + Duration::from_millis(150)));
        assert!(!throttle.is_pending());
    }

    #[test]
    fn test_window_restarts_after_trailing_emit() {
        let mut throttle = UpdateThrottle::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(throttle.record(start));
        assert!(!throttle.record(start + Duration::from_millis(20)));
        assert!(throttle.poll_due(start + Duration::from_millis(120)));

        // A mutation right after the trailing emit waits for the next window
        assert!(!throttle.record(start + Duration::from_millis(130)));
        assert_eq!(throttle.deadline(), Some(start + Duration::from_millis(220)));
    }

    #[test]
    fn test_reset() {
        let mut throttle = UpdateThrottle::new(Duration::from_secs(1));
        let start = Instant::now();
        throttle.record(start);
        throttle.record(start + Duration::from_millis(1));
        assert!(throttle.is_pending());

        throttle.reset();

        assert!(!throttle.is_pending());
        assert!(throttle.record(start + Duration::from_millis(2)));
    }
}
