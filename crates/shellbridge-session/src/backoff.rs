//! Polling schedules.

use std::time::Duration;

/// Exponential polling backoff bounded by an overall timeout.
///
/// The schedule is driven by elapsed time supplied by the caller, so it can
/// be exercised without timers.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    timeout: Duration,
}

impl Backoff {
    /// Start at `initial`, doubling up to `max`, giving up after `timeout`.
    pub fn new(initial: Duration, max: Duration, timeout: Duration) -> Self {
        Self {
            current: initial,
            max: max.max(initial),
            timeout,
        }
    }

    /// Delay before the next poll, or `None` once `elapsed` reaches the
    /// timeout. The delay never overshoots the remaining time.
    pub fn next_delay(&mut self, elapsed: Duration) -> Option<Duration> {
        let remaining = self.timeout.checked_sub(elapsed)?;
        if remaining.is_zero() {
            return None;
        }

        let delay = self.current.min(remaining);
        self.current = self.current.saturating_mul(2).min(self.max);
        Some(delay)
    }
}

/// Tracks consecutive readings until two agree.
#[derive(Debug, Clone, Default)]
pub struct Settle<T> {
    last: Option<T>,
}

impl<T: PartialEq> Settle<T> {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Record a reading; true when it equals the previous one.
    pub fn observe(&mut self, value: T) -> bool {
        let settled = self.last.as_ref() == Some(&value);
        self.last = Some(value);
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::new(ms(100), ms(1000), ms(60_000));
        let delays: Vec<_> = (0..6)
            .map(|_| backoff.next_delay(Duration::ZERO).unwrap())
            .collect();
        assert_eq!(
            delays,
            vec![ms(100), ms(200), ms(400), ms(800), ms(1000), ms(1000)]
        );
    }

    #[test]
    fn test_backoff_stops_at_timeout() {
        let mut backoff = Backoff::new(ms(100), ms(1000), ms(500));
        assert_eq!(backoff.next_delay(ms(0)), Some(ms(100)));
        assert_eq!(backoff.next_delay(ms(100)), Some(ms(200)));
        // Only 50ms left
        assert_eq!(backoff.next_delay(ms(450)), Some(ms(50)));
        assert_eq!(backoff.next_delay(ms(500)), None);
        assert_eq!(backoff.next_delay(ms(900)), None);
    }

    #[test]
    fn test_backoff_zero_timeout() {
        let mut backoff = Backoff::new(ms(100), ms(1000), Duration::ZERO);
        assert_eq!(backoff.next_delay(Duration::ZERO), None);
    }

    #[test]
    fn test_settle() {
        let mut settle = Settle::new();
        assert!(!settle.observe(10));
        assert!(!settle.observe(12));
        assert!(settle.observe(12));
    }
}
