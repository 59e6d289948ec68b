//! # Fibonacci Backoff
//!
//! Fibonacci-based retry delays for transient reconciliation errors. The
//! sequence grows more slowly than exponential backoff, so a challenge that
//! is briefly blocked (API server hiccup, admission webhook restart) is
//! retried quickly while a persistently failing one settles at the cap.
//!
//! Sequence with the default bounds: 5s, 5s, 10s, 15s, 25s, 40s, 65s, ... 300s (max).
//!
//! ## Usage
//!
//! ```rust
//! use acme_http01_controller::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(5, 300);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! assert_eq!(backoff.next_backoff_seconds(), 10);
//! assert_eq!(backoff.next_backoff_seconds(), 15);
//! assert_eq!(backoff.next_backoff_seconds(), 25);
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, starting from `min_seconds`
/// and capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff in seconds (for reset)
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff bounded by `min_seconds` and `max_seconds`
    ///
    /// # Example
    ///
    /// ```
    /// use acme_http01_controller::controller::backoff::FibonacciBackoff;
    ///
    /// let backoff = FibonacciBackoff::new(5, 300);
    /// ```
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        let min_seconds = min_seconds.max(1);
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds: max_seconds.max(min_seconds),
        }
    }

    /// Get the next backoff in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;

        let next = self.prev_seconds.saturating_add(self.current_seconds);
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next, self.max_seconds);

        result
    }

    /// Get the next backoff as a `Duration` and advance the sequence
    ///
    /// # Example
    ///
    /// ```
    /// use acme_http01_controller::controller::backoff::FibonacciBackoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = FibonacciBackoff::new(5, 300);
    /// assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
    /// ```
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(5, 300);

        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 10);
        assert_eq!(backoff.next_backoff_seconds(), 15);
        assert_eq!(backoff.next_backoff_seconds(), 25);
        assert_eq!(backoff.next_backoff_seconds(), 40);
        assert_eq!(backoff.next_backoff_seconds(), 65);
        assert_eq!(backoff.next_backoff_seconds(), 105);
        assert_eq!(backoff.next_backoff_seconds(), 170);
        assert_eq!(backoff.next_backoff_seconds(), 275);
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(5, 300);
        for _ in 0..10 {
            backoff.next_backoff_seconds();
        }
        // 170 + 275 would be 445, capped at 300
        assert_eq!(backoff.next_backoff_seconds(), 300);
        assert_eq!(backoff.next_backoff_seconds(), 300);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(5, 300);

        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 10);

        backoff.reset();

        // Should restart from beginning after success
        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 10);
    }

    #[test]
    fn test_fibonacci_backoff_degenerate_bounds() {
        let mut backoff = FibonacciBackoff::new(0, 0);
        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
    }

    #[test]
    fn test_fibonacci_backoff_per_resource_state() {
        let mut backoff1 = FibonacciBackoff::new(5, 300);
        let mut backoff2 = FibonacciBackoff::new(5, 300);

        assert_eq!(backoff1.next_backoff_seconds(), 5);
        assert_eq!(backoff1.next_backoff_seconds(), 5);
        assert_eq!(backoff1.next_backoff_seconds(), 10);

        assert_eq!(backoff2.next_backoff_seconds(), 5);

        backoff1.reset();
        assert_eq!(backoff1.next_backoff_seconds(), 5);

        // Second backoff continues independently
        assert_eq!(backoff2.next_backoff_seconds(), 5);
        assert_eq!(backoff2.next_backoff_seconds(), 10);
    }
}
