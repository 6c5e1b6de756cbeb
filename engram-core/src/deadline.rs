//! Call deadlines
//!
//! Every inbound tool call carries a deadline. Cancellation is cooperative:
//! blocking operations poll the deadline between retries and abandon work
//! once it has elapsed. Durable partial work is never rolled back.

use std::time::{Duration, Instant};

/// Deadline attached to an inbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A call with no deadline.
    pub fn none() -> Self {
        Self(None)
    }

    /// A deadline this far in the future.
    pub fn after(duration: Duration) -> Self {
        Self(Some(Instant::now() + duration))
    }

    /// A deadline at a fixed instant.
    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Whether the deadline has elapsed.
    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time remaining, or None when unbounded. Zero once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_deadline_never_expires() {
        let deadline = Deadline::none();
        assert!(!deadline.expired());
        assert!(deadline.remaining().is_none());
    }

    #[test]
    fn test_future_deadline() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(!deadline.expired());
        assert!(deadline.remaining().unwrap() > Duration::from_secs(59));
    }

    #[test]
    fn test_elapsed_deadline() {
        let deadline = Deadline::at(Instant::now() - Duration::from_millis(1));
        assert!(deadline.expired());
        assert_eq!(deadline.remaining().unwrap(), Duration::ZERO);
    }
}
