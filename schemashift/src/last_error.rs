//! Sliding-window error accumulation.
//!
//! Replication streams produce transient errors we do not want to fail on
//! at first sight. [`LastError`] records the latest error and answers
//! whether retrying is still reasonable: retry is denied once the *same
//! failure condition* has persisted for longer than the configured window
//! without an intervening success.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct LastError {
    name: String,
    max_time_in_error: Duration,
    first_seen: Option<Instant>,
    last_error: Option<String>,
}

impl LastError {
    pub fn new(name: impl Into<String>, max_time_in_error: Duration) -> Self {
        Self {
            name: name.into(),
            max_time_in_error,
            first_seen: None,
            last_error: None,
        }
    }

    /// Records the current error state; `None` means "healthy now" and
    /// resets the window.
    pub fn record(&mut self, error: Option<&str>) {
        match error {
            None => {
                self.first_seen = None;
                self.last_error = None;
            }
            Some(message) => {
                if self.first_seen.is_none() {
                    tracing::error!(name = %self.name, error = %message, "first error seen");
                    self.first_seen = Some(Instant::now());
                }
                self.last_error = Some(message.to_string());
            }
        }
    }

    /// Whether the error condition is still within the retry window.
    pub fn should_retry(&self) -> bool {
        match self.first_seen {
            None => true,
            Some(first_seen) => first_seen.elapsed() <= self.max_time_in_error,
        }
    }

    /// The most recently recorded error message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_stream_retries() {
        let mut last_error = LastError::new("workflow", Duration::from_secs(60));
        assert!(last_error.should_retry());
        last_error.record(None);
        assert!(last_error.should_retry());
        assert_eq!(last_error.last_error(), None);
    }

    #[test]
    fn error_within_window_retries() {
        let mut last_error = LastError::new("workflow", Duration::from_secs(60));
        last_error.record(Some("deadlock found"));
        assert!(last_error.should_retry());
        assert_eq!(last_error.last_error(), Some("deadlock found"));
    }

    #[test]
    fn persistent_error_stops_retrying() {
        let mut last_error = LastError::new("workflow", Duration::ZERO);
        last_error.record(Some("disk full"));
        std::thread::sleep(Duration::from_millis(5));
        last_error.record(Some("disk full"));
        assert!(!last_error.should_retry());
    }

    #[test]
    fn success_resets_the_window() {
        let mut last_error = LastError::new("workflow", Duration::ZERO);
        last_error.record(Some("disk full"));
        std::thread::sleep(Duration::from_millis(5));
        last_error.record(None);
        assert!(last_error.should_retry());
    }
}
