//! A recurring ticker whose next fire time can be pulled forward.
//!
//! The executor runs one check tick per interval, but many events (a new
//! submission, a completed migration) want the next tick to happen sooner.
//! [`Ticker::trigger_after`] moves the pending deadline earlier; it never
//! pushes it back.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

pub struct Ticker {
    interval: Duration,
    deadline: Mutex<Instant>,
    changed: Notify,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: Mutex::new(Instant::now() + interval),
            changed: Notify::new(),
        }
    }

    /// Pulls the next fire time forward to at most `after` from now.
    pub fn trigger_after(&self, after: Duration) {
        let candidate = Instant::now() + after;
        let mut deadline = self.deadline.lock();
        if candidate < *deadline {
            *deadline = candidate;
            self.changed.notify_one();
        }
    }

    /// Completes at the current deadline, then re-arms at the regular
    /// interval.
    pub async fn tick(&self) {
        loop {
            let deadline = *self.deadline.lock();
            tokio::select! {
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    *self.deadline.lock() = Instant::now() + self.interval;
                    return;
                }
                _ = self.changed.notified() => {
                    // deadline moved; re-evaluate
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_pulls_deadline_forward() {
        let ticker = Ticker::new(Duration::from_secs(60));
        ticker.trigger_after(Duration::from_millis(10));
        let started = Instant::now();
        ticker.tick().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn trigger_never_pushes_deadline_back() {
        let ticker = Ticker::new(Duration::from_secs(60));
        ticker.trigger_after(Duration::from_millis(10));
        ticker.trigger_after(Duration::from_secs(3600));
        let started = Instant::now();
        ticker.tick().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn tick_rearms_at_interval() {
        let ticker = Ticker::new(Duration::from_millis(20));
        let started = Instant::now();
        ticker.tick().await;
        ticker.tick().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(30), "elapsed: {elapsed:?}");
    }
}
