use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of wall-clock time and delays.
///
/// Encoding reads `now` for the syslog timestamp and the delivery client waits
/// out its backoff through `sleep`, so both can be frozen in tests.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// The real clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock stopped at a fixed instant.
///
/// Sleeps return immediately and are recorded, so backoff schedules can be
/// asserted without waiting on them.
#[derive(Clone, Debug)]
pub struct FrozenClock {
    now: DateTime<Utc>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl FrozenClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            sleeps: Arc::default(),
        }
    }

    /// Delays requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|sleeps| sleeps.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[tokio::test]
    async fn frozen_clock_records_sleeps() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = FrozenClock::new(at);

        clock.sleep(Duration::from_millis(100)).await;
        clock.sleep(Duration::from_millis(200)).await;

        assert_eq!(clock.now(), at);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn frozen_clock_clones_share_the_sleep_log() {
        let clock = FrozenClock::new(Utc::now());
        let other = clock.clone();

        other.sleep(Duration::from_secs(1)).await;

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
    }
}
