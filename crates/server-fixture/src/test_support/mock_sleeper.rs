use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use server_fixture_common::mutex_lock_or_recover;

use crate::sleeper::Sleeper;

#[derive(Debug, Default)]
pub struct MockSleeper {
    call_count: AtomicU64,
    total_duration_ms: AtomicU64,
    durations: Mutex<Vec<Duration>>,
}

impl MockSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_millis(self.total_duration_ms.load(Ordering::SeqCst))
    }

    pub fn durations(&self) -> Vec<Duration> {
        mutex_lock_or_recover(&self.durations).clone()
    }
}

impl Sleeper for MockSleeper {
    fn sleep(&self, duration: Duration) {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        mutex_lock_or_recover(&self.durations).push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_sleeper_does_not_sleep() {
        let sleeper = MockSleeper::new();
        let start = std::time::Instant::now();
        sleeper.sleep(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_mock_sleeper_tracks_durations() {
        let sleeper = MockSleeper::new();

        sleeper.sleep(Duration::from_millis(100));
        sleeper.sleep(Duration::from_millis(200));

        assert_eq!(sleeper.call_count(), 2);
        assert_eq!(sleeper.total_duration(), Duration::from_millis(300));
        assert_eq!(
            sleeper.durations(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }
}
