//! Readiness polling with binary exponential backoff.

mod check;

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::FixtureError;
use crate::sleeper::Sleeper;

pub use check::{HttpCheck, LivenessCheck, TcpConnectCheck, TcpExchangeCheck};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep after the first failed checks; doubled after every pass.
    pub start_interval: Duration,
    /// Checks made at each interval before it is doubled.
    pub retries_per_interval: u32,
    /// Total checks before giving up.
    pub retry_limit: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            start_interval: Duration::from_millis(100),
            retries_per_interval: 3,
            retry_limit: 21,
        }
    }
}

/// Calls `check` until it reports `Ok(true)`, sleeping with exponential
/// backoff in between. Returns the time spent waiting.
///
/// Exactly `retry_limit` checks are made before failing with
/// [`FixtureError::ReadinessTimeout`]. An `Err` from `check` stops polling
/// at once and is returned unchanged.
pub fn wait_for_ready<F>(
    mut check: F,
    policy: &PollPolicy,
    sleeper: &dyn Sleeper,
) -> Result<Duration, FixtureError>
where
    F: FnMut() -> Result<bool, FixtureError>,
{
    if policy.start_interval.is_zero() {
        return Err(FixtureError::InvalidInterval);
    }

    let start = Instant::now();
    let per_interval = policy.retries_per_interval.max(1);
    let mut interval = policy.start_interval;
    let mut remaining = policy.retry_limit;
    let mut checks = 0u32;

    while remaining > 0 {
        for _ in 0..per_interval {
            if remaining == 0 {
                break;
            }
            checks += 1;
            debug!(
                attempt = checks,
                limit = policy.retry_limit,
                interval = ?interval,
                "checking whether server is up"
            );
            if check()? {
                let elapsed = start.elapsed();
                info!(elapsed = ?elapsed, "server started successfully");
                return Ok(elapsed);
            }
            sleeper.sleep(interval);
            remaining -= 1;
        }
        interval = interval.saturating_mul(2);
    }

    Err(FixtureError::ReadinessTimeout {
        elapsed: start.elapsed(),
        checks,
    })
}
