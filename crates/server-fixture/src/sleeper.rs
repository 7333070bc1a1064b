//! Sleeper trait for deterministic timing in tests.
//!
//! Readiness polling and the kill protocol both block between attempts.
//! Routing those waits through `Sleeper` lets tests swap in a recording
//! sleeper that returns immediately.

use std::thread;
use std::time::Duration;

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealSleeper;

impl Sleeper for RealSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}
