use std::sync::{Arc, Mutex, OnceLock};

use server_fixture_common::mutex_lock_or_recover;

use super::get_free_port;
use crate::error::FixtureError;

/// Append-only record of ports handed out in this process.
///
/// The lock is held across scan, bind and append so two fixtures
/// constructed on different threads can never be given the same port.
#[derive(Debug, Default)]
pub struct PortRegistry {
    allocated: Mutex<Vec<u16>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every fixture in the process.
    pub fn global() -> Arc<PortRegistry> {
        static GLOBAL: OnceLock<Arc<PortRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(PortRegistry::new())))
    }

    /// Allocates a free port, excluding everything already recorded, and
    /// records the result.
    pub fn allocate<F>(&self, retries: u32, candidate: F) -> Result<u16, FixtureError>
    where
        F: FnMut() -> u16,
    {
        let mut allocated = mutex_lock_or_recover(&self.allocated);
        let port = get_free_port(&allocated, retries, candidate)?;
        allocated.push(port);
        Ok(port)
    }

    pub fn allocated(&self) -> Vec<u16> {
        mutex_lock_or_recover(&self.allocated).clone()
    }

    pub fn contains(&self, port: u16) -> bool {
        mutex_lock_or_recover(&self.allocated).contains(&port)
    }
}
