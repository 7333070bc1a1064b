use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Mutex;

use server_fixture_common::mutex_lock_or_recover;

use crate::error::FixtureError;
use crate::listeners::ListenerTable;

/// Replays scripted lookups, then reports an empty table.
#[derive(Debug, Default)]
pub struct MockListenerTable {
    responses: Mutex<VecDeque<Vec<String>>>,
    persistent: Mutex<Option<Vec<String>>>,
    queries: Mutex<Vec<(IpAddr, u16)>>,
}

impl MockListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one lookup result.
    pub fn with_response<I, S>(self, pids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        mutex_lock_or_recover(&self.responses).push_back(pids.into_iter().map(Into::into).collect());
        self
    }

    /// Every lookup after the queued ones returns `pids`.
    pub fn always<I, S>(self, pids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *mutex_lock_or_recover(&self.persistent) = Some(pids.into_iter().map(Into::into).collect());
        self
    }

    pub fn query_count(&self) -> usize {
        mutex_lock_or_recover(&self.queries).len()
    }

    pub fn queries(&self) -> Vec<(IpAddr, u16)> {
        mutex_lock_or_recover(&self.queries).clone()
    }
}

impl ListenerTable for MockListenerTable {
    fn listener_pids(&self, ip: IpAddr, port: u16) -> Result<Vec<String>, FixtureError> {
        mutex_lock_or_recover(&self.queries).push((ip, port));
        if let Some(next) = mutex_lock_or_recover(&self.responses).pop_front() {
            return Ok(next);
        }
        Ok(mutex_lock_or_recover(&self.persistent)
            .clone()
            .unwrap_or_default())
    }
}
