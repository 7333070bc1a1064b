use std::collections::HashSet;
use std::io;
use std::sync::Mutex;

use server_fixture_common::mutex_lock_or_recover;

use crate::process::{KillOutcome, ProcessController};

/// Records kills instead of delivering them.
#[derive(Debug, Default)]
pub struct MockProcessController {
    kills: Mutex<Vec<u32>>,
    gone: Mutex<HashSet<u32>>,
    kill_error: Mutex<Option<io::Error>>,
}

impl MockProcessController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kills of `pid` report that the process had already exited.
    pub fn with_gone(self, pid: u32) -> Self {
        mutex_lock_or_recover(&self.gone).insert(pid);
        self
    }

    /// The next `kill` fails with `error`.
    pub fn with_kill_error(self, error: io::Error) -> Self {
        *mutex_lock_or_recover(&self.kill_error) = Some(error);
        self
    }

    pub fn kills(&self) -> Vec<u32> {
        mutex_lock_or_recover(&self.kills).clone()
    }
}

impl ProcessController for MockProcessController {
    fn kill(&self, pid: u32) -> Result<KillOutcome, io::Error> {
        if let Some(err) = mutex_lock_or_recover(&self.kill_error).take() {
            return Err(err);
        }
        mutex_lock_or_recover(&self.kills).push(pid);
        if mutex_lock_or_recover(&self.gone).contains(&pid) {
            return Ok(KillOutcome::AlreadyGone);
        }
        Ok(KillOutcome::Killed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_kills() {
        let mock = MockProcessController::new().with_gone(7);

        assert_eq!(mock.kill(1234).unwrap(), KillOutcome::Killed);
        assert_eq!(mock.kill(7).unwrap(), KillOutcome::AlreadyGone);
        assert_eq!(mock.kills(), vec![1234, 7]);
    }

    #[test]
    fn test_mock_kill_error_is_one_shot() {
        let mock = MockProcessController::new().with_kill_error(io::Error::other("denied"));
        assert!(mock.kill(1).is_err());
        assert!(mock.kill(1).is_ok());
        assert_eq!(mock.kills(), vec![1]);
    }
}
