use std::io;

/// What a SIGKILL found at the other end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Killed,
    /// No such process; it exited between lookup and signal.
    AlreadyGone,
}

/// Kills processes the fixture does not own a handle to, such as
/// grandchildren still bound to a server's port.
pub trait ProcessController: Send + Sync {
    fn kill(&self, pid: u32) -> Result<KillOutcome, io::Error>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnixProcessController;

fn to_pid_t(pid: u32) -> Result<libc::pid_t, io::Error> {
    let pid_t: libc::pid_t = pid
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "PID out of range"))?;
    // kill(0, ..) and kill(-1, ..) address process groups, never a single server.
    if pid_t <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "PID must be positive",
        ));
    }
    Ok(pid_t)
}

impl ProcessController for UnixProcessController {
    fn kill(&self, pid: u32) -> Result<KillOutcome, io::Error> {
        let pid_t = to_pid_t(pid)?;

        if unsafe { libc::kill(pid_t, libc::SIGKILL) } == 0 {
            return Ok(KillOutcome::Killed);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Ok(KillOutcome::AlreadyGone),
            _ => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_non_positive_pids_are_rejected() {
        let controller = UnixProcessController;
        assert_eq!(
            controller.kill(0).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
        assert_eq!(
            controller.kill(u32::MAX).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_kill_real_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();

        assert_eq!(
            UnixProcessController.kill(child.id()).unwrap(),
            KillOutcome::Killed
        );
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_kill_unused_pid_reports_gone() {
        // Above the default pid_max of every Linux and macOS kernel.
        assert_eq!(
            UnixProcessController.kill(99_999_999).unwrap(),
            KillOutcome::AlreadyGone
        );
    }
}
