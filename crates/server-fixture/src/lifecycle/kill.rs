//! Kill protocol: find every process listening on the server's port and
//! SIGKILL it, repeating until the listener table is empty.
//!
//! Killing the spawned pid alone is not enough; servers started through
//! wrapper scripts leave children bound to the port.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::FixtureError;
use crate::listeners::ListenerTable;
use crate::process::{KillOutcome, ProcessController};
use crate::sleeper::Sleeper;

/// Resolves `hostname`, preferring an IPv4 address.
pub fn resolve_host(hostname: &str) -> Result<IpAddr, FixtureError> {
    let addrs: Vec<SocketAddr> = (hostname, 0)
        .to_socket_addrs()
        .map_err(|e| FixtureError::Resolve {
            hostname: hostname.to_string(),
            reason: e.to_string(),
        })?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(SocketAddr::ip)
        .ok_or_else(|| FixtureError::Resolve {
            hostname: hostname.to_string(),
            reason: "no addresses".to_string(),
        })
}

pub(crate) struct KillTarget<'a> {
    pub hostname: &'a str,
    pub port: u16,
    pub retries: u32,
    pub interval: Duration,
}

/// Runs kill cycles until nothing listens on the target port.
///
/// Returns the number of cycles that found and signalled listeners.
pub(crate) fn kill_listeners(
    target: &KillTarget<'_>,
    listeners: &dyn ListenerTable,
    processes: &dyn ProcessController,
    sleeper: &dyn Sleeper,
) -> Result<u32, FixtureError> {
    let own_pid = std::process::id();
    let mut cycles = 0u32;

    loop {
        info!(hostname = target.hostname, port = target.port, "waiting for server to die");
        let ip = resolve_host(target.hostname)?;
        let pids = listeners.listener_pids(ip, target.port)?;
        debug!(?pids, "listener process IDs");

        if pids.is_empty() {
            info!(port = target.port, "no listeners, server is dead");
            return Ok(cycles);
        }

        for token in &pids {
            match token.parse::<u32>() {
                Ok(pid) if pid == own_pid => {
                    warn!(pid, port = target.port, "refusing to kill the test process itself");
                }
                Ok(pid) => match processes.kill(pid) {
                    Ok(KillOutcome::Killed) => debug!(pid, "killed listener"),
                    Ok(KillOutcome::AlreadyGone) => debug!(pid, "listener already gone"),
                    Err(e) => warn!(pid, error = %e, "failed to kill listener"),
                },
                Err(_) => {
                    warn!(
                        token = %token,
                        port = target.port,
                        "can't determine pid, process shutting down or owned by someone else"
                    );
                }
            }
        }

        cycles += 1;
        if cycles >= target.retries {
            return Err(FixtureError::KillExhausted {
                hostname: target.hostname.to_string(),
                port: target.port,
                retries: target.retries,
            });
        }
        sleeper.sleep(target.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockListenerTable, MockProcessController, MockSleeper};
    use std::net::Ipv4Addr;

    fn target(retries: u32) -> KillTarget<'static> {
        KillTarget {
            hostname: "127.0.0.1",
            port: 7001,
            retries,
            interval: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_resolve_prefers_ipv4() {
        assert_eq!(
            resolve_host("127.0.0.1").unwrap(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
        assert!(resolve_host("localhost").is_ok());
    }

    #[test]
    fn test_resolve_failure() {
        let result = resolve_host("host.that.does.not.exist.invalid");
        assert!(matches!(result, Err(FixtureError::Resolve { .. })));
    }

    #[test]
    fn test_empty_table_is_dead_immediately() {
        let listeners = MockListenerTable::new();
        let processes = MockProcessController::new();
        let sleeper = MockSleeper::new();

        let cycles = kill_listeners(&target(5), &listeners, &processes, &sleeper).unwrap();

        assert_eq!(cycles, 0);
        assert_eq!(listeners.queries(), vec![(IpAddr::V4(Ipv4Addr::LOCALHOST), 7001)]);
        assert!(processes.kills().is_empty());
        assert_eq!(sleeper.call_count(), 0);
    }

    #[test]
    fn test_kills_every_listener_then_rechecks() {
        let listeners = MockListenerTable::new().with_response(["101", "202"]);
        let processes = MockProcessController::new();
        let sleeper = MockSleeper::new();

        let cycles = kill_listeners(&target(5), &listeners, &processes, &sleeper).unwrap();

        assert_eq!(cycles, 1);
        assert_eq!(processes.kills(), vec![101, 202]);
        assert_eq!(listeners.query_count(), 2);
        assert_eq!(sleeper.durations(), vec![Duration::from_secs(1)]);
    }

    #[test]
    fn test_unparseable_tokens_are_skipped() {
        let listeners = MockListenerTable::new().with_response(["-", "303", "abc"]);
        let processes = MockProcessController::new();
        let sleeper = MockSleeper::new();

        kill_listeners(&target(5), &listeners, &processes, &sleeper).unwrap();

        assert_eq!(processes.kills(), vec![303]);
    }

    #[test]
    fn test_never_signals_own_process() {
        let own = std::process::id().to_string();
        let listeners = MockListenerTable::new().with_response([own]);
        let processes = MockProcessController::new();
        let sleeper = MockSleeper::new();

        kill_listeners(&target(5), &listeners, &processes, &sleeper).unwrap();

        assert!(processes.kills().is_empty());
    }

    #[test]
    fn test_persistent_listener_exhausts_retries() {
        let listeners = MockListenerTable::new().always(["404"]);
        let processes = MockProcessController::new();
        let sleeper = MockSleeper::new();

        let result = kill_listeners(&target(3), &listeners, &processes, &sleeper);

        assert!(matches!(
            result,
            Err(FixtureError::KillExhausted {
                port: 7001,
                retries: 3,
                ..
            })
        ));
        assert_eq!(listeners.query_count(), 3);
        assert_eq!(processes.kills().len(), 3);
        assert_eq!(sleeper.call_count(), 2);
    }

    #[test]
    fn test_vanished_listener_is_not_an_error() {
        let listeners = MockListenerTable::new().with_response(["77"]);
        let processes = MockProcessController::new().with_gone(77);
        let sleeper = MockSleeper::new();

        let cycles = kill_listeners(&target(5), &listeners, &processes, &sleeper).unwrap();

        assert_eq!(cycles, 1);
        assert_eq!(processes.kills(), vec![77]);
    }

    #[test]
    fn test_signal_failure_does_not_abort_cycle() {
        let listeners = MockListenerTable::new().with_response(["1", "2"]);
        let processes =
            MockProcessController::new().with_kill_error(std::io::Error::other("EPERM"));
        let sleeper = MockSleeper::new();

        kill_listeners(&target(5), &listeners, &processes, &sleeper).unwrap();

        assert_eq!(processes.kills(), vec![2]);
    }
}
