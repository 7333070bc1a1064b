//! Free TCP port selection.
//!
//! Ports are drawn from a caller-supplied candidate generator, screened
//! against previously handed-out ports, and checked by binding. The
//! process-wide [`PortRegistry`] remembers every port it has handed out so
//! concurrent fixtures bias away from each other.

mod candidate;
mod registry;

use std::io;
use std::net::TcpListener;

use tracing::{debug, info};

use crate::error::FixtureError;

pub use candidate::{port_base, seeded_candidate};
pub use registry::PortRegistry;

/// Outer attempts made by the default allocator.
pub const PORT_RETRIES: u32 = 40;
/// Ceiling the hashed offset is subtracted from.
pub const PORT_SEED: u16 = 65535;

/// Returns a TCP port that was free when last bound.
///
/// Each of the `retries` attempts draws a candidate; a candidate found in
/// `exclude_ports` is re-drawn at most `exclude_ports.len()` times, after
/// which it is tried regardless. Every attempt runs even after a success
/// and the port from the *last* successful bind is returned.
pub fn get_free_port<F>(exclude_ports: &[u16], retries: u32, mut candidate: F) -> Result<u16, FixtureError>
where
    F: FnMut() -> u16,
{
    let mut returned = None;

    for _ in 0..retries {
        let mut port = candidate();

        let mut exclude_retries = exclude_ports.len();
        while exclude_retries > 0 && exclude_ports.contains(&port) {
            port = candidate();
            exclude_retries -= 1;
        }

        match try_bind(port) {
            Ok(()) => returned = Some(port),
            Err(e) => {
                debug!(port, error = %e, "port not free, retrying with another port");
            }
        }
    }

    match returned {
        Some(port) => {
            info!(port, "found free port");
            Ok(port)
        }
        None => Err(FixtureError::NoFreePort { retries }),
    }
}

fn try_bind(port: u16) -> io::Result<()> {
    if port == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "port 0 is not a fixed port",
        ));
    }
    TcpListener::bind(("0.0.0.0", port)).map(drop)
}

#[cfg(test)]
pub(crate) mod test_ports {
    use std::net::TcpListener;

    /// Ports the OS considered free a moment ago.
    pub fn ephemeral_ports(count: usize) -> Vec<u16> {
        let listeners: Vec<TcpListener> = (0..count)
            .map(|_| TcpListener::bind(("0.0.0.0", 0)).unwrap())
            .collect();
        listeners
            .iter()
            .map(|l| l.local_addr().unwrap().port())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_ports::ephemeral_ports;
    use super::*;
    use std::cell::Cell;

    fn sequence(ports: Vec<u16>) -> impl FnMut() -> u16 {
        let next = Cell::new(0usize);
        move || {
            let i = next.get();
            next.set(i + 1);
            ports[i % ports.len()]
        }
    }

    #[test]
    fn test_returns_free_candidate() {
        let ports = ephemeral_ports(1);
        let port = get_free_port(&[], 1, sequence(ports.clone())).unwrap();
        assert_eq!(port, ports[0]);
    }

    #[test]
    fn test_last_successful_bind_wins() {
        let ports = ephemeral_ports(2);
        let port = get_free_port(&[], 2, sequence(ports.clone())).unwrap();
        assert_eq!(port, ports[1]);
    }

    #[test]
    fn test_earlier_success_survives_later_failures() {
        let free = ephemeral_ports(1)[0];
        let busy = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let busy_port = busy.local_addr().unwrap().port();

        let port = get_free_port(&[], 3, sequence(vec![free, busy_port, busy_port])).unwrap();
        assert_eq!(port, free);
    }

    #[test]
    fn test_no_free_port_when_every_candidate_is_bound() {
        let busy = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let busy_port = busy.local_addr().unwrap().port();

        let result = get_free_port(&[], 5, || busy_port);
        assert!(matches!(result, Err(FixtureError::NoFreePort { retries: 5 })));
    }

    #[test]
    fn test_zero_retries_fails() {
        let result = get_free_port(&[], 0, || 40000);
        assert!(matches!(result, Err(FixtureError::NoFreePort { retries: 0 })));
    }

    #[test]
    fn test_excluded_candidate_is_redrawn() {
        let ports = ephemeral_ports(2);
        let excluded = ports[0];
        let port = get_free_port(&[excluded], 1, sequence(ports.clone())).unwrap();
        assert_eq!(port, ports[1]);
    }

    #[test]
    fn test_empty_exclude_list_draws_once_per_attempt() {
        let ports = ephemeral_ports(1);
        let draws = Cell::new(0u32);
        let port = get_free_port(&[], 3, || {
            draws.set(draws.get() + 1);
            ports[0]
        })
        .unwrap();
        assert_eq!(port, ports[0]);
        assert_eq!(draws.get(), 3);
    }

    #[test]
    fn test_exclusion_is_bounded_by_list_length() {
        // Weak exclusion: a generator stuck on an excluded port is only
        // re-drawn len(exclude) times, then tried anyway.
        let ports = ephemeral_ports(1);
        let draws = Cell::new(0u32);
        let port = get_free_port(&ports, 1, || {
            draws.set(draws.get() + 1);
            ports[0]
        })
        .unwrap();
        assert_eq!(port, ports[0]);
        assert_eq!(draws.get(), 2);
    }

    #[test]
    fn test_port_zero_is_never_returned() {
        let result = get_free_port(&[], 3, || 0);
        assert!(matches!(result, Err(FixtureError::NoFreePort { .. })));
    }
}
