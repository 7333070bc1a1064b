//! Lifecycle controller: owns one server from port allocation to teardown.

mod definition;
mod kill;
mod server;

pub use definition::{CommandServer, ServerContext, ServerDefinition};
pub use kill::resolve_host;
pub use server::{TestServer, TestServerBuilder};

pub(crate) use kill::{kill_listeners, KillTarget};

/// Where a [`TestServer`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Built, nothing launched yet.
    Unstarted,
    /// Spawned, waiting for the liveness check.
    Starting,
    Live,
    /// No process listens on the port.
    Dead,
}
