//! Test fixtures for external server processes.
//!
//! A [`TestServer`] picks a port, launches the server in a scratch
//! workspace, waits until it answers, and on teardown kills every process
//! still listening on that port.

#![deny(clippy::all)]

pub mod commands;
pub mod common;
pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod listeners;
pub mod port;
pub mod process;
pub mod readiness;
pub mod sleeper;
#[cfg(test)]
pub(crate) mod test_support;
pub mod workspace;

pub use config::FixtureConfig;
pub use config::DEFAULT_HOSTNAME;
pub use error::FixtureError;
pub use lifecycle::CommandServer;
pub use lifecycle::ServerContext;
pub use lifecycle::ServerDefinition;
pub use lifecycle::ServerState;
pub use lifecycle::TestServer;
pub use lifecycle::TestServerBuilder;
pub use listeners::ListenerTable;
pub use port::get_free_port;
pub use port::PortRegistry;
pub use process::ServerProcess;
pub use readiness::wait_for_ready;
pub use readiness::HttpCheck;
pub use readiness::LivenessCheck;
pub use readiness::PollPolicy;
pub use readiness::TcpConnectCheck;
pub use readiness::TcpExchangeCheck;
pub use workspace::Workspace;
