//! Errors raised while allocating, starting, polling or killing a server.
//!
//! Every variant carries the context needed to diagnose a broken test
//! environment without re-running it: the command line, the host/port
//! and, for timeouts, the wall-clock time spent.

use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("no free port found after {retries} attempts")]
    NoFreePort { retries: u32 },

    #[error("start interval must be positive")]
    InvalidInterval,

    #[error("server failed to start up after waiting {elapsed:?} ({checks} checks), giving up")]
    ReadinessTimeout { elapsed: Duration, checks: u32 },

    #[error("cannot start a server from an empty command line")]
    EmptyCommand,

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server `{command}` on {hostname}:{port} exited during startup ({status})")]
    ProcessExited {
        command: String,
        hostname: String,
        port: u16,
        status: String,
    },

    #[error("failed to start server `{command}` on {hostname}:{port}: {source}")]
    StartupFailed {
        command: String,
        hostname: String,
        port: u16,
        #[source]
        source: Box<FixtureError>,
    },

    #[error("server on {hostname}:{port} not dead after {retries} retries")]
    KillExhausted {
        hostname: String,
        port: u16,
        retries: u32,
    },

    #[error("failed to resolve host {hostname}: {reason}")]
    Resolve { hostname: String, reason: String },

    #[error("command `{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{stage} hook failed: {message}")]
    Hook { stage: &'static str, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FixtureError {
    /// Builds a hook failure from any displayable error.
    pub fn hook(stage: &'static str, err: impl std::fmt::Display) -> Self {
        FixtureError::Hook {
            stage,
            message: err.to_string(),
        }
    }

    /// Returns whether this error leaves the test environment unusable.
    /// Resolution and plain I/O failures are the retryable ones.
    pub fn is_fatal(&self) -> bool {
        match self {
            FixtureError::Resolve { .. } | FixtureError::Io(_) => false,
            FixtureError::StartupFailed { source, .. } => source.is_fatal(),
            _ => true,
        }
    }

    /// Returns the innermost error, unwrapping startup failures.
    pub fn root(&self) -> &FixtureError {
        match self {
            FixtureError::StartupFailed { source, .. } => source.root(),
            other => other,
        }
    }
}
