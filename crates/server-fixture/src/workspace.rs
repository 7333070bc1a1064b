//! Scratch directory a server runs in, plus a small shell runner.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::FixtureError;

#[derive(Debug)]
enum Root {
    Temp(TempDir),
    Borrowed(PathBuf),
    Removed(PathBuf),
}

/// Working directory owned by a fixture.
///
/// A workspace created with [`Workspace::new`] is deleted on teardown; one
/// wrapping an existing directory with [`Workspace::at`] is left in place.
#[derive(Debug)]
pub struct Workspace {
    root: Root,
}

impl Workspace {
    pub fn new() -> Result<Self, FixtureError> {
        let dir = tempfile::Builder::new()
            .prefix("server-fixture-")
            .tempdir()?;
        debug!(path = %dir.path().display(), "created workspace");
        Ok(Self {
            root: Root::Temp(dir),
        })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            root: Root::Borrowed(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        match &self.root {
            Root::Temp(dir) => dir.path(),
            Root::Borrowed(path) | Root::Removed(path) => path,
        }
    }

    /// Runs `command` through `sh -c` inside the workspace.
    pub fn run(&self, command: &str, capture: bool, check_rc: bool) -> Result<String, FixtureError> {
        run_shell(command, capture, check_rc, Some(self.path()))
    }

    /// Deletes a temporary workspace. Safe to call more than once.
    pub fn teardown(&mut self) -> Result<(), FixtureError> {
        if !matches!(self.root, Root::Temp(_)) {
            return Ok(());
        }
        let path = self.path().to_path_buf();
        if let Root::Temp(dir) = std::mem::replace(&mut self.root, Root::Removed(path)) {
            debug!(path = %dir.path().display(), "removing workspace");
            dir.close()?;
        }
        Ok(())
    }
}

/// Runs `command` with `sh -c`.
///
/// With `capture` the child's stdout is returned, otherwise it goes to this
/// process's stdout and an empty string is returned. With `check_rc` a
/// non-zero exit is an error carrying the child's stderr.
pub fn run_shell(
    command: &str,
    capture: bool,
    check_rc: bool,
    cwd: Option<&Path>,
) -> Result<String, FixtureError> {
    debug!(command, "running shell command");

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).stdin(Stdio::null());
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    cmd.stdout(if capture {
        Stdio::piped()
    } else {
        Stdio::inherit()
    });
    cmd.stderr(Stdio::piped());

    let output = cmd.output()?;
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
        if check_rc {
            return Err(FixtureError::CommandFailed {
                command: command.to_string(),
                status: output.status,
                stderr,
            });
        }
        warn!(command, status = %output.status, stderr = %stderr, "shell command failed");
    }

    if capture {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Ok(String::new())
    }
}
