//! Background supervision of a single server process.
//!
//! The child is owned by a detached thread that reaps it, delivers kill
//! requests to it, and posts exactly one [`ExitEvent`] back over a channel.
//! The owner marks shutdowns as expected *before* asking for the kill, so
//! the thread can tell an intentional kill from a crash.
//!
//! Stdin is written and stderr drained on their own threads, so a server
//! that chatters before reading its input never blocks the supervisor.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use server_fixture_common::mutex_lock_or_recover;
use tracing::{debug, error, info};

use super::controller::{ProcessController, UnixProcessController};
use crate::error::FixtureError;

const STDERR_TAIL_LINES: usize = 20;
const STDERR_MAX_LINE_BYTES: usize = 4096;
const REAP_INTERVAL: Duration = Duration::from_millis(50);
/// How long to wait for stderr EOF once the child is reaped. Grandchildren
/// that inherited the pipe can hold it open indefinitely.
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub enum ExitEvent {
    Exited {
        status: ExitStatus,
        stderr_tail: String,
    },
    WaitFailed(String),
}

impl fmt::Display for ExitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitEvent::Exited {
                status,
                stderr_tail,
            } if stderr_tail.is_empty() => write!(f, "{}", status),
            ExitEvent::Exited {
                status,
                stderr_tail,
            } => write!(f, "{}; stderr: {}", status, stderr_tail),
            ExitEvent::WaitFailed(reason) => write!(f, "wait failed: {}", reason),
        }
    }
}

#[derive(Debug)]
enum Request {
    Kill,
}

struct Watch {
    command_line: String,
    hostname: String,
    port: u16,
    expected_exit: Arc<AtomicBool>,
}

impl Watch {
    fn report(&self, event: &ExitEvent) {
        if self.expected_exit.load(Ordering::SeqCst) {
            debug!(
                command = %self.command_line,
                hostname = %self.hostname,
                port = self.port,
                event = %event,
                "server exited"
            );
            return;
        }
        match event {
            ExitEvent::Exited { status, stderr_tail } => error!(
                command = %self.command_line,
                cwd = ?std::env::current_dir().ok(),
                hostname = %self.hostname,
                port = self.port,
                status = %status,
                stderr = %stderr_tail,
                "server exited unexpectedly"
            ),
            ExitEvent::WaitFailed(reason) => error!(
                command = %self.command_line,
                hostname = %self.hostname,
                port = self.port,
                error = %reason,
                "failed waiting on server process"
            ),
        }
    }
}

/// Last lines of a stream, with every line capped in length.
#[derive(Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    partial: Vec<u8>,
}

impl StderrTail {
    fn feed(&mut self, mut chunk: &[u8]) {
        while let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
            self.extend_partial(&chunk[..pos]);
            self.end_line();
            chunk = &chunk[pos + 1..];
        }
        self.extend_partial(chunk);
    }

    fn extend_partial(&mut self, bytes: &[u8]) {
        let room = STDERR_MAX_LINE_BYTES.saturating_sub(self.partial.len());
        self.partial.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    fn end_line(&mut self) {
        let line = String::from_utf8_lossy(&self.partial)
            .trim_end_matches('\r')
            .to_string();
        self.partial.clear();
        if self.lines.len() == STDERR_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn render(&self) -> String {
        let mut out: Vec<String> = self.lines.iter().cloned().collect();
        if !self.partial.is_empty() {
            out.push(String::from_utf8_lossy(&self.partial).into_owned());
        }
        out.join("\n")
    }
}

struct StderrCapture {
    tail: Arc<Mutex<StderrTail>>,
    eof: Receiver<()>,
}

impl StderrCapture {
    fn start(mut pipe: ChildStderr, port: u16) -> io::Result<Self> {
        let tail = Arc::new(Mutex::new(StderrTail::default()));
        let (eof_tx, eof) = mpsc::channel();
        let shared = Arc::clone(&tail);
        thread::Builder::new()
            .name(format!("server-{}-stderr", port))
            .spawn(move || {
                let mut buf = [0u8; 8192];
                loop {
                    match pipe.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => mutex_lock_or_recover(&shared).feed(&buf[..n]),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            debug!(port, error = %e, "stderr read failed");
                            break;
                        }
                    }
                }
                let _ = eof_tx.send(());
            })?;
        Ok(Self { tail, eof })
    }

    fn finish(self, grace: Duration) -> String {
        if self.eof.recv_timeout(grace).is_err() {
            debug!("stderr still open after exit, using what was read");
        }
        mutex_lock_or_recover(&self.tail).render()
    }
}

fn feed_stdin(mut pipe: ChildStdin, payload: Vec<u8>, port: u16) -> io::Result<()> {
    thread::Builder::new()
        .name(format!("server-{}-stdin", port))
        .spawn(move || {
            if let Err(e) = pipe.write_all(&payload) {
                debug!(port, error = %e, "server closed stdin early");
            }
        })?;
    Ok(())
}

fn abandon(mut child: Child, err: io::Error) -> FixtureError {
    let _ = child.kill();
    let _ = child.wait();
    FixtureError::Io(err)
}

/// A running (or recently exited) server child process.
#[derive(Debug)]
pub struct ServerProcess {
    pid: u32,
    command: Vec<String>,
    hostname: String,
    port: u16,
    expected_exit: Arc<AtomicBool>,
    requests: Sender<Request>,
    events: Receiver<ExitEvent>,
    exit: Option<ExitEvent>,
}

impl ServerProcess {
    /// Spawns `command` and hands it to a background supervisor thread.
    ///
    /// With `debug` set the child shares this process's stdout/stderr.
    /// Otherwise stdout is discarded and the tail of stderr is kept for the
    /// exit report.
    pub fn spawn(
        hostname: &str,
        port: u16,
        command: Vec<String>,
        stdin: Option<Vec<u8>>,
        debug: bool,
        cwd: &Path,
    ) -> Result<Self, FixtureError> {
        let (program, args) = command.split_first().ok_or(FixtureError::EmptyCommand)?;
        let command_line = command.join(" ");
        info!(command = %command_line, cwd = %cwd.display(), hostname, port, "running server");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(cwd);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        if !debug {
            cmd.stdout(Stdio::null()).stderr(Stdio::piped());
        }

        let mut child = cmd.spawn().map_err(|source| FixtureError::Spawn {
            command: command_line.clone(),
            source,
        })?;
        let pid = child.id();

        let capture = match child.stderr.take() {
            Some(pipe) => match StderrCapture::start(pipe, port) {
                Ok(capture) => Some(capture),
                Err(e) => return Err(abandon(child, e)),
            },
            None => None,
        };
        if let (Some(pipe), Some(payload)) = (child.stdin.take(), stdin) {
            if let Err(e) = feed_stdin(pipe, payload, port) {
                return Err(abandon(child, e));
            }
        }

        let expected_exit = Arc::new(AtomicBool::new(false));
        let watch = Watch {
            command_line,
            hostname: hostname.to_string(),
            port,
            expected_exit: Arc::clone(&expected_exit),
        };
        let (requests, request_rx) = mpsc::channel();
        let (tx, events) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name(format!("server-{}", port))
            .spawn(move || {
                let event = supervise(child, &request_rx, capture, &watch);
                let _ = tx.send(event);
            });
        if let Err(e) = spawned {
            // The child went down with the closure unreaped, so the pid is still ours.
            if let Err(kill_err) = UnixProcessController.kill(pid) {
                debug!(pid, error = %kill_err, "could not kill orphaned server");
            }
            return Err(FixtureError::Io(e));
        }

        Ok(Self {
            pid,
            command,
            hostname: hostname.to_string(),
            port,
            expected_exit,
            requests,
            events,
            exit: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Marks the next exit as intentional.
    pub fn expect_exit(&self) {
        self.expected_exit.store(true, Ordering::SeqCst);
    }

    pub fn is_exit_expected(&self) -> bool {
        self.expected_exit.load(Ordering::SeqCst)
    }

    /// Returns the exit event if the supervisor has posted one.
    pub fn try_exit(&mut self) -> Option<&ExitEvent> {
        if self.exit.is_none() {
            match self.events.try_recv() {
                Ok(event) => self.exit = Some(event),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.exit = Some(ExitEvent::WaitFailed(
                        "supervisor thread ended without reporting".to_string(),
                    ));
                }
            }
        }
        self.exit.as_ref()
    }

    /// Blocks up to `timeout` for the exit event.
    pub fn wait_exit(&mut self, timeout: Duration) -> Option<&ExitEvent> {
        if self.exit.is_none() {
            match self.events.recv_timeout(timeout) {
                Ok(event) => self.exit = Some(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.exit = Some(ExitEvent::WaitFailed(
                        "supervisor thread ended without reporting".to_string(),
                    ));
                }
            }
        }
        self.exit.as_ref()
    }

    /// Flags the exit as expected, then asks the supervisor to SIGKILL the
    /// direct child.
    ///
    /// The supervisor owns the unreaped child, so the kill can never reach
    /// a recycled pid.
    pub fn terminate(&mut self) {
        self.expect_exit();
        if self.try_exit().is_some() {
            return;
        }
        if self.requests.send(Request::Kill).is_err() {
            debug!(pid = self.pid, "supervisor already finished");
        }
    }
}

fn supervise(
    mut child: Child,
    requests: &Receiver<Request>,
    capture: Option<StderrCapture>,
    watch: &Watch,
) -> ExitEvent {
    let waited = reap(&mut child, requests, watch.port);
    let stderr_tail = capture
        .map(|c| c.finish(STDERR_DRAIN_GRACE))
        .unwrap_or_default();

    let event = match waited {
        Ok(status) => ExitEvent::Exited {
            status,
            stderr_tail,
        },
        Err(e) => ExitEvent::WaitFailed(e.to_string()),
    };
    watch.report(&event);
    event
}

fn reap(child: &mut Child, requests: &Receiver<Request>, port: u16) -> io::Result<ExitStatus> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        match requests.recv_timeout(REAP_INTERVAL) {
            Ok(Request::Kill) => {
                if let Err(e) = child.kill() {
                    debug!(port, error = %e, "could not kill server process");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            // Handle dropped; nobody can ask for a kill any more.
            Err(RecvTimeoutError::Disconnected) => return child.wait(),
        }
    }
}
