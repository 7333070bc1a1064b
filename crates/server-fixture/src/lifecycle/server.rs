use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::definition::{ServerContext, ServerDefinition};
use super::kill::{kill_listeners, KillTarget};
use super::ServerState;
use crate::config::{FixtureConfig, DEFAULT_HOSTNAME};
use crate::error::FixtureError;
use crate::listeners::{default_listener_table, ListenerTable};
use crate::port::{seeded_candidate, PortRegistry};
use crate::process::{ProcessController, ServerProcess, UnixProcessController};
use crate::readiness::{wait_for_ready, LivenessCheck, PollPolicy, TcpConnectCheck};
use crate::sleeper::{RealSleeper, Sleeper};
use crate::workspace::Workspace;

/// Configures a [`TestServer`] before it is started.
pub struct TestServerBuilder<D: ServerDefinition> {
    definition: D,
    hostname: Option<String>,
    port: Option<u16>,
    workspace: Option<Workspace>,
    check: Option<Box<dyn LivenessCheck>>,
    config: Option<FixtureConfig>,
    poll: Option<PollPolicy>,
    processes: Option<Arc<dyn ProcessController>>,
    listeners: Option<Arc<dyn ListenerTable>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    registry: Option<Arc<PortRegistry>>,
}

impl<D: ServerDefinition> TestServerBuilder<D> {
    fn new(definition: D) -> Self {
        Self {
            definition,
            hostname: None,
            port: None,
            workspace: None,
            check: None,
            config: None,
            poll: None,
            processes: None,
            listeners: None,
            sleeper: None,
            registry: None,
        }
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Uses `port` instead of allocating one.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn workspace(mut self, workspace: Workspace) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn check(mut self, check: impl LivenessCheck + 'static) -> Self {
        self.check = Some(Box::new(check));
        self
    }

    pub fn config(mut self, config: FixtureConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides the poll policy from the config.
    pub fn poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = Some(poll);
        self
    }

    pub fn process_controller(mut self, processes: Arc<dyn ProcessController>) -> Self {
        self.processes = Some(processes);
        self
    }

    pub fn listener_table(mut self, listeners: Arc<dyn ListenerTable>) -> Self {
        self.listeners = Some(listeners);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn port_registry(mut self, registry: Arc<PortRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Resolves the workspace and port without launching anything.
    ///
    /// The returned server is `Unstarted`; drive it with
    /// [`TestServer::start_server`].
    pub fn build(self) -> Result<TestServer<D>, FixtureError> {
        let config = self.config.unwrap_or_else(FixtureConfig::from_env);
        let workspace = match self.workspace {
            Some(workspace) => workspace,
            None => Workspace::new()?,
        };
        let port = match self.port {
            Some(port) => port,
            None => {
                let registry = self.registry.unwrap_or_else(PortRegistry::global);
                let candidate =
                    seeded_candidate(&config.user, self.definition.name(), config.port_seed);
                registry.allocate(config.port_retries, candidate)?
            }
        };

        Ok(TestServer {
            definition: self.definition,
            hostname: self
                .hostname
                .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string()),
            port,
            state: ServerState::Unstarted,
            process: None,
            workspace,
            check: self
                .check
                .unwrap_or_else(|| Box::new(TcpConnectCheck::default())),
            poll: self.poll.unwrap_or(config.poll),
            processes: self
                .processes
                .unwrap_or_else(|| Arc::new(UnixProcessController)),
            listeners: self.listeners.unwrap_or_else(default_listener_table),
            sleeper: self.sleeper.unwrap_or_else(|| Arc::new(RealSleeper)),
            config,
            torn_down: false,
        })
    }

    /// Builds the server and brings it up.
    ///
    /// Any stale listener on the port is killed first. If a setup hook,
    /// the launch or the readiness wait fails, the server is torn down and
    /// the cause is returned inside [`FixtureError::StartupFailed`].
    pub fn start(self) -> Result<TestServer<D>, FixtureError> {
        let mut server = self.build()?;

        if let Err(e) = server.kill() {
            server.abandon();
            return Err(e);
        }

        if let Err(source) = server.setup() {
            let command = server.command_line();
            if let Err(teardown) = server.teardown() {
                warn!(
                    hostname = %server.hostname,
                    port = server.port,
                    error = %teardown,
                    "teardown after failed startup also failed"
                );
            }
            return Err(FixtureError::StartupFailed {
                command,
                hostname: server.hostname.clone(),
                port: server.port,
                source: Box::new(source),
            });
        }

        Ok(server)
    }
}

/// A server process bound to a port and a workspace for the length of a
/// test.
///
/// Dropping it kills every listener on the port and removes the
/// workspace.
pub struct TestServer<D: ServerDefinition> {
    definition: D,
    hostname: String,
    port: u16,
    state: ServerState,
    process: Option<ServerProcess>,
    workspace: Workspace,
    check: Box<dyn LivenessCheck>,
    config: FixtureConfig,
    poll: PollPolicy,
    processes: Arc<dyn ProcessController>,
    listeners: Arc<dyn ListenerTable>,
    sleeper: Arc<dyn Sleeper>,
    torn_down: bool,
}

impl<D: ServerDefinition> TestServer<D> {
    pub fn builder(definition: D) -> TestServerBuilder<D> {
        TestServerBuilder::new(definition)
    }

    fn setup(&mut self) -> Result<(), FixtureError> {
        self.definition.pre_setup(&ServerContext::new(
            &self.hostname,
            self.port,
            &self.workspace,
        ))?;
        self.start_server()?;
        let ctx = ServerContext::new(&self.hostname, self.port, &self.workspace);
        self.definition.post_setup(&ctx)?;
        self.definition.save(&ctx)
    }

    /// Launches the server and waits until the liveness check passes.
    ///
    /// A server that is still live is killed first.
    #[tracing::instrument(skip(self), fields(hostname = %self.hostname, port = self.port))]
    pub fn start_server(&mut self) -> Result<Duration, FixtureError> {
        if self.state == ServerState::Live {
            self.kill()?;
        }
        self.state = ServerState::Starting;

        let ctx = ServerContext::new(&self.hostname, self.port, &self.workspace);
        let command = self.definition.run_cmd(&ctx);
        let stdin = self.definition.run_stdin(&ctx);
        let process = self.process.insert(ServerProcess::spawn(
            &self.hostname,
            self.port,
            command,
            stdin,
            self.config.debug,
            self.workspace.path(),
        )?);

        let check = self.check.as_ref();
        let hostname = self.hostname.as_str();
        let port = self.port;
        let elapsed = wait_for_ready(
            || {
                if let Some(status) = process.try_exit().map(ToString::to_string) {
                    return Err(FixtureError::ProcessExited {
                        command: process.command_line(),
                        hostname: hostname.to_string(),
                        port,
                        status,
                    });
                }
                Ok(check.check_server_up(hostname, port))
            },
            &self.poll,
            self.sleeper.as_ref(),
        )?;

        self.state = ServerState::Live;
        info!(pid = process.pid(), elapsed = ?elapsed, "server now awake");
        Ok(elapsed)
    }

    pub fn kill(&mut self) -> Result<(), FixtureError> {
        self.kill_with_retries(self.config.kill_retries)
    }

    /// Kills every process listening on the server's port.
    ///
    /// A no-op once the server is `Dead`. If listeners survive `retries`
    /// cycles the state is left as it was, so a later call tries again.
    #[tracing::instrument(skip(self), fields(hostname = %self.hostname, port = self.port))]
    pub fn kill_with_retries(&mut self, retries: u32) -> Result<(), FixtureError> {
        if let Some(process) = self.process.as_mut() {
            process.terminate();
        }
        if self.state == ServerState::Dead {
            return Ok(());
        }

        let target = KillTarget {
            hostname: &self.hostname,
            port: self.port,
            retries,
            interval: self.config.kill_interval,
        };
        kill_listeners(
            &target,
            self.listeners.as_ref(),
            self.processes.as_ref(),
            self.sleeper.as_ref(),
        )?;

        self.state = ServerState::Dead;
        self.process = None;
        Ok(())
    }

    pub fn restart(&mut self) -> Result<Duration, FixtureError> {
        self.kill()?;
        self.start_server()
    }

    /// Kills the server, then removes its workspace. Safe to call more
    /// than once.
    pub fn teardown(&mut self) -> Result<(), FixtureError> {
        if self.torn_down {
            return Ok(());
        }
        let killed = self.kill();
        let cleaned = self.workspace.teardown();
        self.torn_down = true;
        killed.and(cleaned)
    }

    // Startup gave up before anything was launched; only the workspace
    // needs cleaning.
    fn abandon(&mut self) {
        if let Err(e) = self.workspace.teardown() {
            warn!(path = %self.workspace.path().display(), error = %e, "failed to remove workspace");
        }
        self.torn_down = true;
    }

    pub fn restore(&mut self) -> Result<(), FixtureError> {
        let ctx = ServerContext::new(&self.hostname, self.port, &self.workspace);
        self.definition.restore(&ctx)
    }

    pub fn save(&mut self) -> Result<(), FixtureError> {
        let ctx = ServerContext::new(&self.hostname, self.port, &self.workspace);
        self.definition.save(&ctx)
    }

    /// The command line the server is, or would be, launched with.
    pub fn command_line(&self) -> String {
        match &self.process {
            Some(process) => process.command_line(),
            None => {
                let ctx = ServerContext::new(&self.hostname, self.port, &self.workspace);
                self.definition.run_cmd(&ctx).join(" ")
            }
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn uri(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn is_dead(&self) -> bool {
        self.state == ServerState::Dead
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ServerProcess::pid)
    }

    pub fn process_mut(&mut self) -> Option<&mut ServerProcess> {
        self.process.as_mut()
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn definition(&self) -> &D {
        &self.definition
    }

    pub fn definition_mut(&mut self) -> &mut D {
        &mut self.definition
    }
}

impl<D: ServerDefinition> Drop for TestServer<D> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(
                hostname = %self.hostname,
                port = self.port,
                error = %e,
                "failed to tear down server"
            );
        }
    }
}
