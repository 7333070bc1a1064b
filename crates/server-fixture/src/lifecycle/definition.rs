use crate::error::FixtureError;
use crate::workspace::Workspace;

/// What a hook or command builder knows about the server being launched.
#[derive(Debug, Clone, Copy)]
pub struct ServerContext<'a> {
    pub hostname: &'a str,
    pub port: u16,
    pub workspace: &'a Workspace,
}

impl<'a> ServerContext<'a> {
    pub fn new(hostname: &'a str, port: u16, workspace: &'a Workspace) -> Self {
        Self {
            hostname,
            port,
            workspace,
        }
    }
}

/// A kind of server: how to launch it and what to do around the launch.
///
/// Only `name` and `run_cmd` are required. `name` is mixed into the port
/// hash, so two server kinds run by the same user land in different port
/// ranges.
pub trait ServerDefinition {
    fn name(&self) -> &str;

    fn run_cmd(&self, ctx: &ServerContext<'_>) -> Vec<String>;

    /// Bytes written once to the server's stdin.
    fn run_stdin(&self, _ctx: &ServerContext<'_>) -> Option<Vec<u8>> {
        None
    }

    fn pre_setup(&mut self, _ctx: &ServerContext<'_>) -> Result<(), FixtureError> {
        Ok(())
    }

    fn post_setup(&mut self, _ctx: &ServerContext<'_>) -> Result<(), FixtureError> {
        Ok(())
    }

    /// Captures state that `restore` can later put back.
    fn save(&mut self, _ctx: &ServerContext<'_>) -> Result<(), FixtureError> {
        Ok(())
    }

    fn restore(&mut self, _ctx: &ServerContext<'_>) -> Result<(), FixtureError> {
        Ok(())
    }
}

/// A server launched from an argv template.
///
/// `{host}`, `{port}` and `{workspace}` in any argument are replaced with
/// the values the fixture was started with.
#[derive(Debug, Clone)]
pub struct CommandServer {
    name: String,
    argv: Vec<String>,
    stdin: Option<Vec<u8>>,
}

impl CommandServer {
    pub fn new<I, S>(name: impl Into<String>, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            argv: argv.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl ServerDefinition for CommandServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_cmd(&self, ctx: &ServerContext<'_>) -> Vec<String> {
        let port = ctx.port.to_string();
        let workspace = ctx.workspace.path().display().to_string();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{host}", ctx.hostname)
                    .replace("{port}", &port)
                    .replace("{workspace}", &workspace)
            })
            .collect()
    }

    fn run_stdin(&self, _ctx: &ServerContext<'_>) -> Option<Vec<u8>> {
        self.stdin.clone()
    }
}
