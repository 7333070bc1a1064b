use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::commands::{CheckKind, OutputFormat};
use crate::common::ShutdownSignal;
use crate::config::FixtureConfig;
use crate::error::FixtureError;
use crate::lifecycle::{kill_listeners, CommandServer, KillTarget, TestServer};
use crate::listeners::default_listener_table;
use crate::port::{seeded_candidate, PortRegistry};
use crate::process::UnixProcessController;
use crate::readiness::HttpCheck;
use crate::sleeper::RealSleeper;
use crate::workspace::Workspace;

pub type HandlerResult = Result<(), FixtureError>;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

fn output_json_or<T, F>(format: OutputFormat, value: &T, text_fn: F) -> HandlerResult
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)
                .map_err(|e| FixtureError::Io(std::io::Error::other(e)))?;
            println!("{}", json);
        }
        OutputFormat::Text => text_fn(),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct RunningServer {
    hostname: String,
    port: u16,
    address: String,
    pid: Option<u32>,
    workspace: PathBuf,
    command: String,
}

#[derive(Debug, Serialize)]
struct KilledPort {
    hostname: String,
    port: u16,
    cycles: u32,
}

pub struct RunArgs {
    pub host: String,
    pub port: Option<u16>,
    pub name: String,
    pub check: CheckKind,
    pub uri: Option<String>,
    pub stdin_file: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
    pub command: Vec<String>,
}

/// Starts the server, reports where it listens, and keeps it up until a
/// shutdown signal arrives or the server dies on its own.
pub fn handle_run(format: OutputFormat, args: RunArgs) -> HandlerResult {
    let mut definition = CommandServer::new(args.name, args.command);
    if let Some(path) = &args.stdin_file {
        definition = definition.with_stdin(fs::read(path)?);
    }

    let mut builder = TestServer::builder(definition)
        .hostname(args.host)
        .config(FixtureConfig::from_env());
    if let Some(port) = args.port {
        builder = builder.port(port);
    }
    if let Some(dir) = args.workspace {
        builder = builder.workspace(Workspace::at(dir));
    }
    if args.check == CheckKind::Http {
        builder = builder.check(match args.uri {
            Some(uri) => HttpCheck::with_uri(uri),
            None => HttpCheck::default(),
        });
    }

    let shutdown = ShutdownSignal::install()?;
    let mut server = builder.start()?;

    let running = RunningServer {
        hostname: server.hostname().to_string(),
        port: server.port(),
        address: server.address(),
        pid: server.pid(),
        workspace: server.workspace().path().to_path_buf(),
        command: server.command_line(),
    };
    output_json_or(format, &running, || match running.pid {
        Some(pid) => println!("listening on {} (pid {})", running.address, pid),
        None => println!("listening on {}", running.address),
    })?;

    while !shutdown.is_requested() {
        let exited = server
            .process_mut()
            .and_then(|process| process.try_exit())
            .map(ToString::to_string);
        if let Some(status) = exited {
            warn!(port = running.port, status = %status, "server exited while running");
            let command = server.command_line();
            server.teardown()?;
            return Err(FixtureError::ProcessExited {
                command,
                hostname: running.hostname,
                port: running.port,
                status,
            });
        }
        thread::sleep(SHUTDOWN_POLL);
    }

    server.teardown()
}

pub fn handle_port(format: OutputFormat, name: &str, count: usize) -> HandlerResult {
    let config = FixtureConfig::from_env();
    let registry = PortRegistry::new();
    let mut ports = Vec::with_capacity(count);
    for _ in 0..count {
        let candidate = seeded_candidate(&config.user, name, config.port_seed);
        ports.push(registry.allocate(config.port_retries, candidate)?);
    }

    output_json_or(format, &ports, || {
        for port in &ports {
            println!("{}", port);
        }
    })
}

pub fn handle_kill(
    format: OutputFormat,
    host: String,
    port: u16,
    retries: Option<u32>,
) -> HandlerResult {
    let config = FixtureConfig::from_env();
    let target = KillTarget {
        hostname: &host,
        port,
        retries: retries.unwrap_or(config.kill_retries),
        interval: config.kill_interval,
    };
    let cycles = kill_listeners(
        &target,
        default_listener_table().as_ref(),
        &UnixProcessController,
        &RealSleeper,
    )?;

    let killed = KilledPort {
        hostname: host.clone(),
        port,
        cycles,
    };
    output_json_or(format, &killed, || {
        if cycles == 0 {
            println!("nothing listening on {}:{}", host, port);
        } else {
            println!("{}:{} is free", host, port);
        }
    })
}
