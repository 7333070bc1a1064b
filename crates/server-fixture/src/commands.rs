use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

use crate::config::DEFAULT_HOSTNAME;

const LONG_ABOUT: &str = r#"server-fixture runs a server process for the length of a test session.

It picks a free port, starts the server in a scratch workspace, waits until
the server accepts connections and, when stopped, kills every process still
listening on the port.

EXAMPLES:
    # Start a server on an allocated port, stop it with Ctrl-C
    server-fixture run -- redis-server --port {port} --dir {workspace}

    # Print three ports for a server kind
    server-fixture port --name Postgres --count 3

    # Clear a port left behind by a crashed test run
    server-fixture kill --port 6380

ENVIRONMENT:
    DEBUG                         Let the server write to this terminal
    RUST_LOG                      Log filter (default: warn)
    SERVER_FIXTURE_LOG            Write logs to this file instead of stderr
    SERVER_FIXTURE_KILL_RETRIES   Kill cycles before giving up (default: 5)"#;

#[derive(Parser)]
#[command(name = "server-fixture")]
#[command(author, version)]
#[command(about = "Launch and reliably tear down server processes for tests")]
#[command(long_about = LONG_ABOUT)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Output as JSON (shorthand for --format json)
    #[arg(long, global = true)]
    pub json: bool,
}

impl Cli {
    pub fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a server and keep it running until interrupted
    #[command(long_about = r#"Start a server and keep it running until interrupted.

{host}, {port} and {workspace} in the command are replaced before launch.
The address is printed once the liveness check passes. SIGINT or SIGTERM
kills the server and removes the workspace."#)]
    Run {
        /// Interface the server binds to
        #[arg(long, default_value = DEFAULT_HOSTNAME)]
        host: String,

        /// Fixed port (default: allocate one)
        #[arg(short, long)]
        port: Option<u16>,

        /// Server kind, mixed into the port hash
        #[arg(long, default_value = "server")]
        name: String,

        /// How to decide the server is up
        #[arg(long, value_enum, default_value = "tcp")]
        check: CheckKind,

        /// URI for --check http (default: http://HOST:PORT)
        #[arg(long)]
        uri: Option<String>,

        /// File whose contents are written to the server's stdin
        #[arg(long)]
        stdin_file: Option<PathBuf>,

        /// Existing directory to run in (default: a temporary one)
        #[arg(short = 'd', long)]
        workspace: Option<PathBuf>,

        /// Server command line
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Print free ports from the seeded allocator
    Port {
        /// Server kind, mixed into the port hash
        #[arg(long, default_value = "server")]
        name: String,

        /// Number of distinct ports
        #[arg(short, long, default_value = "1")]
        count: usize,
    },

    /// Kill every process listening on a port
    Kill {
        #[arg(long, default_value = DEFAULT_HOSTNAME)]
        host: String,

        #[arg(short, long)]
        port: u16,

        /// Kill cycles before giving up (default: SERVER_FIXTURE_KILL_RETRIES or 5)
        #[arg(long)]
        retries: Option<u32>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum, Default, PartialEq)]
pub enum CheckKind {
    /// A TCP connection is accepted
    #[default]
    Tcp,
    /// An HTTP GET returns a success status
    Http,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::parse_from(["server-fixture", "run", "--", "redis-server", "--port", "{port}"]);
        let Commands::Run {
            host,
            port,
            name,
            check,
            uri,
            stdin_file,
            workspace,
            command,
        } = cli.command
        else {
            panic!("Expected Run command, got {:?}", cli.command);
        };
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, None);
        assert_eq!(name, "server");
        assert_eq!(check, CheckKind::Tcp);
        assert!(uri.is_none());
        assert!(stdin_file.is_none());
        assert!(workspace.is_none());
        assert_eq!(command, vec!["redis-server", "--port", "{port}"]);
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_run_options() {
        let cli = Cli::parse_from([
            "server-fixture",
            "--json",
            "run",
            "--host",
            "localhost",
            "-p",
            "8080",
            "--check",
            "http",
            "--uri",
            "http://localhost:8080/health",
            "python3",
            "-m",
            "http.server",
        ]);
        assert_eq!(cli.effective_format(), OutputFormat::Json);
        let Commands::Run {
            port,
            check,
            uri,
            command,
            ..
        } = cli.command
        else {
            panic!("Expected Run command");
        };
        assert_eq!(port, Some(8080));
        assert_eq!(check, CheckKind::Http);
        assert_eq!(uri.as_deref(), Some("http://localhost:8080/health"));
        assert_eq!(command, vec!["python3", "-m", "http.server"]);
    }

    #[test]
    fn test_run_requires_command() {
        assert!(Cli::try_parse_from(["server-fixture", "run"]).is_err());
    }

    #[test]
    fn test_port_defaults() {
        let cli = Cli::parse_from(["server-fixture", "port"]);
        let Commands::Port { name, count } = cli.command else {
            panic!("Expected Port command");
        };
        assert_eq!(name, "server");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_kill_requires_port() {
        assert!(Cli::try_parse_from(["server-fixture", "kill"]).is_err());
        let cli = Cli::parse_from(["server-fixture", "kill", "--port", "6380", "--retries", "2"]);
        let Commands::Kill {
            host,
            port,
            retries,
        } = cli.command
        else {
            panic!("Expected Kill command");
        };
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 6380);
        assert_eq!(retries, Some(2));
    }
}
