use clap::Parser;

use server_fixture::commands::Cli;
use server_fixture::commands::Commands;
use server_fixture::common::telemetry::init_tracing;
use server_fixture::handlers;
use server_fixture::handlers::RunArgs;
use server_fixture::FixtureError;

fn main() {
    let _telemetry = init_tracing("warn");

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        if !e.is_fatal() {
            eprintln!("(This error may be transient - retry may succeed)");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<(), FixtureError> {
    let cli = Cli::parse();
    let format = cli.effective_format();

    match cli.command {
        Commands::Run {
            host,
            port,
            name,
            check,
            uri,
            stdin_file,
            workspace,
            command,
        } => handlers::handle_run(
            format,
            RunArgs {
                host,
                port,
                name,
                check,
                uri,
                stdin_file,
                workspace,
                command,
            },
        ),
        Commands::Port { name, count } => handlers::handle_port(format, &name, count),
        Commands::Kill {
            host,
            port,
            retries,
        } => handlers::handle_kill(format, host, port, retries),
    }
}
