//! Minimal TCP server used to exercise fixtures end to end.
//!
//! Answers every connection with a fixed reply, or with whatever was
//! written to its stdin when `--reply-stdin` is set.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info};

use server_fixture::common::telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "fixture-echo-server")]
#[command(about = "TCP server that answers each connection with a fixed reply")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long)]
    port: u16,

    /// Reply with the contents of stdin instead of "OK"
    #[arg(long)]
    reply_stdin: bool,

    /// Wait this long before binding
    #[arg(long, default_value = "0")]
    delay_ms: u64,
}

fn serve(mut stream: TcpStream, reply: &[u8]) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;
    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf)?;
    if n > 0 {
        stream.write_all(reply)?;
    }
    Ok(())
}

fn main() -> std::io::Result<()> {
    let _telemetry = init_tracing("info");
    let args = Args::parse();

    let reply = if args.reply_stdin {
        let mut input = Vec::new();
        std::io::stdin().read_to_end(&mut input)?;
        input
    } else {
        b"OK\n".to_vec()
    };

    if args.delay_ms > 0 {
        thread::sleep(Duration::from_millis(args.delay_ms));
    }

    let listener = TcpListener::bind((args.host.as_str(), args.port))?;
    info!(host = %args.host, port = args.port, pid = std::process::id(), "echo server listening");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if let Err(e) = serve(stream, &reply) {
                    debug!(error = %e, "connection dropped");
                }
            }
            Err(e) => debug!(error = %e, "accept failed"),
        }
    }
    Ok(())
}
