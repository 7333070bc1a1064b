#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener, TcpStream};
use std::time::Duration;

use assert_cmd::Command;
use server_fixture::listeners::default_listener_table;
use server_fixture::{FixtureConfig, ListenerTable, PollPolicy};

pub const HOST: &str = "127.0.0.1";

pub fn server_fixture_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("server-fixture"))
}

pub fn echo_server_bin() -> String {
    env!("CARGO_BIN_EXE_fixture-echo-server").to_string()
}

/// Config with short kill and poll intervals so failures surface quickly.
pub fn fast_config() -> FixtureConfig {
    FixtureConfig::default()
        .with_kill_interval(Duration::from_millis(200))
        .with_poll_policy(PollPolicy {
            start_interval: Duration::from_millis(20),
            retries_per_interval: 3,
            retry_limit: 21,
        })
}

pub fn port_is_free(port: u16) -> bool {
    TcpListener::bind((HOST, port)).is_ok()
}

pub fn listeners_on(port: u16) -> Vec<String> {
    default_listener_table()
        .listener_pids(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
        .unwrap()
}

/// Sends `payload` and returns whatever comes back before the server
/// closes the connection.
pub fn request(port: u16, payload: &[u8]) -> Option<String> {
    let mut stream = TcpStream::connect((HOST, port)).ok()?;
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .ok()?;
    stream.write_all(payload).ok()?;
    let mut reply = String::new();
    stream.read_to_string(&mut reply).ok()?;
    Some(reply)
}
