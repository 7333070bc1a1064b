use std::time::Duration;

use server_fixture_common::{env_flag, env_parse, env_string};

use crate::port::{PORT_RETRIES, PORT_SEED};
use crate::readiness::PollPolicy;

pub const DEFAULT_HOSTNAME: &str = "127.0.0.1";
const DEFAULT_KILL_RETRIES: u32 = 5;
const DEFAULT_KILL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct FixtureConfig {
    /// Let the child inherit stdout/stderr instead of capturing them.
    pub debug: bool,
    /// User identity mixed into the port hash.
    pub user: String,
    pub port_seed: u16,
    pub port_retries: u32,
    pub kill_retries: u32,
    pub kill_interval: Duration,
    pub poll: PollPolicy,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl FixtureConfig {
    pub fn from_env() -> Self {
        let defaults = PollPolicy::default();
        Self {
            debug: env_flag("DEBUG"),
            user: env_string("USER")
                .or_else(|| env_string("USERNAME"))
                .unwrap_or_else(|| "unknown".to_string()),
            port_seed: env_parse("SERVER_FIXTURE_PORT_SEED").unwrap_or(PORT_SEED),
            port_retries: env_parse("SERVER_FIXTURE_PORT_RETRIES").unwrap_or(PORT_RETRIES),
            kill_retries: env_parse("SERVER_FIXTURE_KILL_RETRIES").unwrap_or(DEFAULT_KILL_RETRIES),
            kill_interval: Duration::from_millis(
                env_parse("SERVER_FIXTURE_KILL_INTERVAL_MS").unwrap_or(DEFAULT_KILL_INTERVAL_MS),
            ),
            poll: PollPolicy {
                start_interval: env_parse::<u64>("SERVER_FIXTURE_POLL_INTERVAL_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.start_interval),
                retries_per_interval: env_parse("SERVER_FIXTURE_POLL_RETRIES_PER_INTERVAL")
                    .unwrap_or(defaults.retries_per_interval),
                retry_limit: env_parse("SERVER_FIXTURE_POLL_RETRY_LIMIT")
                    .unwrap_or(defaults.retry_limit),
            },
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_port_seed(mut self, seed: u16) -> Self {
        self.port_seed = seed;
        self
    }

    pub fn with_port_retries(mut self, retries: u32) -> Self {
        self.port_retries = retries;
        self
    }

    pub fn with_kill_retries(mut self, retries: u32) -> Self {
        self.kill_retries = retries;
        self
    }

    pub fn with_kill_interval(mut self, interval: Duration) -> Self {
        self.kill_interval = interval;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }
}
