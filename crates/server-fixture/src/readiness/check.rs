use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Decides whether a server under test can accept requests.
///
/// Implementations are called repeatedly while polling and must not change
/// any state that a later check depends on.
pub trait LivenessCheck: Send + Sync {
    fn check_server_up(&self, hostname: &str, port: u16) -> bool;
}

impl<F> LivenessCheck for F
where
    F: Fn(&str, u16) -> bool + Send + Sync,
{
    fn check_server_up(&self, hostname: &str, port: u16) -> bool {
        self(hostname, port)
    }
}

fn addresses(hostname: &str, port: u16) -> Vec<SocketAddr> {
    match (hostname, port).to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            debug!(hostname, port, error = %e, "cannot resolve server address");
            Vec::new()
        }
    }
}

fn connect(hostname: &str, port: u16, timeout: Duration) -> Option<TcpStream> {
    for addr in addresses(hostname, port) {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Some(stream),
            Err(e) => debug!(%addr, error = %e, "server not up yet"),
        }
    }
    None
}

/// Up once a TCP connection is accepted.
#[derive(Debug, Clone)]
pub struct TcpConnectCheck {
    pub timeout: Duration,
}

impl Default for TcpConnectCheck {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

impl LivenessCheck for TcpConnectCheck {
    fn check_server_up(&self, hostname: &str, port: u16) -> bool {
        connect(hostname, port, self.timeout).is_some()
    }
}

/// Up once the server answers `request` with a reply starting with `expect`.
#[derive(Debug, Clone)]
pub struct TcpExchangeCheck {
    pub request: Vec<u8>,
    pub expect: Vec<u8>,
    pub timeout: Duration,
}

impl TcpExchangeCheck {
    pub fn new(request: impl Into<Vec<u8>>, expect: impl Into<Vec<u8>>) -> Self {
        Self {
            request: request.into(),
            expect: expect.into(),
            timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn exchange(&self, stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.write_all(&self.request)?;
        stream.flush()?;

        let mut reply = Vec::with_capacity(self.expect.len());
        let mut buf = [0u8; 256];
        while reply.len() < self.expect.len() {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            reply.extend_from_slice(&buf[..n]);
        }
        Ok(reply)
    }
}

impl LivenessCheck for TcpExchangeCheck {
    fn check_server_up(&self, hostname: &str, port: u16) -> bool {
        let Some(mut stream) = connect(hostname, port, self.timeout) else {
            return false;
        };
        match self.exchange(&mut stream) {
            Ok(reply) => {
                let up = reply.starts_with(&self.expect);
                if !up {
                    debug!(
                        reply = %String::from_utf8_lossy(&reply),
                        "server replied with unexpected data"
                    );
                }
                up
            }
            Err(e) => {
                debug!(hostname, port, error = %e, "server not answering yet");
                false
            }
        }
    }
}

/// Up once a GET on the server URI returns a success status.
#[derive(Debug, Clone)]
pub struct HttpCheck {
    /// Overrides the default `http://host:port` URI.
    pub uri: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpCheck {
    fn default() -> Self {
        Self {
            uri: None,
            timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

impl HttpCheck {
    pub fn with_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    pub fn uri(&self, hostname: &str, port: u16) -> String {
        match &self.uri {
            Some(uri) => uri.clone(),
            None => format!("http://{}:{}", hostname, port),
        }
    }
}

impl LivenessCheck for HttpCheck {
    fn check_server_up(&self, hostname: &str, port: u16) -> bool {
        let uri = self.uri(hostname, port);
        debug!(uri = %uri, "accessing URL");

        let client = match reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                debug!(error = %e, "failed to build HTTP client");
                return false;
            }
        };

        match client.get(&uri).send().and_then(|r| r.error_for_status()) {
            Ok(_) => true,
            Err(e) => {
                debug!(uri = %uri, error = %e, "server not up yet");
                false
            }
        }
    }
}
