//! Listener tables: which processes hold a listening socket on `ip:port`.
//!
//! Tables return raw pid tokens. A token that is not a number (`-`) stands
//! for a socket whose owner cannot be seen, typically one belonging to
//! another user or a process that is shutting down.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::FixtureError;
use crate::workspace::run_shell;

/// Token reported for a listener whose owning process is not visible.
pub const UNKNOWN_OWNER: &str = "-";

const TCP_LISTEN: u8 = 0x0A;

pub trait ListenerTable: Send + Sync {
    fn listener_pids(&self, ip: IpAddr, port: u16) -> Result<Vec<String>, FixtureError>;
}

/// Picks the best table for the platform.
pub fn default_listener_table() -> Arc<dyn ListenerTable> {
    if cfg!(target_os = "linux") {
        Arc::new(ProcListenerTable::new())
    } else {
        Arc::new(NetstatListenerTable)
    }
}

/// Queries `netstat -anp` through the shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetstatListenerTable;

impl NetstatListenerTable {
    pub fn command(ip: IpAddr, port: u16) -> String {
        format!(
            "netstat -anp 2>/dev/null | grep {}:{} | grep LISTEN | awk '{{ print $7 }}' | cut -d'/' -f1",
            ip, port
        )
    }
}

impl ListenerTable for NetstatListenerTable {
    fn listener_pids(&self, ip: IpAddr, port: u16) -> Result<Vec<String>, FixtureError> {
        let output = run_shell(&Self::command(ip, port), true, false, None)?;
        Ok(split_tokens(&output))
    }
}

fn split_tokens(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Reads `/proc/net/tcp{,6}` and maps socket inodes to pids via `/proc/<pid>/fd`.
#[derive(Debug, Clone)]
pub struct ProcListenerTable {
    root: PathBuf,
}

impl Default for ProcListenerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProcSocket {
    ip: IpAddr,
    port: u16,
    state: u8,
    inode: u64,
}

impl ProcListenerTable {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn listening_inodes(&self, ip: IpAddr, port: u16) -> io::Result<BTreeSet<u64>> {
        let mut inodes = BTreeSet::new();
        for table in ["tcp", "tcp6"] {
            let path = self.root.join("net").join(table);
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            inodes.extend(
                content
                    .lines()
                    .skip(1)
                    .filter_map(parse_socket_line)
                    .filter(|s| s.state == TCP_LISTEN && s.port == port && address_matches(s.ip, ip))
                    .map(|s| s.inode),
            );
        }
        Ok(inodes)
    }

    fn owners(&self, inodes: &BTreeSet<u64>) -> io::Result<HashMap<u64, BTreeSet<u32>>> {
        let mut owners: HashMap<u64, BTreeSet<u32>> = HashMap::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            // Unreadable fd dirs belong to other users or exited processes.
            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                if let Some(inode) = fs::read_link(fd.path()).ok().as_deref().and_then(socket_inode) {
                    if inodes.contains(&inode) {
                        owners.entry(inode).or_default().insert(pid);
                    }
                }
            }
        }
        Ok(owners)
    }
}

impl ListenerTable for ProcListenerTable {
    fn listener_pids(&self, ip: IpAddr, port: u16) -> Result<Vec<String>, FixtureError> {
        let inodes = self.listening_inodes(ip, port)?;
        if inodes.is_empty() {
            return Ok(Vec::new());
        }
        let owners = self.owners(&inodes)?;

        let mut pids = BTreeSet::new();
        let mut unowned = false;
        for inode in &inodes {
            match owners.get(inode) {
                Some(found) => pids.extend(found.iter().copied()),
                None => unowned = true,
            }
        }
        debug!(%ip, port, ?pids, unowned, "listener table lookup");

        let mut tokens: Vec<String> = pids.iter().map(u32::to_string).collect();
        if unowned {
            tokens.push(UNKNOWN_OWNER.to_string());
        }
        Ok(tokens)
    }
}

fn address_matches(socket: IpAddr, target: IpAddr) -> bool {
    if socket == target || socket.is_unspecified() {
        return true;
    }
    match (socket, target) {
        (IpAddr::V6(v6), IpAddr::V4(v4)) => v6.to_ipv4_mapped() == Some(v4),
        _ => false,
    }
}

fn socket_inode(link: &Path) -> Option<u64> {
    link.to_str()?
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

fn parse_socket_line(line: &str) -> Option<ProcSocket> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let (ip, port) = parse_hex_addr(fields.get(1)?)?;
    let state = u8::from_str_radix(fields.get(3)?, 16).ok()?;
    let inode = fields.get(9)?.parse().ok()?;
    Some(ProcSocket {
        ip,
        port,
        state,
        inode,
    })
}

/// Decodes the kernel's `ADDR:PORT` hex form. Address words are printed in
/// host byte order, the port as a plain number.
fn parse_hex_addr(field: &str) -> Option<(IpAddr, u16)> {
    let (addr, port) = field.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let ip = match addr.len() {
        8 => {
            let word = u32::from_str_radix(addr, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
        }
        32 => {
            let mut bytes = [0u8; 16];
            for (i, chunk) in bytes.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(addr.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(bytes))
        }
        _ => return None,
    };
    Some((ip, port))
}
