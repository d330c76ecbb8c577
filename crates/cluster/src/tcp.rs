//! Cluster session over TCP.
//!
//! ## Connect sequence
//!
//! ```text
//! seed host:port --(login)--> info "node", "peers-clear-std|alt"
//!                                 |
//!                                 v
//!                   address book: node name -> host:port
//! ```
//!
//! Each node keeps a small pool of idle, already authenticated connections
//! that info and touch commands borrow. A scan gets its own connection and
//! only hands it back to the pool when the server finished the stream.

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use config::{AuditConfig, AuthMode};
use tracing::{debug, info, warn};
use wire::{ScanReader, WireError};

use crate::error::{ClusterError, ResultCode};
use crate::types::{RecordIdentity, ScanControl, ScanRequest};
use crate::Cluster;

/// Idle connections kept per node.
const MAX_IDLE_PER_NODE: usize = 4;

/// A scan socket may sit idle for this many socket timeouts before the node
/// is given up on.
const SCAN_IDLE_FACTOR: u32 = 4;

/// Login material, hashed once per session.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    /// bcrypt hash sent as the credential field.
    pub credential: String,
    /// Sent only for external auth modes.
    pub clear_password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("clear_password", &self.clear_password.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

/// Everything [`TcpCluster::connect`] needs.
#[derive(Debug, Clone)]
pub struct ConnectPolicy {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    /// Use the peers' alternate-access-address instead of their access
    /// address.
    pub use_alternate_address: bool,
    /// Connect, info and touch timeout.
    pub timeout: Duration,
}

impl ConnectPolicy {
    /// Builds a policy from the run configuration, hashing the password.
    pub fn from_config(cfg: &AuditConfig) -> Result<Self, ClusterError> {
        let credentials = match (&cfg.cluster.user, cfg.cluster.auth_mode) {
            (None, _) | (Some(_), AuthMode::Pki) => None,
            (Some(user), mode) => {
                let password = cfg.cluster.password.as_deref().unwrap_or_default();
                Some(Credentials {
                    user: user.clone(),
                    credential: wire::hash_password(password)?,
                    clear_password: mode
                        .sends_clear_password()
                        .then(|| password.to_string()),
                })
            }
        };

        Ok(Self {
            host: cfg.cluster.host.clone(),
            port: cfg.cluster.port,
            credentials,
            use_alternate_address: cfg.cluster.use_alternate_address,
            timeout: cfg.timeout(),
        })
    }
}

/// One entry of a `peers-clear-*` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub node: String,
    pub host: String,
    pub port: u16,
}

/// Parses a `peers-clear-std` / `peers-clear-alt` reply:
///
/// ```text
/// <generation>,<default_port>,[[<node>,<tls_name>,[<addr>[:<port>],...]],...]
/// ```
///
/// Only the first address of each peer is kept. IPv6 addresses come
/// bracketed (`[::1]:3000`).
pub fn parse_peers(reply: &str) -> Result<Vec<Peer>, ClusterError> {
    let bad = |why: &str| ClusterError::Info {
        node: "seed".to_string(),
        message: format!("bad peers reply ({why}): `{reply}`"),
    };

    let top = split_top(reply.trim());
    if top.len() != 3 {
        return Err(bad("expected 3 components"));
    }
    let default_port: u16 = top[1].trim().parse().map_err(|_| bad("default port"))?;

    let mut peers = Vec::new();
    for entry in split_top(unbracket(top[2])) {
        let parts = split_top(unbracket(entry));
        if parts.len() != 3 {
            return Err(bad("peer entry"));
        }
        let node = parts[0].trim().to_string();
        let Some(addr) = split_top(unbracket(parts[2])).into_iter().next() else {
            continue;
        };
        let (host, port) = split_host_port(addr.trim(), default_port).ok_or_else(|| bad("address"))?;
        peers.push(Peer { node, host, port });
    }
    Ok(peers)
}

/// Splits on commas that are not nested inside brackets.
fn split_top(s: &str) -> Vec<&str> {
    if s.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            ',' if depth == 0 => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

fn unbracket(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(s)
}

fn split_host_port(addr: &str, default_port: u16) -> Option<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None => default_port,
        };
        return Some((host.to_string(), port));
    }
    match addr.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((addr.to_string(), default_port)),
    }
}

struct NodeEntry {
    host: String,
    port: u16,
    idle: Mutex<Vec<TcpStream>>,
}

impl NodeEntry {
    fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            idle: Mutex::new(Vec::new()),
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A live session to a real cluster.
pub struct TcpCluster {
    policy: ConnectPolicy,
    nodes: BTreeMap<String, NodeEntry>,
    next_task_id: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for TcpCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpCluster")
            .field("seed", &format!("{}:{}", self.policy.host, self.policy.port))
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl TcpCluster {
    /// Connects to the seed, authenticates and discovers the other nodes.
    pub fn connect(policy: ConnectPolicy) -> Result<Self, ClusterError> {
        let peers_cmd = if policy.use_alternate_address {
            "peers-clear-alt"
        } else {
            "peers-clear-std"
        };

        let mut seed = open_stream(&policy, &policy.host, policy.port)?;
        let replies = wire::request_info(&mut seed, &["node", peers_cmd])?;
        let seed_name = replies
            .get("node")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ClusterError::Info {
                node: "seed".to_string(),
                message: "no node name in reply".to_string(),
            })?;

        let mut nodes = BTreeMap::new();
        let seed_entry = NodeEntry::new(policy.host.clone(), policy.port);
        seed_entry.idle.lock().unwrap_or_else(|e| e.into_inner()).push(seed);
        nodes.insert(seed_name.clone(), seed_entry);

        let peers = match replies.get(peers_cmd) {
            Some(reply) if !reply.trim().is_empty() => parse_peers(reply)?,
            _ => {
                warn!(command = peers_cmd, "seed returned no peers list, using seed only");
                Vec::new()
            }
        };
        for peer in peers {
            nodes
                .entry(peer.node)
                .or_insert_with(|| NodeEntry::new(peer.host, peer.port));
        }

        let seed_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);

        info!(
            seed = %seed_name,
            nodes = nodes.len(),
            alternate = policy.use_alternate_address,
            "connected to cluster"
        );

        Ok(Self {
            policy,
            nodes,
            next_task_id: AtomicU64::new(seed_nanos),
            closed: AtomicBool::new(false),
        })
    }

    /// Drops every pooled connection. Later calls fail with
    /// [`ClusterError::Closed`]. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut released = 0;
        for entry in self.nodes.values() {
            let mut idle = entry.idle.lock().unwrap_or_else(|e| e.into_inner());
            released += idle.len();
            idle.clear();
        }
        debug!(connections = released, "cluster connection closed");
    }

    fn node(&self, name: &str) -> Result<&NodeEntry, ClusterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClusterError::Closed);
        }
        self.nodes
            .get(name)
            .ok_or_else(|| ClusterError::InvalidNode(name.to_string()))
    }

    fn checkout(&self, entry: &NodeEntry) -> Result<TcpStream, ClusterError> {
        let pooled = entry.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        match pooled {
            Some(stream) => Ok(stream),
            None => open_stream(&self.policy, &entry.host, entry.port),
        }
    }

    fn checkin(&self, entry: &NodeEntry, stream: TcpStream) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut idle = entry.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < MAX_IDLE_PER_NODE {
            idle.push(stream);
        }
    }

    /// Runs `f` on a pooled connection, returning it to the pool only on
    /// success (a failed exchange may leave unread bytes behind).
    fn with_conn<T>(
        &self,
        entry: &NodeEntry,
        f: impl FnOnce(&mut TcpStream) -> Result<T, WireError>,
    ) -> Result<T, ClusterError> {
        let mut stream = self.checkout(entry)?;
        let out = f(&mut stream)?;
        self.checkin(entry, stream);
        Ok(out)
    }

    fn timeout_ms(&self) -> u32 {
        u32::try_from(self.policy.timeout.as_millis()).unwrap_or(u32::MAX)
    }
}

impl Drop for TcpCluster {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_stream(policy: &ConnectPolicy, host: &str, port: u16) -> Result<TcpStream, ClusterError> {
    let addr = format!("{host}:{port}");
    let connect_err = |source| ClusterError::Connect {
        addr: addr.clone(),
        source,
    };

    let sock_addr: SocketAddr = (host, port)
        .to_socket_addrs()
        .map_err(connect_err)?
        .next()
        .ok_or_else(|| {
            connect_err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "host did not resolve",
            ))
        })?;

    let mut stream = TcpStream::connect_timeout(&sock_addr, policy.timeout).map_err(connect_err)?;
    stream.set_nodelay(true).map_err(connect_err)?;
    stream
        .set_read_timeout(Some(policy.timeout))
        .map_err(connect_err)?;
    stream
        .set_write_timeout(Some(policy.timeout))
        .map_err(connect_err)?;

    if let Some(creds) = &policy.credentials {
        let body = wire::login_request(
            &creds.user,
            &creds.credential,
            creds.clear_password.as_deref(),
        )?;
        let code = ResultCode(wire::read_login_reply(&mut stream, &body)?);
        if code != ResultCode::OK && code != ResultCode::SECURITY_NOT_ENABLED {
            return Err(ClusterError::Auth(code));
        }
    }

    debug!(%addr, "opened connection");
    Ok(stream)
}

impl Cluster for TcpCluster {
    fn node_names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    fn info_all(&self, command: &str) -> Result<BTreeMap<String, String>, ClusterError> {
        let mut out = BTreeMap::new();
        for name in self.nodes.keys() {
            out.insert(name.clone(), self.info_node(name, command)?);
        }
        Ok(out)
    }

    fn info_node(&self, node: &str, command: &str) -> Result<String, ClusterError> {
        let entry = self.node(node)?;
        let mut replies = self.with_conn(entry, |s| wire::request_info(s, &[command]))?;
        Ok(replies.remove(command).unwrap_or_default())
    }

    fn scan_node(
        &self,
        node: &str,
        request: &ScanRequest,
        visit: &mut dyn FnMut(RecordIdentity) -> ScanControl,
    ) -> Result<(), ClusterError> {
        let entry = self.node(node)?;
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let msg = wire::scan_request(
            &request.namespace,
            request.set.as_deref(),
            task_id,
            self.timeout_ms(),
            Some(&request.filter),
        )?;

        let mut stream = self.checkout(entry)?;
        wire::write_frame(&mut stream, wire::ProtoType::Message, &msg.encode()?)?;
        stream
            .set_read_timeout(Some(self.policy.timeout * SCAN_IDLE_FACTOR))
            .map_err(|source| ClusterError::Connect {
                addr: entry.addr(),
                source,
            })?;

        let mut reader = ScanReader::new(&mut stream);
        let mut finished = true;
        while let Some(record) = reader.next_record()? {
            if visit(RecordIdentity::from(record)) == ScanControl::Stop {
                finished = false;
                break;
            }
        }

        if finished && stream.set_read_timeout(Some(self.policy.timeout)).is_ok() {
            self.checkin(entry, stream);
        } else {
            debug!(node, task_id, "scan stopped early, dropping connection");
        }
        Ok(())
    }

    fn touch(&self, node: &str, record: &RecordIdentity, ttl: u32) -> Result<(), ClusterError> {
        let entry = self.node(node)?;
        let req = wire::touch_request(
            &record.namespace,
            &record.set_name,
            &record.digest,
            ttl,
            self.timeout_ms(),
        );
        let reply = self.with_conn(entry, |s| wire::read_message_reply(s, &req))?;
        match ResultCode(reply.header.result_code) {
            ResultCode::OK => Ok(()),
            code => Err(ClusterError::Server(code)),
        }
    }
}
