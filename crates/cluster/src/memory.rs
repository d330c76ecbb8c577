//! In-memory cluster used by tests and dry runs of the audit logic.
//!
//! Nodes carry canned info replies and a list of records with their device
//! sizes. Scans evaluate the filter locally; every scan and touch is
//! recorded so callers can assert on what was (not) issued.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::error::{ClusterError, ResultCode};
use crate::types::{RecordIdentity, ScanControl, ScanRequest};
use crate::{Cluster, BUILD_COMMAND, CLUSTER_STABLE_COMMAND};
use wire::DeviceSizeFilter;

/// Injected failure for a node's scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemFailure {
    /// Connection refused.
    Unreachable,
    /// Node quiesced / not active.
    Inactive,
    /// The scan fails with a server result code.
    Server(ResultCode),
}

impl MemFailure {
    fn to_error(self, node: &str) -> ClusterError {
        match self {
            MemFailure::Unreachable => ClusterError::Connect {
                addr: node.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            },
            MemFailure::Inactive => ClusterError::InvalidNode(node.to_string()),
            MemFailure::Server(code) => ClusterError::Server(code),
        }
    }
}

#[derive(Debug, Clone)]
struct MemRecord {
    identity: RecordIdentity,
    device_size: u64,
}

/// One simulated node.
#[derive(Debug, Clone)]
pub struct MemNode {
    build: String,
    infos: BTreeMap<String, String>,
    records: Vec<MemRecord>,
    /// Every call on the node fails.
    down: bool,
    scan_failure: Option<MemFailure>,
    touch_result: ResultCode,
}

impl MemNode {
    /// A node answering `build` with `build`.
    pub fn new(build: &str) -> Self {
        let mut infos = BTreeMap::new();
        infos.insert(CLUSTER_STABLE_COMMAND.to_string(), "A1B2C3D4E5F6".to_string());
        Self {
            build: build.to_string(),
            infos,
            records: Vec::new(),
            down: false,
            scan_failure: None,
            touch_result: ResultCode::OK,
        }
    }

    /// Sets the reply to an info command.
    pub fn with_info(mut self, command: &str, reply: &str) -> Self {
        self.infos.insert(command.to_string(), reply.to_string());
        self
    }

    /// Adds a record with the given on-device size.
    pub fn with_record(mut self, identity: RecordIdentity, device_size: u64) -> Self {
        self.records.push(MemRecord {
            identity,
            device_size,
        });
        self
    }

    /// Makes every call on this node fail as unreachable.
    pub fn down(mut self) -> Self {
        self.down = true;
        self
    }

    /// Makes scans of this node fail.
    pub fn with_scan_failure(mut self, failure: MemFailure) -> Self {
        self.scan_failure = Some(failure);
        self
    }

    /// Result code returned for every touch on this node.
    pub fn with_touch_result(mut self, code: ResultCode) -> Self {
        self.touch_result = code;
        self
    }
}

/// A scan the cluster received.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCall {
    pub node: String,
    pub request: ScanRequest,
}

/// A touch the cluster received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchCall {
    pub node: String,
    pub digest: [u8; 20],
    pub ttl: u32,
}

/// An in-memory [`Cluster`].
#[derive(Debug, Default)]
pub struct MemCluster {
    nodes: BTreeMap<String, MemNode>,
    /// Per-digest touch result overrides.
    touch_overrides: HashMap<[u8; 20], ResultCode>,
    scans: Mutex<Vec<ScanCall>>,
    touches: Mutex<Vec<TouchCall>>,
}

impl MemCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a node.
    pub fn with_node(mut self, name: &str, node: MemNode) -> Self {
        self.nodes.insert(name.to_string(), node);
        self
    }

    /// Forces the touch of one record to fail with `code`.
    pub fn with_touch_override(mut self, digest: [u8; 20], code: ResultCode) -> Self {
        self.touch_overrides.insert(digest, code);
        self
    }

    /// Scans issued so far.
    pub fn scans(&self) -> Vec<ScanCall> {
        self.scans.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Touches issued so far.
    pub fn touches(&self) -> Vec<TouchCall> {
        self.touches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of records on `node` that `filter` would select.
    pub fn count_matching(&self, node: &str, filter: &DeviceSizeFilter) -> usize {
        self.nodes
            .get(node)
            .map(|n| {
                n.records
                    .iter()
                    .filter(|r| filter.matches(r.device_size))
                    .count()
            })
            .unwrap_or(0)
    }

    fn live_node(&self, name: &str) -> Result<&MemNode, ClusterError> {
        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| ClusterError::InvalidNode(name.to_string()))?;
        if node.down {
            return Err(MemFailure::Unreachable.to_error(name));
        }
        Ok(node)
    }
}

impl Cluster for MemCluster {
    fn node_names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    fn info_all(&self, command: &str) -> Result<BTreeMap<String, String>, ClusterError> {
        self.nodes
            .keys()
            .map(|name| Ok((name.clone(), self.info_node(name, command)?)))
            .collect()
    }

    fn info_node(&self, node: &str, command: &str) -> Result<String, ClusterError> {
        let n = self.live_node(node)?;
        if command == BUILD_COMMAND {
            return Ok(n.build.clone());
        }
        Ok(n.infos.get(command).cloned().unwrap_or_default())
    }

    fn scan_node(
        &self,
        node: &str,
        request: &ScanRequest,
        visit: &mut dyn FnMut(RecordIdentity) -> ScanControl,
    ) -> Result<(), ClusterError> {
        let n = self.live_node(node)?;
        self.scans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ScanCall {
                node: node.to_string(),
                request: request.clone(),
            });

        if let Some(failure) = n.scan_failure {
            return Err(failure.to_error(node));
        }

        let set = request.set.as_deref().filter(|s| !s.is_empty());
        let matching = n.records.iter().filter(|r| {
            r.identity.namespace == request.namespace
                && set.map_or(true, |s| r.identity.set_name == s)
                && request.filter.matches(r.device_size)
        });

        for record in matching {
            if visit(record.identity.clone()) == ScanControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn touch(&self, node: &str, record: &RecordIdentity, ttl: u32) -> Result<(), ClusterError> {
        let n = self.live_node(node)?;
        self.touches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(TouchCall {
                node: node.to_string(),
                digest: record.digest,
                ttl,
            });

        let code = self
            .touch_overrides
            .get(&record.digest)
            .copied()
            .unwrap_or(n.touch_result);
        if code == ResultCode::OK {
            Ok(())
        } else {
            Err(ClusterError::Server(code))
        }
    }
}
