//! # Cluster - connector to the audited database cluster
//!
//! The audit logic never talks to sockets directly; it drives a [`Cluster`]
//! implementation:
//!
//! | Backend        | Use                                                    |
//! |----------------|--------------------------------------------------------|
//! | [`TcpCluster`] | real clusters over the wire protocol (`wire` crate)    |
//! | [`MemCluster`] | in-memory nodes with canned info replies and records   |
//!
//! ## Capabilities
//!
//! ```text
//! node_names()                  every node discovered at connect time
//! info_all(cmd)                 cmd on every node -> node -> reply
//! info_node(node, cmd)          cmd on one node
//! scan_node(node, req, visit)   metadata-only filtered scan of one node,
//!                               visit() called per record, may stop early
//! touch(node, record, ttl)      rewrite a record without changing it
//! check_stable()                cluster-stable: on every node, keys agree
//! ```
//!
//! All calls block; a scan does not return until every matching record on
//! that node has been visited or the visitor asked to stop.

mod error;
mod memory;
mod tcp;
mod types;

use std::collections::BTreeMap;

pub use error::{ClusterError, ResultCode};
pub use memory::{MemCluster, MemFailure, MemNode, ScanCall, TouchCall};
pub use tcp::{parse_peers, ConnectPolicy, Credentials, Peer, TcpCluster};
pub use types::{RecordIdentity, ScanControl, ScanRequest, ServerVersion};
pub use wire::{DeviceSizeFilter, FilterKind, UserKey};

/// Info command whose reply is the cluster key when the cluster is stable.
pub const CLUSTER_STABLE_COMMAND: &str = "cluster-stable:";

/// Info command returning the server build version.
pub const BUILD_COMMAND: &str = "build";

/// A session to a cluster.
pub trait Cluster {
    /// Names of all nodes known to the session, sorted.
    fn node_names(&self) -> Vec<String>;

    /// Runs an info command on every node.
    ///
    /// Fails as a whole if any node cannot be reached.
    fn info_all(&self, command: &str) -> Result<BTreeMap<String, String>, ClusterError>;

    /// Runs an info command on a single node.
    fn info_node(&self, node: &str, command: &str) -> Result<String, ClusterError>;

    /// Scans the records `node` is master for, calling `visit` for every one
    /// that passes the request's filter.
    fn scan_node(
        &self,
        node: &str,
        request: &ScanRequest,
        visit: &mut dyn FnMut(RecordIdentity) -> ScanControl,
    ) -> Result<(), ClusterError>;

    /// Touches `record` through `node`, setting its TTL (0 = namespace
    /// default). Bins are left untouched.
    fn touch(&self, node: &str, record: &RecordIdentity, ttl: u32) -> Result<(), ClusterError>;

    /// Verifies every node reports the same cluster key.
    ///
    /// Returns the cluster key.
    fn check_stable(&self) -> Result<String, ClusterError> {
        let replies = self.info_all(CLUSTER_STABLE_COMMAND)?;
        let mut key: Option<&str> = None;

        for (node, reply) in &replies {
            let reply = reply.trim();
            if reply.is_empty() || reply.starts_with("ERROR") {
                return Err(ClusterError::Unstable(format!(
                    "node {node} answered `{reply}`"
                )));
            }
            match key {
                None => key = Some(reply),
                Some(k) if k != reply => {
                    return Err(ClusterError::Unstable(format!(
                        "node {node} reports cluster key {reply}, expected {k}"
                    )));
                }
                Some(_) => {}
            }
        }

        key.map(str::to_string)
            .ok_or_else(|| ClusterError::Unstable("no nodes answered".to_string()))
    }

    /// Parses the `build` reply of `node`.
    fn server_version(&self, node: &str) -> Result<ServerVersion, ClusterError> {
        let reply = self.info_node(node, BUILD_COMMAND)?;
        ServerVersion::parse(&reply).ok_or_else(|| ClusterError::Info {
            node: node.to_string(),
            message: format!("unparseable build version `{}`", reply.trim()),
        })
    }
}

#[cfg(test)]
mod tests;
