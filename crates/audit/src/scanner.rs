//! One node's pass of the audit.
//!
//! ```text
//! Idle --build--> VersionChecked --(>= 6.0)--------------------> Done (skipped)
//!                       |
//!                       v  threshold + filter kind
//!                  FilterBuilt --scan_node--> Scanning --------> Done
//! ```
//!
//! Errors scoped to the node (unknown version, unreachable, quiesced, scan
//! failure) end the pass as [`NodeOutcome::Failed`]. Only what the reporter
//! parks as fatal escapes as an `Err`.

use cluster::{Cluster, ClusterError, DeviceSizeFilter, FilterKind, ScanRequest};
use tracing::{debug, error, info};

use crate::collector::NodeProfile;
use crate::reporter::{NodeOutcome, Reporter};
use crate::threshold::threshold;
use crate::AuditError;

/// Where a node's pass currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    VersionChecked,
    FilterBuilt,
    Scanning,
    Done,
}

/// What to scan and how to size the filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanTarget {
    pub namespace: String,
    /// `None` scans every set.
    pub set: Option<String>,
    pub margin: f64,
}

/// State machine for scanning a single node.
#[derive(Debug)]
pub struct NodeScan<'n> {
    node: &'n str,
    state: ScanState,
}

impl<'n> NodeScan<'n> {
    pub fn new(node: &'n str) -> Self {
        Self {
            node,
            state: ScanState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> ScanState {
        self.state
    }

    fn advance(&mut self, next: ScanState) {
        debug!(node = self.node, from = ?self.state, to = ?next, "scan state");
        self.state = next;
    }

    fn fail(&mut self, reason: String) -> NodeOutcome {
        error!(node = self.node, "{reason}");
        self.advance(ScanState::Done);
        NodeOutcome::Failed { reason }
    }

    /// Runs the pass. Every matching record goes to `reporter` together
    /// with `profile`.
    pub fn run<C: Cluster + ?Sized>(
        &mut self,
        cluster: &C,
        profile: &mut NodeProfile,
        target: &ScanTarget,
        reporter: &mut Reporter<'_, C>,
    ) -> Result<NodeOutcome, AuditError> {
        let node = self.node;
        info!(node, "Scanning node");

        let version = match cluster.server_version(node) {
            Ok(v) => v,
            Err(e) => {
                return Ok(self.fail(format!(
                    "Unable to read server version of node {node}: {e}"
                )))
            }
        };
        self.advance(ScanState::VersionChecked);
        info!(node, %version, "node server version");

        if version.rejects_oversized_records() {
            info!(
                node,
                %version,
                "Skipping oversized record scan for node running version 6.0 or newer"
            );
            self.advance(ScanState::Done);
            return Ok(NodeOutcome::SkippedProtected { version });
        }

        let kind = FilterKind::from_capability(version.supports_expressions());
        debug!(node, expressions = kind == FilterKind::Expression, "filter capability");

        match profile.compression {
            Some(ratio) => info!(
                node,
                ratio,
                write_block_size = profile.write_block_size,
                "node has compression enabled"
            ),
            None => info!(node, "node does not have compression enabled"),
        }
        let threshold = threshold(profile, target.margin);
        let request = ScanRequest {
            namespace: target.namespace.clone(),
            set: target.set.clone(),
            filter: DeviceSizeFilter::new(kind, threshold),
        };
        self.advance(ScanState::FilterBuilt);
        info!(
            node,
            "Checking for records of compressed size larger than {threshold} bytes"
        );

        self.advance(ScanState::Scanning);
        let result = cluster.scan_node(node, &request, &mut |record| {
            reporter.on_record(node, profile, record)
        });

        if let Some(fatal) = reporter.take_fatal() {
            self.advance(ScanState::Done);
            return Err(fatal);
        }

        match result {
            Ok(()) => {
                self.advance(ScanState::Done);
                Ok(NodeOutcome::Scanned {
                    filter: kind,
                    threshold,
                })
            }
            Err(ClusterError::InvalidNode(_)) => Ok(self.fail(format!(
                "Unable to scan node {node} because it's not active. Is it quiesced?"
            ))),
            Err(e) => Ok(self.fail(format!("Unable to perform scan on node {node}: {e}"))),
        }
    }
}
