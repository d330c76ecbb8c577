//! Per-record handling during a scan, and the end-of-run summary.
//!
//! In preview mode every matching record is logged with its full identity.
//! In active mode it is touched with TTL 0 instead, which makes the server
//! rewrite it and reject it if it no longer fits a write block.

use cluster::{Cluster, FilterKind, RecordIdentity, ScanControl, ServerVersion};
use tracing::{error, info, warn};

use crate::collector::NodeProfile;
use crate::consistency::ConsistencyReport;
use crate::{AuditError, Interrupt};

/// TTL sent with touches: keep the namespace default.
pub const TOUCH_TTL: u32 = 0;

/// What to do with a matching record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Log it.
    Preview,
    /// Touch it.
    Active,
}

impl Mode {
    #[must_use]
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            Mode::Preview
        } else {
            Mode::Active
        }
    }
}

/// Touch results over a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TouchStats {
    pub touched: u64,
    /// Refused by the server as too big for a write block.
    pub too_big: u64,
    /// Failed for any other record-scoped reason.
    pub failed: u64,
}

impl TouchStats {
    /// Touches issued, successful or not.
    #[must_use]
    pub fn attempted(&self) -> u64 {
        self.touched + self.too_big + self.failed
    }
}

/// Callback target for matching records.
///
/// A run-ending condition (interrupt, namespace out of space) stops the
/// current scan and is parked until the scanner collects it with
/// [`Reporter::take_fatal`].
pub struct Reporter<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
    mode: Mode,
    interrupt: Interrupt,
    stats: TouchStats,
    fatal: Option<AuditError>,
}

impl<'a, C: Cluster + ?Sized> Reporter<'a, C> {
    pub fn new(cluster: &'a C, mode: Mode, interrupt: Interrupt) -> Self {
        Self {
            cluster,
            mode,
            interrupt,
            stats: TouchStats::default(),
            fatal: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn stats(&self) -> TouchStats {
        self.stats
    }

    /// Takes the error that stopped the last scan, if any.
    pub fn take_fatal(&mut self) -> Option<AuditError> {
        self.fatal.take()
    }

    /// Handles one record matched on `node`, whose profile is `profile`.
    pub fn on_record(
        &mut self,
        node: &str,
        profile: &mut NodeProfile,
        record: RecordIdentity,
    ) -> ScanControl {
        if self.fatal.is_some() {
            return ScanControl::Stop;
        }
        if self.interrupt.is_raised() {
            warn!("Detected interrupt signal (CTRL+C) -- exiting");
            self.fatal = Some(AuditError::Interrupted);
            return ScanControl::Stop;
        }

        profile.matched += 1;

        match self.mode {
            Mode::Preview => {
                info!(node, "{record}");
                ScanControl::Continue
            }
            Mode::Active => self.touch(node, record),
        }
    }

    fn touch(&mut self, node: &str, record: RecordIdentity) -> ScanControl {
        let Err(e) = self.cluster.touch(node, &record, TOUCH_TTL) else {
            self.stats.touched += 1;
            return ScanControl::Continue;
        };

        if e.is_record_too_big() {
            warn!(node, "Record too big: {record}");
            self.stats.too_big += 1;
            ScanControl::Continue
        } else if e.is_out_of_space() {
            error!(
                node,
                namespace = %record.namespace,
                "Unable to touch records due to no space in the namespace. Exiting."
            );
            self.fatal = Some(AuditError::OutOfSpace {
                namespace: record.namespace,
                node: node.to_string(),
                source: e,
            });
            ScanControl::Stop
        } else {
            error!(node, digest = %record.digest_hex(), error = %e, "touch failed");
            self.stats.failed += 1;
            ScanControl::Continue
        }
    }
}

/// How a node's pass ended.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// The node was scanned to the end.
    Scanned { filter: FilterKind, threshold: u64 },
    /// The node runs a version that rejects oversized records by itself.
    SkippedProtected { version: ServerVersion },
    /// The node could not be scanned; the run went on without it.
    Failed { reason: String },
}

impl NodeOutcome {
    fn label(&self) -> &'static str {
        match self {
            NodeOutcome::Scanned { .. } => "scanned",
            NodeOutcome::SkippedProtected { .. } => "skipped",
            NodeOutcome::Failed { .. } => "failed",
        }
    }
}

/// One line of the final summary.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSummary {
    pub node: String,
    pub matched: u64,
    pub outcome: NodeOutcome,
}

/// Result of a completed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditSummary {
    /// In node name order.
    pub nodes: Vec<NodeSummary>,
    pub touches: TouchStats,
    pub consistency: ConsistencyReport,
}

impl AuditSummary {
    /// Matching records over all nodes.
    #[must_use]
    pub fn total_matched(&self) -> u64 {
        self.nodes.iter().map(|n| n.matched).sum()
    }

    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeSummary> {
        self.nodes.iter().find(|n| n.node == name)
    }

    /// Writes the per-node counts to the log.
    pub fn log(&self) {
        for n in &self.nodes {
            info!(
                outcome = n.outcome.label(),
                "Node: {} Returned Record Count: {}", n.node, n.matched
            );
        }
        if self.touches.attempted() > 0 {
            info!(
                touched = self.touches.touched,
                too_big = self.touches.too_big,
                failed = self.touches.failed,
                "touch results"
            );
        }
    }
}
