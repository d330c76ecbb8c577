//! # Audit - oversized record finder
//!
//! Finds records whose on-device size is likely to exceed a node's
//! write-block-size, and optionally touches them so the server re-evaluates
//! them.
//!
//! ## Run
//!
//! ```text
//! Cluster
//!   |
//!   v
//! ┌───────────────────────────────────────────────────────┐
//! │                      AUDITOR                          │
//! │                                                       │
//! │ collector.rs → ClusterProfile (one info pass)         │
//! │      |                                                │
//! │      v                                                │
//! │ consistency.rs → warnings / Misconfigured (active)    │
//! │      |                                                │
//! │      v   for each node, in name order                 │
//! │ scanner.rs → version → threshold.rs → filter → scan   │
//! │      |                                                │
//! │      v   per matching record                          │
//! │ reporter.rs → log (preview) or touch (active)         │
//! │      |                                                │
//! │      v                                                │
//! │ AuditSummary (count per node)                         │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module          | Purpose                                               |
//! |-----------------|-------------------------------------------------------|
//! | [`collector`]   | info queries, `InfoParams` parser, `NodeProfile`      |
//! | [`threshold`]   | per-node device size threshold                        |
//! | [`consistency`] | cross-node configuration checks                       |
//! | [`scanner`]     | per-node state machine                                |
//! | [`reporter`]    | per-record callback, `AuditSummary`                   |
//! | [`error`]       | `AuditError` and process exit codes                   |
//!
//! ## Failure Scopes
//!
//! ```text
//! run    : info query failure, misconfigured (active), out of space, interrupt
//! node   : version unknown, unreachable, quiesced, scan error  -> next node
//! record : too big, other touch failure                         -> next record
//! token  : malformed info token                                 -> skipped
//! ```
//!
//! Nothing is retried.

pub mod collector;
pub mod consistency;
pub mod error;
pub mod reporter;
pub mod scanner;
pub mod threshold;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cluster::Cluster;
use config::AuditConfig;
use tracing::{debug, info, warn};

pub use collector::{collect, ClusterProfile, InfoParams, NodeProfile};
pub use consistency::{values_in_sync, ConsistencyReport, Finding};
pub use error::{
    AuditError, EXIT_INTERRUPTED, EXIT_MISCONFIGURED, EXIT_OK, EXIT_OUT_OF_SPACE,
    EXIT_UNREACHABLE, EXIT_USAGE,
};
pub use reporter::{AuditSummary, Mode, NodeOutcome, NodeSummary, Reporter, TouchStats};
pub use scanner::{NodeScan, ScanState, ScanTarget};
pub use threshold::{threshold, RECORD_OVERHEAD};

/// Shared "stop now" flag, raised from a signal handler.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag. Returns `true` if it was already raised.
    pub fn raise(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Settings of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditOptions {
    pub namespace: String,
    /// `None` audits every set.
    pub set: Option<String>,
    /// Fraction of write-block-size subtracted from compressed thresholds.
    pub margin: f64,
    /// Preview mode: log matches instead of touching them.
    pub dry_run: bool,
}

impl AuditOptions {
    pub fn from_config(cfg: &AuditConfig) -> Self {
        Self {
            namespace: cfg.audit.namespace.clone(),
            set: cfg.set_name().map(str::to_string),
            margin: cfg.audit.margin,
            dry_run: cfg.audit.dry_run,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        Mode::from_dry_run(self.dry_run)
    }
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self::from_config(&AuditConfig::default())
    }
}

/// Drives one audit over a cluster session.
pub struct Auditor<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
    options: AuditOptions,
    interrupt: Interrupt,
}

impl<C: Cluster + ?Sized> std::fmt::Debug for Auditor<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auditor")
            .field("options", &self.options)
            .field("interrupted", &self.interrupt.is_raised())
            .finish_non_exhaustive()
    }
}

impl<'a, C: Cluster + ?Sized> Auditor<'a, C> {
    pub fn new(cluster: &'a C, options: AuditOptions) -> Self {
        Self {
            cluster,
            options,
            interrupt: Interrupt::new(),
        }
    }

    /// Uses `interrupt` instead of a private flag.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    #[must_use]
    pub fn options(&self) -> &AuditOptions {
        &self.options
    }

    /// Runs collection, the consistency check and every node's scan.
    ///
    /// The per-node summary is logged before returning.
    pub fn run(&self) -> Result<AuditSummary, AuditError> {
        let opts = &self.options;
        info!(
            namespace = %opts.namespace,
            set = opts.set.as_deref().unwrap_or("<all>"),
            margin = opts.margin,
            mode = ?opts.mode(),
            "starting audit"
        );

        let mut profile = collect(self.cluster, &opts.namespace)?;
        let consistency = consistency::check(&profile, opts.dry_run)?;
        if consistency.is_clean() {
            debug!(?profile, "node profiles");
        }

        let target = ScanTarget {
            namespace: opts.namespace.clone(),
            set: opts.set.clone(),
            margin: opts.margin,
        };
        let mut reporter = Reporter::new(self.cluster, opts.mode(), self.interrupt.clone());
        let mut nodes = Vec::with_capacity(profile.len());

        for (node, p) in profile.iter_mut() {
            if self.interrupt.is_raised() {
                warn!("Detected interrupt signal (CTRL+C) -- exiting");
                return Err(AuditError::Interrupted);
            }
            let outcome = NodeScan::new(node).run(self.cluster, p, &target, &mut reporter)?;
            nodes.push(NodeSummary {
                node: node.clone(),
                matched: p.matched,
                outcome,
            });
            // a scan with no further matches never reaches the per-record check
            if self.interrupt.is_raised() {
                warn!(node = %node, "Detected interrupt signal (CTRL+C) -- exiting");
                return Err(AuditError::Interrupted);
            }
        }

        let summary = AuditSummary {
            nodes,
            touches: reporter.stats(),
            consistency,
        };
        summary.log();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests;
