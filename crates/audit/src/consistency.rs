//! Cross-node configuration checks, run once before any scan.

use std::fmt;

use tracing::warn;

use crate::collector::ClusterProfile;
use crate::threshold::RECORD_OVERHEAD;
use crate::AuditError;

/// True iff every element equals the first. Empty and single-element
/// slices are in sync.
#[must_use]
pub fn values_in_sync<T: PartialEq>(values: &[T]) -> bool {
    match values.split_first() {
        None => true,
        Some((first, rest)) => rest.iter().all(|v| v == first),
    }
}

/// One problem found by [`check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// Nodes disagree on write-block-size.
    WriteBlockSizeMismatch,
    /// Nodes disagree on max-record-size.
    MaxRecordSizeMismatch,
    /// The node's max-record-size is not `write-block-size - 16`.
    MaxRecordSizeMisconfigured {
        node: String,
        write_block_size: u64,
        max_record_size: u64,
    },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::WriteBlockSizeMismatch => {
                f.write_str("write-block-size is not uniform across nodes")
            }
            Finding::MaxRecordSizeMismatch => {
                f.write_str("max-record-size is not uniform across nodes")
            }
            Finding::MaxRecordSizeMisconfigured {
                node,
                write_block_size,
                max_record_size,
            } => write!(
                f,
                "max-record-size is not (write-block-size - 16 bytes) for node {node} \
                 (write-block-size: {write_block_size}, max-record-size: {max_record_size})"
            ),
        }
    }
}

/// Findings of one consistency pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub findings: Vec<Finding>,
}

impl ConsistencyReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Findings about misconfigured max-record-size.
    pub fn misconfigured(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| matches!(f, Finding::MaxRecordSizeMisconfigured { .. }))
    }
}

/// Checks the collected profile for configuration drift.
///
/// Mismatched values across nodes are only warned about. A node whose
/// max-record-size is not `write-block-size - 16` cannot reject oversized
/// records by itself: in preview mode (`dry_run`) that is a warning, in
/// active mode the run is aborted with [`AuditError::Misconfigured`].
pub fn check(profile: &ClusterProfile, dry_run: bool) -> Result<ConsistencyReport, AuditError> {
    let mut report = ConsistencyReport::default();

    let wbs: Vec<u64> = profile.values().map(|p| p.write_block_size).collect();
    if !values_in_sync(&wbs) {
        warn!(
            values = ?profile_values(profile, |p| p.write_block_size),
            "write-block-size are not uniform across nodes"
        );
        report.findings.push(Finding::WriteBlockSizeMismatch);
    }

    let mrs: Vec<u64> = profile.values().map(|p| p.max_record_size).collect();
    if !values_in_sync(&mrs) {
        warn!(
            values = ?profile_values(profile, |p| p.max_record_size),
            "max-record-size are not uniform across nodes"
        );
        report.findings.push(Finding::MaxRecordSizeMismatch);
    }

    for (node, p) in profile {
        let expected = p.write_block_size.saturating_sub(RECORD_OVERHEAD);
        if p.max_record_size == expected {
            continue;
        }
        let finding = Finding::MaxRecordSizeMisconfigured {
            node: node.clone(),
            write_block_size: p.write_block_size,
            max_record_size: p.max_record_size,
        };
        warn!("{finding}");
        if !dry_run {
            warn!(
                "max-record-size needs to be configured to successfully identify \
                 potential large records"
            );
            return Err(AuditError::Misconfigured {
                node: node.clone(),
                write_block_size: p.write_block_size,
                max_record_size: p.max_record_size,
                expected,
            });
        }
        report.findings.push(finding);
    }

    Ok(report)
}

fn profile_values(
    profile: &ClusterProfile,
    value: impl Fn(&crate::NodeProfile) -> u64,
) -> Vec<(&str, u64)> {
    profile
        .iter()
        .map(|(node, p)| (node.as_str(), value(p)))
        .collect()
}
