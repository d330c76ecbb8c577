use cluster::ClusterError;

/// Process exit status of a successful run.
pub const EXIT_OK: u8 = 0;
/// Cluster unreachable or unstable, or an info query failed.
pub const EXIT_UNREACHABLE: u8 = 1;
/// The user interrupted the run.
pub const EXIT_INTERRUPTED: u8 = 2;
/// max-record-size is misconfigured and the run was active.
pub const EXIT_MISCONFIGURED: u8 = 3;
/// The namespace ran out of space while touching records.
pub const EXIT_OUT_OF_SPACE: u8 = 4;
/// Invalid configuration or command line.
pub const EXIT_USAGE: u8 = 64;

/// Errors that abort a whole audit run.
///
/// Anything narrower (a node that cannot be scanned, a record that cannot be
/// touched) is logged where it happens and never becomes an `AuditError`.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// An info query could not be run across the cluster.
    #[error("info command `{command}` failed: {source}")]
    Collect {
        command: String,
        #[source]
        source: ClusterError,
    },

    /// A node cannot report oversized records by itself, so touching would
    /// silently miss some of them.
    #[error(
        "node {node}: max-record-size is {max_record_size}, expected {expected} \
         (write-block-size {write_block_size} - 16)"
    )]
    Misconfigured {
        node: String,
        write_block_size: u64,
        max_record_size: u64,
        expected: u64,
    },

    /// A touch was refused because the namespace is in stop-writes.
    #[error("namespace {namespace} has no space left, touching records on node {node} failed")]
    OutOfSpace {
        namespace: String,
        node: String,
        #[source]
        source: ClusterError,
    },

    /// The user interrupted the run.
    #[error("interrupted")]
    Interrupted,
}

impl AuditError {
    /// Process exit status for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            AuditError::Collect { .. } => EXIT_UNREACHABLE,
            AuditError::Misconfigured { .. } => EXIT_MISCONFIGURED,
            AuditError::OutOfSpace { .. } => EXIT_OUT_OF_SPACE,
            AuditError::Interrupted => EXIT_INTERRUPTED,
        }
    }
}
