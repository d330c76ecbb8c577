//! Error types for cluster operations.

use std::fmt;
use std::io;

use wire::WireError;

/// A server result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u8);

impl ResultCode {
    pub const OK: ResultCode = ResultCode(0);
    pub const SERVER_ERROR: ResultCode = ResultCode(1);
    pub const KEY_NOT_FOUND: ResultCode = ResultCode(2);
    pub const PARAMETER_ERROR: ResultCode = ResultCode(4);
    /// Out of memory or device space; the namespace is in stop-writes.
    pub const SERVER_MEM_ERROR: ResultCode = ResultCode(8);
    pub const TIMEOUT: ResultCode = ResultCode(9);
    pub const PARTITION_UNAVAILABLE: ResultCode = ResultCode(11);
    /// The record does not fit in a write block.
    pub const RECORD_TOO_BIG: ResultCode = ResultCode(13);
    pub const SCAN_ABORT: ResultCode = ResultCode(15);
    pub const DEVICE_OVERLOAD: ResultCode = ResultCode(18);
    pub const FORBIDDEN: ResultCode = ResultCode(22);
    pub const SECURITY_NOT_ENABLED: ResultCode = ResultCode(52);
    pub const INVALID_USER: ResultCode = ResultCode(60);
    pub const INVALID_PASSWORD: ResultCode = ResultCode(62);
    pub const NOT_AUTHENTICATED: ResultCode = ResultCode(80);

    /// Short name for logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "ok",
            1 => "server error",
            2 => "key not found",
            4 => "parameter error",
            8 => "out of space",
            9 => "timeout",
            11 => "partition unavailable",
            13 => "record too big",
            15 => "scan aborted",
            18 => "device overload",
            22 => "forbidden",
            52 => "security not enabled",
            60 => "invalid user",
            62 => "invalid password",
            80 => "not authenticated",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name(), self.0)
    }
}

/// Errors that can occur while talking to the cluster.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// A TCP connection to a node could not be opened.
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Encoding, decoding or socket failure on an open connection.
    #[error("protocol error: {0}")]
    Wire(#[from] WireError),

    /// The server rejected a command.
    #[error("server error: {0}")]
    Server(ResultCode),

    /// Login was refused.
    #[error("authentication failed: {0}")]
    Auth(ResultCode),

    /// The node is unknown to this session or no longer active (quiesced).
    #[error("node {0} is not active")]
    InvalidNode(String),

    /// An info reply was missing or unusable.
    #[error("info from node {node}: {message}")]
    Info { node: String, message: String },

    /// The cluster is not stable (migrations, split brain, or nodes joining).
    #[error("cluster is not stable: {0}")]
    Unstable(String),

    /// The session was closed.
    #[error("cluster connection is closed")]
    Closed,
}

impl ClusterError {
    /// The server result code behind this error, if any.
    #[must_use]
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            ClusterError::Server(code) | ClusterError::Auth(code) => Some(*code),
            ClusterError::Wire(WireError::Server(code)) => Some(ResultCode(*code)),
            _ => None,
        }
    }

    /// Whether the server refused a write because the namespace is out of
    /// space.
    #[must_use]
    pub fn is_out_of_space(&self) -> bool {
        self.result_code() == Some(ResultCode::SERVER_MEM_ERROR)
    }

    /// Whether the server refused a write because the record is larger than
    /// a write block.
    #[must_use]
    pub fn is_record_too_big(&self) -> bool {
        self.result_code() == Some(ResultCode::RECORD_TOO_BIG)
    }
}
