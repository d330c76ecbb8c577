//! Shared value types passed across the [`crate::Cluster`] seam.

use std::fmt;

use wire::{DeviceSizeFilter, ScanRecord, UserKey, DIGEST_BYTES};

/// Identity of a record surfaced by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordIdentity {
    pub namespace: String,
    /// Empty when the record is not in a set.
    pub set_name: String,
    /// Only present when the record was written with its key stored.
    pub user_key: Option<UserKey>,
    pub digest: [u8; DIGEST_BYTES],
}

impl RecordIdentity {
    /// Lower-case hex of the digest.
    #[must_use]
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

impl From<ScanRecord> for RecordIdentity {
    fn from(r: ScanRecord) -> Self {
        Self {
            namespace: r.namespace,
            set_name: r.set_name,
            user_key: r.user_key,
            digest: r.digest,
        }
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace: {}, Set: {}, Primary Key: ", self.namespace, self.set_name)?;
        match &self.user_key {
            Some(k) => write!(f, "{k}")?,
            None => f.write_str("None")?,
        }
        write!(f, ", Digest: {}", self.digest_hex())
    }
}

/// What a scan visitor wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    /// Abandon the scan; no further records are delivered.
    Stop,
}

/// A metadata-only scan of one namespace (optionally one set).
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub namespace: String,
    /// `None` scans every set.
    pub set: Option<String>,
    pub filter: DeviceSizeFilter,
}

/// `major.minor.patch` of a node's server build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    /// First version with generalized filter expressions.
    pub const EXPRESSIONS: ServerVersion = ServerVersion::new(5, 2, 0);

    /// First version that rejects oversized records at write time on its
    /// own, making the scan redundant.
    pub const REJECTS_OVERSIZED: ServerVersion = ServerVersion::new(6, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses a `build` reply such as `5.1.0.3`, `6.1.0` or `build\t4.9.0.11`.
    ///
    /// Needs at least `major.minor`; a missing patch is 0 and a non-numeric
    /// tail on any component (`-ee`, `-rc1`) is ignored.
    pub fn parse(reply: &str) -> Option<Self> {
        let s = reply.trim();
        let s = s.rsplit('\t').next().unwrap_or(s).trim();

        let mut parts = s.split('.').map(leading_number);
        let major = parts.next().flatten()?;
        let minor = parts.next().flatten()?;
        let patch = parts.next().flatten().unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }

    /// Whether the node evaluates generalized filter expressions.
    #[must_use]
    pub fn supports_expressions(&self) -> bool {
        *self >= Self::EXPRESSIONS
    }

    /// Whether the node already refuses oversized records at write time.
    #[must_use]
    pub fn rejects_oversized_records(&self) -> bool {
        *self >= Self::REJECTS_OVERSIZED
    }
}

fn leading_number(part: &str) -> Option<u32> {
    let end = part
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(part.len());
    part[..end].parse().ok()
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
