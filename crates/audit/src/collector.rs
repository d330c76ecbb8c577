//! Per-node namespace configuration and statistics.
//!
//! Two info commands are run on every node:
//!
//! | Command                                  | Values taken                                  |
//! |------------------------------------------|-----------------------------------------------|
//! | `get-config:context=namespace;id=<ns>`   | `write-block-size`                            |
//! | `namespace/<ns>`                         | `max-record-size`, `device_compression_ratio` |
//!
//! Both replies are `key=value;key=value;...` lists.

use std::collections::BTreeMap;

use cluster::Cluster;
use tracing::debug;

use crate::AuditError;

/// write-block-size assumed when a node does not report one.
pub const DEFAULT_WRITE_BLOCK_SIZE: u64 = 1_048_576;

/// max-record-size assumed when a node does not report one (unset).
pub const DEFAULT_MAX_RECORD_SIZE: u64 = 0;

const WRITE_BLOCK_SIZE: &str = "write-block-size";
const MAX_RECORD_SIZE: &str = "max-record-size";
const COMPRESSION_RATIO: &str = "device_compression_ratio";

/// Info command returning the namespace configuration.
#[must_use]
pub fn config_command(namespace: &str) -> String {
    format!("get-config:context=namespace;id={namespace}")
}

/// Info command returning the namespace statistics.
#[must_use]
pub fn stats_command(namespace: &str) -> String {
    format!("namespace/{namespace}")
}

/// A parsed `key=value;...` info reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoParams {
    values: BTreeMap<String, String>,
}

impl InfoParams {
    /// Parses a semicolon separated reply. Tokens without `=` or with an
    /// empty key are skipped.
    pub fn parse(reply: &str) -> Self {
        let mut values = BTreeMap::new();
        for token in reply.trim().split(';') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    values.insert(key.trim().to_string(), value.trim().to_string());
                }
                _ => debug!(token, "skipping malformed info token"),
            }
        }
        Self { values }
    }

    /// Value of `key`, matched exactly or as the last dotted component
    /// (`storage-engine.write-block-size` answers `write-block-size`).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        if let Some(v) = self.values.get(key) {
            return Some(v.as_str());
        }
        self.values
            .iter()
            .find(|(k, _)| {
                k.strip_suffix(key)
                    .is_some_and(|prefix| prefix.ends_with('.'))
            })
            .map(|(_, v)| v.as_str())
    }

    /// `key` parsed as an unsigned integer. Unparseable values count as
    /// absent.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        let raw = self.get(key)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                debug!(key, value = raw, "ignoring non-numeric info value");
                None
            }
        }
    }

    /// `key` parsed as a float. Unparseable or non-finite values count as
    /// absent.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        let raw = self.get(key)?;
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Some(v),
            _ => {
                debug!(key, value = raw, "ignoring non-numeric info value");
                None
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// What the audit knows about one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeProfile {
    pub write_block_size: u64,
    /// 0 when unset.
    pub max_record_size: u64,
    /// Average compression ratio, `Some` iff compression is enabled.
    pub compression: Option<f64>,
    /// Records matched by this node's scan so far.
    pub matched: u64,
}

impl NodeProfile {
    /// Builds a profile from the node's configuration and statistics
    /// replies, applying the defaults for anything missing.
    pub fn from_params(config: &InfoParams, stats: &InfoParams) -> Self {
        Self {
            write_block_size: config
                .get_u64(WRITE_BLOCK_SIZE)
                .unwrap_or(DEFAULT_WRITE_BLOCK_SIZE),
            max_record_size: stats
                .get_u64(MAX_RECORD_SIZE)
                .unwrap_or(DEFAULT_MAX_RECORD_SIZE),
            compression: stats.get_f64(COMPRESSION_RATIO),
            matched: 0,
        }
    }

    #[must_use]
    pub fn compression_enabled(&self) -> bool {
        self.compression.is_some()
    }
}

impl Default for NodeProfile {
    fn default() -> Self {
        Self {
            write_block_size: DEFAULT_WRITE_BLOCK_SIZE,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            compression: None,
            matched: 0,
        }
    }
}

/// Node name -> profile, in node name order.
pub type ClusterProfile = BTreeMap<String, NodeProfile>;

/// Queries every node for `namespace` and builds the cluster profile.
///
/// A node missing from one of the two replies still gets a profile; the
/// missing side falls back to defaults.
pub fn collect<C: Cluster + ?Sized>(
    cluster: &C,
    namespace: &str,
) -> Result<ClusterProfile, AuditError> {
    let query = |command: String| {
        cluster
            .info_all(&command)
            .map_err(|source| AuditError::Collect { command, source })
    };
    let configs = query(config_command(namespace))?;
    let stats = query(stats_command(namespace))?;

    let empty = String::new();
    let mut profile = ClusterProfile::new();
    for node in configs.keys().chain(stats.keys()) {
        if profile.contains_key(node) {
            continue;
        }
        let config = InfoParams::parse(configs.get(node).unwrap_or(&empty));
        let stat = InfoParams::parse(stats.get(node).unwrap_or(&empty));
        let p = NodeProfile::from_params(&config, &stat);
        debug!(
            node = %node,
            write_block_size = p.write_block_size,
            max_record_size = p.max_record_size,
            compression = ?p.compression,
            "collected node profile"
        );
        profile.insert(node.clone(), p);
    }
    Ok(profile)
}
