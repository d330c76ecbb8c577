use cluster::{MemNode, RecordIdentity};

use crate::collector::{config_command, stats_command};

pub const NS: &str = "bar";

/// A node of namespace `bar` reporting the given storage settings.
pub fn node(build: &str, wbs: u64, mrs: u64, ratio: Option<f64>) -> MemNode {
    let mut stats = format!("objects=10;max-record-size={mrs}");
    if let Some(r) = ratio {
        stats.push_str(&format!(";device_compression_ratio={r}"));
    }
    MemNode::new(build)
        .with_info(
            &config_command(NS),
            &format!("replication-factor=2;storage-engine.write-block-size={wbs}"),
        )
        .with_info(&stats_command(NS), &stats)
}

/// A node with a well configured 1 MiB write block and no compression.
pub fn healthy(build: &str) -> MemNode {
    node(build, 1_048_576, 1_048_560, None)
}

pub fn record(set: &str, n: u8) -> RecordIdentity {
    RecordIdentity {
        namespace: NS.to_string(),
        set_name: set.to_string(),
        user_key: None,
        digest: [n; 20],
    }
}
