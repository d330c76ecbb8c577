use super::helpers::{healthy, record, NS};
use crate::*;
use anyhow::Result;
use cluster::{Cluster, ClusterError, MemCluster, RecordIdentity, ScanControl, ScanRequest};
use config::AuditConfig;
use std::collections::BTreeMap;

/// Raises the interrupt while a node is being scanned, as Ctrl+C would.
struct InterruptDuringScan {
    inner: MemCluster,
    interrupt: Interrupt,
}

impl Cluster for InterruptDuringScan {
    fn node_names(&self) -> Vec<String> {
        self.inner.node_names()
    }

    fn info_all(&self, command: &str) -> Result<BTreeMap<String, String>, ClusterError> {
        self.inner.info_all(command)
    }

    fn info_node(&self, node: &str, command: &str) -> Result<String, ClusterError> {
        self.inner.info_node(node, command)
    }

    fn scan_node(
        &self,
        node: &str,
        request: &ScanRequest,
        visit: &mut dyn FnMut(RecordIdentity) -> ScanControl,
    ) -> Result<(), ClusterError> {
        self.interrupt.raise();
        self.inner.scan_node(node, request, visit)
    }

    fn touch(&self, node: &str, record: &RecordIdentity, ttl: u32) -> Result<(), ClusterError> {
        self.inner.touch(node, record, ttl)
    }
}

#[test]
fn interrupt_reports_second_raise() {
    let interrupt = Interrupt::new();
    assert!(!interrupt.is_raised());
    assert!(!interrupt.raise());
    assert!(interrupt.raise());
    assert!(interrupt.clone().is_raised());
}

#[test]
fn options_from_config() {
    let mut cfg = AuditConfig::default();
    let opts = AuditOptions::from_config(&cfg);
    assert_eq!(opts.namespace, "bar");
    assert_eq!(opts.set, None);
    assert!(opts.dry_run);
    assert_eq!(opts.mode(), Mode::Preview);
    assert_eq!(opts, AuditOptions::default());

    cfg.audit.set = "users".to_string();
    cfg.audit.dry_run = false;
    let opts = AuditOptions::from_config(&cfg);
    assert_eq!(opts.set.as_deref(), Some("users"));
    assert_eq!(opts.mode(), Mode::Active);
}

#[test]
fn run_reports_every_node_in_name_order() -> Result<()> {
    let cluster = MemCluster::new()
        .with_node("C", healthy("5.1.0"))
        .with_node("A", healthy("5.1.0").with_record(record("s", 1), 1_048_560))
        .with_node("B", healthy("6.0.0"));

    let summary = Auditor::new(&cluster, AuditOptions::default()).run()?;
    let names: Vec<_> = summary.nodes.iter().map(|n| n.node.as_str()).collect();
    assert_eq!(names, ["A", "B", "C"]);
    assert_eq!(summary.node("A").map(|n| n.matched), Some(1));
    assert!(summary.consistency.is_clean());
    Ok(())
}

#[test]
fn raised_interrupt_stops_before_first_node() {
    let cluster = MemCluster::new().with_node("A", healthy("5.1.0"));
    let interrupt = Interrupt::new();
    interrupt.raise();

    let err = Auditor::new(&cluster, AuditOptions::default())
        .with_interrupt(interrupt)
        .run()
        .unwrap_err();
    assert!(matches!(err, AuditError::Interrupted));
    assert_eq!(err.exit_code(), EXIT_INTERRUPTED);
    assert!(cluster.scans().is_empty());
}

#[test]
fn interrupt_during_quiet_scan_fails_the_run() {
    let interrupt = Interrupt::new();
    let cluster = InterruptDuringScan {
        inner: MemCluster::new().with_node("A", healthy("5.1.0")),
        interrupt: interrupt.clone(),
    };

    let err = Auditor::new(&cluster, AuditOptions::default())
        .with_interrupt(interrupt)
        .run()
        .unwrap_err();
    assert!(matches!(err, AuditError::Interrupted));
    assert_eq!(err.exit_code(), EXIT_INTERRUPTED);
}

#[test]
fn interrupt_during_scan_skips_remaining_nodes() {
    let interrupt = Interrupt::new();
    let cluster = InterruptDuringScan {
        inner: MemCluster::new()
            .with_node("A", healthy("5.1.0"))
            .with_node("B", healthy("5.1.0")),
        interrupt: interrupt.clone(),
    };

    let result = Auditor::new(&cluster, AuditOptions::default())
        .with_interrupt(interrupt)
        .run();
    assert!(matches!(result, Err(AuditError::Interrupted)));
    assert_eq!(cluster.inner.scans().len(), 1);
}

#[test]
fn auditor_debug_shows_options() {
    let cluster = MemCluster::new();
    let auditor = Auditor::new(&cluster, AuditOptions::default());
    let text = format!("{auditor:?}");
    assert!(text.contains(NS));
    assert!(text.contains("interrupted: false"));
}
