//! # blockcheck - oversized record audit
//!
//! Connects to a cluster, derives a device size threshold per node from its
//! write-block-size and compression ratio, and scans each node for records
//! at or above it. Matches are logged (preview, the default) or touched
//! (`--active`) so the server rewrites them.
//!
//! ## Configuration
//!
//! Built-in defaults, then the TOML file given with `--config`, then flags.
//! Every flag can also come from the environment:
//!
//! ```text
//! BLOCKCHECK_CONFIG            TOML config file
//! BLOCKCHECK_HOST              seed host                (default: 127.0.0.1)
//! BLOCKCHECK_PORT              seed port                (default: 3000)
//! BLOCKCHECK_USER              user name
//! BLOCKCHECK_PASSWORD          password
//! BLOCKCHECK_AUTH_MODE         internal | external | external-insecure | pki
//! BLOCKCHECK_ALTERNATE_ADDRESS use peers' alternate-access-address
//! BLOCKCHECK_NAMESPACE         namespace                (default: bar)
//! BLOCKCHECK_SET               set, empty = all sets
//! BLOCKCHECK_MARGIN            compression variance     (default: 0.10)
//! BLOCKCHECK_ACTIVE            touch matches instead of logging them
//! BLOCKCHECK_DRY_RUN           force preview over a config file's dry_run = false
//! BLOCKCHECK_TIMEOUT_MS        socket timeout           (default: 30000)
//! BLOCKCHECK_LOG               log level                (default: info)
//! ```
//!
//! `RUST_LOG` overrides the log level.
//!
//! ## Exit Codes
//!
//! | Code | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 0    | audit completed                                      |
//! | 1    | cluster unreachable or unstable, info query failed   |
//! | 2    | interrupted (Ctrl+C)                                 |
//! | 3    | max-record-size misconfigured (active mode only)     |
//! | 4    | namespace out of space while touching                |
//! | 64   | invalid configuration                                |
//!
//! ## Example
//!
//! ```text
//! $ blockcheck -H 10.0.0.5 -U admin -P admin123 -n bar
//! ... INFO audit: Node: BB9020011AC4202 Returned Record Count: 3 outcome="scanned"
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use audit::{AuditError, AuditOptions, Auditor, Interrupt};
use clap::Parser;
use cluster::{Cluster, ConnectPolicy, TcpCluster};
use config::{AuditConfig, AuthMode};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "blockcheck",
    version,
    about = "Find records likely to exceed a node's write-block-size"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, env = "BLOCKCHECK_CONFIG")]
    config: Option<PathBuf>,

    /// Seed host.
    #[arg(short = 'H', long, env = "BLOCKCHECK_HOST")]
    host: Option<String>,

    /// Seed port.
    #[arg(short, long, env = "BLOCKCHECK_PORT")]
    port: Option<u16>,

    #[arg(short = 'U', long, env = "BLOCKCHECK_USER")]
    user: Option<String>,

    #[arg(short = 'P', long, env = "BLOCKCHECK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// internal, external, external-insecure or pki.
    #[arg(long, env = "BLOCKCHECK_AUTH_MODE")]
    auth_mode: Option<AuthMode>,

    /// Reach peers through their alternate-access-address.
    #[arg(long, env = "BLOCKCHECK_ALTERNATE_ADDRESS")]
    alternate_address: bool,

    /// Reach peers through their access-address even if the config file
    /// says otherwise.
    #[arg(long, conflicts_with = "alternate_address")]
    no_alternate_address: bool,

    /// Namespace to audit.
    #[arg(short, long, env = "BLOCKCHECK_NAMESPACE")]
    namespace: Option<String>,

    /// Set to audit; empty audits every set.
    #[arg(short, long, env = "BLOCKCHECK_SET")]
    set: Option<String>,

    /// Fraction of write-block-size subtracted from compressed thresholds.
    #[arg(short, long, env = "BLOCKCHECK_MARGIN")]
    margin: Option<f64>,

    /// Touch matching records instead of only logging them.
    #[arg(long, env = "BLOCKCHECK_ACTIVE")]
    active: bool,

    /// Only log matching records, even if the config file enables touching.
    #[arg(long, env = "BLOCKCHECK_DRY_RUN", conflicts_with = "active")]
    dry_run: bool,

    /// Socket timeout in milliseconds.
    #[arg(long, env = "BLOCKCHECK_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Log level or filter directive.
    #[arg(short, long, env = "BLOCKCHECK_LOG")]
    log: Option<String>,
}

impl Cli {
    /// Loads the config file (if any), applies flag overrides and validates.
    fn into_config(self) -> Result<AuditConfig> {
        let mut cfg = AuditConfig::load(self.config.as_deref()).context("failed to load config")?;

        if let Some(host) = self.host {
            cfg.cluster.host = host;
        }
        if let Some(port) = self.port {
            cfg.cluster.port = port;
        }
        if self.user.is_some() {
            cfg.cluster.user = self.user;
        }
        if self.password.is_some() {
            cfg.cluster.password = self.password;
        }
        if let Some(mode) = self.auth_mode {
            cfg.cluster.auth_mode = mode;
        }
        if self.alternate_address {
            cfg.cluster.use_alternate_address = true;
        } else if self.no_alternate_address {
            cfg.cluster.use_alternate_address = false;
        }
        if let Some(ns) = self.namespace {
            cfg.audit.namespace = ns;
        }
        if let Some(set) = self.set {
            cfg.audit.set = set;
        }
        if let Some(margin) = self.margin {
            cfg.audit.margin = margin;
        }
        if self.active {
            cfg.audit.dry_run = false;
        } else if self.dry_run {
            cfg.audit.dry_run = true;
        }
        if let Some(ms) = self.timeout_ms {
            cfg.cluster.timeout_ms = ms;
        }
        if let Some(level) = self.log {
            cfg.log.level = level;
        }

        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}

fn main() -> ExitCode {
    let cfg = match Cli::parse().into_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("blockcheck: {e:#}");
            return ExitCode::from(audit::EXIT_USAGE);
        }
    };

    setup_tracing(&cfg.log.level);

    let interrupt = Interrupt::new();
    if let Err(e) = install_interrupt_handler(&interrupt) {
        warn!(error = %e, "Ctrl+C handler not installed");
    }

    ExitCode::from(run(&cfg, interrupt))
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// First Ctrl+C raises `interrupt`; the audit stops at its next record or
/// node. A second one exits on the spot.
fn install_interrupt_handler(interrupt: &Interrupt) -> Result<(), ctrlc::Error> {
    let flag = interrupt.clone();
    ctrlc::set_handler(move || {
        if flag.raise() {
            std::process::exit(i32::from(audit::EXIT_INTERRUPTED));
        }
        warn!("interrupt received, stopping (press Ctrl+C again to exit now)");
    })
}

/// Connects, audits and closes the session. Returns the exit status.
fn run(cfg: &AuditConfig, interrupt: Interrupt) -> u8 {
    let cluster = match connect(cfg) {
        Ok(cluster) => cluster,
        Err(e) => {
            error!("{e:#}");
            return audit::EXIT_UNREACHABLE;
        }
    };

    let result = Auditor::new(&cluster, AuditOptions::from_config(cfg))
        .with_interrupt(interrupt)
        .run();
    cluster.close();

    match result {
        Ok(summary) => {
            info!(
                nodes = summary.nodes.len(),
                matched = summary.total_matched(),
                "audit complete"
            );
            audit::EXIT_OK
        }
        Err(AuditError::Interrupted) => {
            warn!("Detected interrupt signal (CTRL+C) -- exiting");
            audit::EXIT_INTERRUPTED
        }
        Err(e) => {
            error!("{e}");
            e.exit_code()
        }
    }
}

fn connect(cfg: &AuditConfig) -> Result<TcpCluster> {
    let policy = ConnectPolicy::from_config(cfg).context("cannot prepare credentials")?;
    let seed = format!("{}:{}", policy.host, policy.port);
    let cluster = TcpCluster::connect(policy)
        .with_context(|| format!("failed to connect to cluster at {seed}"))?;
    let key = cluster
        .check_stable()
        .context("cluster stability check failed")?;
    info!(cluster_key = %key, nodes = cluster.node_names().len(), "cluster is stable");
    Ok(cluster)
}

#[cfg(test)]
mod tests;
