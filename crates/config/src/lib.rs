//! # Config - Blockcheck run configuration
//!
//! Every knob of an audit run lives in [`AuditConfig`]. Values come from
//! three layers, later layers winning:
//!
//! ```text
//! built-in defaults  ->  TOML file (--config)  ->  CLI flags / BLOCKCHECK_* env
//! ```
//!
//! ## File format
//!
//! ```toml
//! [cluster]
//! host = "10.0.0.5"
//! port = 3000
//! user = "admin"
//! password = "admin123"
//! auth_mode = "internal"        # internal | external | external-insecure | pki
//! use_alternate_address = false
//! timeout_ms = 30000
//!
//! [audit]
//! namespace = "bar"
//! set = ""                      # empty = every set in the namespace
//! margin = 0.10                 # compression ratio variance margin
//! dry_run = true                # false = touch flagged records
//!
//! [log]
//! level = "info"
//! ```

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Default seed host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default service port of a cluster node.
pub const DEFAULT_PORT: u16 = 3000;
/// Default namespace to audit.
pub const DEFAULT_NAMESPACE: &str = "bar";
/// Default compression ratio variance margin (10%).
pub const DEFAULT_MARGIN: f64 = 0.10;
/// Default socket timeout for info and touch commands.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML or has mistyped fields.
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its accepted range.
    #[error("invalid setting `{field}`: {reason}")]
    Invalid {
        /// Dotted name of the offending setting.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}

/// How the client authenticates against the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Server-side users; only the hashed credential is sent.
    #[default]
    Internal,
    /// External (e.g. LDAP) users; the clear password is sent over TLS.
    External,
    /// External users without TLS.
    ExternalInsecure,
    /// Certificate based; no user or password.
    Pki,
}

impl AuthMode {
    /// Whether the clear-text password is sent along with the hash.
    #[must_use]
    pub fn sends_clear_password(self) -> bool {
        matches!(self, AuthMode::External | AuthMode::ExternalInsecure)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthMode::Internal => "internal",
            AuthMode::External => "external",
            AuthMode::ExternalInsecure => "external-insecure",
            AuthMode::Pki => "pki",
        };
        f.write_str(s)
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "internal" => Ok(AuthMode::Internal),
            "external" => Ok(AuthMode::External),
            "external-insecure" => Ok(AuthMode::ExternalInsecure),
            "pki" => Ok(AuthMode::Pki),
            other => Err(format!(
                "unknown auth mode `{other}` (expected internal, external, external-insecure or pki)"
            )),
        }
    }
}

/// `[cluster]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Seed host name or address.
    pub host: String,
    /// Seed service port.
    pub port: u16,
    /// User name; `None` means the cluster runs without security.
    pub user: Option<String>,
    /// Password for `user`.
    pub password: Option<String>,
    /// Authentication mode.
    pub auth_mode: AuthMode,
    /// Reach peers through their alternate-access-address.
    pub use_alternate_address: bool,
    /// Socket timeout for info and touch commands, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: None,
            password: None,
            auth_mode: AuthMode::Internal,
            use_alternate_address: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// `[audit]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    /// Namespace to scan.
    pub namespace: String,
    /// Set to scan; empty scans every set in the namespace.
    pub set: String,
    /// Fraction of write-block-size subtracted from the compressed threshold.
    pub margin: f64,
    /// Report only. When false, every flagged record is touched.
    pub dry_run: bool,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            set: String::new(),
            margin: DEFAULT_MARGIN,
            dry_run: true,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level configuration of an audit run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Connection settings.
    pub cluster: ClusterSection,
    /// What to scan and how to act on matches.
    pub audit: AuditSection,
    /// Logging.
    pub log: LogSection,
}

impl AuditConfig {
    /// Loads the config from a TOML file, or returns the defaults when no
    /// path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parses a config from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Checks value ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audit.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "audit.namespace",
                reason: "must not be empty".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.audit.margin) {
            return Err(ConfigError::Invalid {
                field: "audit.margin",
                reason: format!("{} is outside [0, 1)", self.audit.margin),
            });
        }
        if self.cluster.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "cluster.host",
                reason: "must not be empty".to_string(),
            });
        }
        if self.cluster.port == 0 {
            return Err(ConfigError::Invalid {
                field: "cluster.port",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.cluster.user.is_some()
            && self.cluster.password.is_none()
            && self.cluster.auth_mode != AuthMode::Pki
        {
            return Err(ConfigError::Invalid {
                field: "cluster.password",
                reason: format!("required for {} auth", self.cluster.auth_mode),
            });
        }
        Ok(())
    }

    /// Socket timeout for info and touch commands.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.timeout_ms)
    }

    /// Set filter for scans; `None` scans the whole namespace.
    #[must_use]
    pub fn set_name(&self) -> Option<&str> {
        if self.audit.set.is_empty() {
            None
        } else {
            Some(self.audit.set.as_str())
        }
    }
}
