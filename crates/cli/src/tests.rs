use super::*;
use clap::CommandFactory;
use std::io::Write;

fn config_from(args: &[&str]) -> Result<AuditConfig> {
    let mut argv = vec!["blockcheck"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv)?.into_config()
}

#[test]
fn command_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn defaults_without_flags() {
    let cfg = config_from(&[]).unwrap();
    assert_eq!(cfg.cluster.host, "127.0.0.1");
    assert_eq!(cfg.cluster.port, 3000);
    assert_eq!(cfg.audit.namespace, "bar");
    assert!(cfg.audit.dry_run);
}

#[test]
fn flags_override_defaults() {
    let cfg = config_from(&[
        "-H",
        "10.0.0.5",
        "-p",
        "4000",
        "-U",
        "admin",
        "-P",
        "secret",
        "--auth-mode",
        "external_insecure",
        "--alternate-address",
        "-n",
        "test",
        "-s",
        "users",
        "-m",
        "0.2",
        "--active",
        "--timeout-ms",
        "500",
        "-l",
        "debug",
    ])
    .unwrap();

    assert_eq!(cfg.cluster.host, "10.0.0.5");
    assert_eq!(cfg.cluster.port, 4000);
    assert_eq!(cfg.cluster.user.as_deref(), Some("admin"));
    assert_eq!(cfg.cluster.password.as_deref(), Some("secret"));
    assert_eq!(cfg.cluster.auth_mode, AuthMode::ExternalInsecure);
    assert!(cfg.cluster.use_alternate_address);
    assert_eq!(cfg.audit.namespace, "test");
    assert_eq!(cfg.set_name(), Some("users"));
    assert_eq!(cfg.audit.margin, 0.2);
    assert!(!cfg.audit.dry_run);
    assert_eq!(cfg.cluster.timeout_ms, 500);
    assert_eq!(cfg.log.level, "debug");
}

#[test]
fn flags_override_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[cluster]\nhost = \"db1\"\nport = 3100\n\n[audit]\nnamespace = \"prod\"\nmargin = 0.3"
    )
    .unwrap();
    let path = file.path().to_str().unwrap();

    let cfg = config_from(&["-c", path, "-m", "0.05"]).unwrap();
    assert_eq!(cfg.cluster.host, "db1");
    assert_eq!(cfg.cluster.port, 3100);
    assert_eq!(cfg.audit.namespace, "prod");
    assert_eq!(cfg.audit.margin, 0.05);
}

#[test]
fn dry_run_flag_overrides_active_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[cluster]\nuse_alternate_address = true\n\n[audit]\ndry_run = false"
    )
    .unwrap();
    let path = file.path().to_str().unwrap();

    let cfg = config_from(&["-c", path]).unwrap();
    assert!(!cfg.audit.dry_run);
    assert!(cfg.cluster.use_alternate_address);

    let cfg = config_from(&["-c", path, "--dry-run", "--no-alternate-address"]).unwrap();
    assert!(cfg.audit.dry_run);
    assert!(!cfg.cluster.use_alternate_address);
}

#[test]
fn active_and_dry_run_conflict() {
    assert!(Cli::try_parse_from(["blockcheck", "--active", "--dry-run"]).is_err());
    assert!(Cli::try_parse_from([
        "blockcheck",
        "--alternate-address",
        "--no-alternate-address"
    ])
    .is_err());
}

#[test]
fn invalid_margin_is_rejected() {
    let err = config_from(&["-m", "1.5"]).unwrap_err();
    assert!(format!("{err:#}").contains("audit.margin"));
}

#[test]
fn unknown_auth_mode_is_rejected() {
    assert!(Cli::try_parse_from(["blockcheck", "--auth-mode", "kerberos"]).is_err());
}

#[test]
fn missing_config_file_is_an_error() {
    assert!(config_from(&["-c", "/nonexistent/blockcheck.toml"]).is_err());
}

#[test]
fn unreachable_cluster_exits_with_one() {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let port = port.to_string();
    let cfg = config_from(&["-p", &port, "--timeout-ms", "500"]).unwrap();
    assert_eq!(run(&cfg, Interrupt::new()), audit::EXIT_UNREACHABLE);
}
