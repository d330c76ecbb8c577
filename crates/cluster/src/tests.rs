use super::*;
use config::{AuditConfig, AuthMode};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use wire::{Field, FieldType, Message, MsgHeader, ProtoHeader, ProtoType, INFO3_LAST};

// -------------------- Helpers --------------------

fn ident(set: &str, digest_byte: u8) -> RecordIdentity {
    RecordIdentity {
        namespace: "bar".to_string(),
        set_name: set.to_string(),
        user_key: None,
        digest: [digest_byte; 20],
    }
}

fn request(threshold: u64) -> ScanRequest {
    ScanRequest {
        namespace: "bar".to_string(),
        set: None,
        filter: DeviceSizeFilter::new(FilterKind::Expression, threshold),
    }
}

/// Serves canned replies on a local port: info commands are answered from
/// `infos`, a scan streams one record then the end marker, a touch gets
/// `touch_code`.
fn spawn_fake_node(infos: Vec<(&'static str, String)>, touch_code: u8) -> u16 {
    spawn_node(infos, touch_code, false)
}

/// Like `spawn_fake_node`, but scans are accepted and never answered.
fn spawn_stalled_node(infos: Vec<(&'static str, String)>) -> u16 {
    spawn_node(infos, 0, true)
}

fn spawn_node(infos: Vec<(&'static str, String)>, touch_code: u8, stall_scans: bool) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        for conn in listener.incoming() {
            let Ok(mut conn) = conn else { return };
            let infos = infos.clone();
            thread::spawn(move || serve(&mut conn, &infos, touch_code, stall_scans));
        }
    });
    port
}

fn serve(
    conn: &mut TcpStream,
    infos: &[(&'static str, String)],
    touch_code: u8,
    stall_scans: bool,
) {
    while let Ok(header) = ProtoHeader::read_from(conn) {
        let mut body = vec![0u8; header.size as usize];
        if conn.read_exact(&mut body).is_err() {
            return;
        }
        let reply = match header.kind {
            ProtoType::Info => {
                let text = String::from_utf8(body).unwrap();
                let mut out = String::new();
                for cmd in text.lines() {
                    let value = infos
                        .iter()
                        .find(|(k, _)| *k == cmd)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default();
                    out.push_str(&format!("{cmd}\t{value}\n"));
                }
                frame(ProtoType::Info, out.as_bytes())
            }
            ProtoType::Message => {
                let req = Message::decode(&mut body.as_slice()).unwrap();
                if req.ops.is_empty() && stall_scans {
                    thread::sleep(std::time::Duration::from_secs(30));
                    return;
                }
                if req.ops.is_empty() {
                    let rec = Message {
                        fields: vec![
                            Field::new(FieldType::Namespace, b"bar".to_vec()),
                            Field::new(FieldType::Digest, vec![5u8; 20]),
                        ],
                        ..Message::default()
                    };
                    let last = Message {
                        header: MsgHeader {
                            info3: INFO3_LAST,
                            ..MsgHeader::default()
                        },
                        ..Message::default()
                    };
                    let mut b = rec.encode().unwrap();
                    b.extend(last.encode().unwrap());
                    frame(ProtoType::Message, &b)
                } else {
                    let reply = Message {
                        header: MsgHeader {
                            result_code: touch_code,
                            ..MsgHeader::default()
                        },
                        ..Message::default()
                    };
                    frame(ProtoType::Message, &reply.encode().unwrap())
                }
            }
            _ => return,
        };
        if conn.write_all(&reply).is_err() {
            return;
        }
    }
}

fn frame(kind: ProtoType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    wire::write_frame(&mut out, kind, body).unwrap();
    out
}

fn local_policy(port: u16) -> ConnectPolicy {
    ConnectPolicy {
        host: "127.0.0.1".to_string(),
        port,
        credentials: None,
        use_alternate_address: false,
        timeout: std::time::Duration::from_secs(5),
    }
}

// -------------------- ServerVersion --------------------

#[test]
fn version_parses_build_replies() {
    assert_eq!(ServerVersion::parse("5.1.0.3"), Some(ServerVersion::new(5, 1, 0)));
    assert_eq!(ServerVersion::parse("6.1.0"), Some(ServerVersion::new(6, 1, 0)));
    assert_eq!(ServerVersion::parse("build\t4.9.0.11\n"), Some(ServerVersion::new(4, 9, 0)));
    assert_eq!(ServerVersion::parse("5.7"), Some(ServerVersion::new(5, 7, 0)));
    assert_eq!(ServerVersion::parse("5.6.0-ee"), Some(ServerVersion::new(5, 6, 0)));
    assert_eq!(ServerVersion::parse("garbage"), None);
    assert_eq!(ServerVersion::parse("7"), None);
    assert_eq!(ServerVersion::parse(""), None);
}

#[test]
fn version_capabilities_have_inclusive_lower_bounds() {
    let v = |s| ServerVersion::parse(s).unwrap();

    assert!(!v("5.1.0").supports_expressions());
    assert!(v("5.2.0").supports_expressions());
    assert!(v("5.3.0").supports_expressions());

    assert!(!v("5.7.0").rejects_oversized_records());
    assert!(v("6.0.0").rejects_oversized_records());
    assert!(v("6.1.0").rejects_oversized_records());
}

#[test]
fn versions_order_numerically() {
    assert!(ServerVersion::new(5, 10, 0) > ServerVersion::new(5, 9, 9));
    assert!(ServerVersion::new(4, 99, 0) < ServerVersion::new(5, 0, 0));
    assert_eq!(ServerVersion::new(5, 2, 1).to_string(), "5.2.1");
}

// -------------------- Errors --------------------

#[test]
fn result_codes_classify_errors() {
    assert!(ClusterError::Server(ResultCode::SERVER_MEM_ERROR).is_out_of_space());
    assert!(ClusterError::Server(ResultCode::RECORD_TOO_BIG).is_record_too_big());
    assert!(ClusterError::Wire(wire::WireError::Server(13)).is_record_too_big());
    assert!(!ClusterError::InvalidNode("A".into()).is_out_of_space());
    assert_eq!(ClusterError::Closed.result_code(), None);
    assert_eq!(ResultCode::RECORD_TOO_BIG.to_string(), "record too big [13]");
}

// -------------------- RecordIdentity --------------------

#[test]
fn record_identity_display_lists_every_part() {
    let mut r = ident("users", 0xab);
    assert_eq!(
        r.to_string(),
        format!(
            "Namespace: bar, Set: users, Primary Key: None, Digest: {}",
            "ab".repeat(20)
        )
    );

    r.user_key = Some(UserKey::Str("u-1".to_string()));
    assert!(r.to_string().contains("Primary Key: u-1,"));
}

// -------------------- Stability --------------------

#[test]
fn stable_cluster_returns_key() {
    let cluster = MemCluster::new()
        .with_node("A", MemNode::new("5.1.0"))
        .with_node("B", MemNode::new("5.1.0"));
    assert_eq!(cluster.check_stable().unwrap(), "A1B2C3D4E5F6");
}

#[test]
fn disagreeing_cluster_keys_are_unstable() {
    let cluster = MemCluster::new()
        .with_node("A", MemNode::new("5.1.0"))
        .with_node("B", MemNode::new("5.1.0").with_info(CLUSTER_STABLE_COMMAND, "FFFF"));
    assert!(matches!(cluster.check_stable(), Err(ClusterError::Unstable(_))));
}

#[test]
fn error_reply_is_unstable() {
    let cluster = MemCluster::new().with_node(
        "A",
        MemNode::new("5.1.0").with_info(CLUSTER_STABLE_COMMAND, "ERROR::unstable-cluster"),
    );
    assert!(matches!(cluster.check_stable(), Err(ClusterError::Unstable(_))));
}

#[test]
fn empty_cluster_is_unstable() {
    assert!(matches!(
        MemCluster::new().check_stable(),
        Err(ClusterError::Unstable(_))
    ));
}

#[test]
fn unreachable_node_fails_stability_check() {
    let cluster = MemCluster::new()
        .with_node("A", MemNode::new("5.1.0"))
        .with_node("B", MemNode::new("5.1.0").down());
    assert!(matches!(
        cluster.check_stable(),
        Err(ClusterError::Connect { .. })
    ));
}

#[test]
fn server_version_reads_build_info() {
    let cluster = MemCluster::new()
        .with_node("A", MemNode::new("5.3.0.1"))
        .with_node("B", MemNode::new("not-a-version"));
    assert_eq!(cluster.server_version("A").unwrap(), ServerVersion::new(5, 3, 0));
    assert!(matches!(
        cluster.server_version("B"),
        Err(ClusterError::Info { .. })
    ));
    assert!(matches!(
        cluster.server_version("Z"),
        Err(ClusterError::InvalidNode(_))
    ));
}

// -------------------- MemCluster --------------------

#[test]
fn mem_scan_applies_filter_namespace_and_set() {
    let mut other_ns = ident("users", 9);
    other_ns.namespace = "test".to_string();
    let cluster = MemCluster::new().with_node(
        "A",
        MemNode::new("5.1.0")
            .with_record(ident("users", 1), 2000)
            .with_record(ident("users", 2), 10)
            .with_record(ident("events", 3), 5000)
            .with_record(other_ns, 5000),
    );

    let mut seen = Vec::new();
    cluster
        .scan_node("A", &request(1000), &mut |r| {
            seen.push(r.digest[0]);
            ScanControl::Continue
        })
        .unwrap();
    assert_eq!(seen, vec![1, 3]);

    let mut users_only = request(1000);
    users_only.set = Some("users".to_string());
    seen.clear();
    cluster
        .scan_node("A", &users_only, &mut |r| {
            seen.push(r.digest[0]);
            ScanControl::Continue
        })
        .unwrap();
    assert_eq!(seen, vec![1]);
    assert_eq!(cluster.scans().len(), 2);
}

#[test]
fn mem_scan_stops_when_visitor_asks() {
    let cluster = MemCluster::new().with_node(
        "A",
        MemNode::new("5.1.0")
            .with_record(ident("s", 1), 100)
            .with_record(ident("s", 2), 100)
            .with_record(ident("s", 3), 100),
    );
    let mut visits = 0;
    cluster
        .scan_node("A", &request(0), &mut |_| {
            visits += 1;
            ScanControl::Stop
        })
        .unwrap();
    assert_eq!(visits, 1);
}

#[test]
fn mem_scan_failures_map_to_errors() {
    let cluster = MemCluster::new()
        .with_node("A", MemNode::new("5.1.0").with_scan_failure(MemFailure::Inactive))
        .with_node(
            "B",
            MemNode::new("5.1.0").with_scan_failure(MemFailure::Server(ResultCode::SCAN_ABORT)),
        );
    let mut noop = |_: RecordIdentity| ScanControl::Continue;
    assert!(matches!(
        cluster.scan_node("A", &request(0), &mut noop),
        Err(ClusterError::InvalidNode(_))
    ));
    assert!(matches!(
        cluster.scan_node("B", &request(0), &mut noop),
        Err(ClusterError::Server(ResultCode::SCAN_ABORT))
    ));
}

#[test]
fn mem_touch_records_calls_and_overrides() {
    let cluster = MemCluster::new()
        .with_node("A", MemNode::new("5.1.0"))
        .with_touch_override([2u8; 20], ResultCode::RECORD_TOO_BIG);

    assert!(cluster.touch("A", &ident("s", 1), 0).is_ok());
    let err = cluster.touch("A", &ident("s", 2), 0).unwrap_err();
    assert!(err.is_record_too_big());

    let touches = cluster.touches();
    assert_eq!(touches.len(), 2);
    assert_eq!(touches[0].digest, [1u8; 20]);
    assert_eq!(touches[1].ttl, 0);
}

#[test]
fn mem_count_matching_uses_filter() {
    let cluster = MemCluster::new().with_node(
        "A",
        MemNode::new("5.1.0")
            .with_record(ident("s", 1), 1_048_560)
            .with_record(ident("s", 2), 1_048_559),
    );
    let f = DeviceSizeFilter::new(FilterKind::PredExp, 1_048_560);
    assert_eq!(cluster.count_matching("A", &f), 1);
    assert_eq!(cluster.count_matching("missing", &f), 0);
}

// -------------------- Peers --------------------

#[test]
fn peers_reply_parses_addresses_and_default_port() {
    let peers =
        parse_peers("12,3000,[[BB9030011AC4202,,[172.17.0.3]],[BB9020011AC4202,,[172.17.0.2:3100]]]")
            .unwrap();
    assert_eq!(
        peers,
        vec![
            Peer {
                node: "BB9030011AC4202".into(),
                host: "172.17.0.3".into(),
                port: 3000
            },
            Peer {
                node: "BB9020011AC4202".into(),
                host: "172.17.0.2".into(),
                port: 3100
            },
        ]
    );
}

#[test]
fn peers_reply_handles_ipv6_and_multiple_addresses() {
    let peers = parse_peers("1,3000,[[A1,tls1,[[2001:db8::1]:4000,10.0.0.1]],[B2,,[[::1]]]]").unwrap();
    assert_eq!(peers[0].host, "2001:db8::1");
    assert_eq!(peers[0].port, 4000);
    assert_eq!(peers[1].host, "::1");
    assert_eq!(peers[1].port, 3000);
}

#[test]
fn empty_peers_list_is_ok() {
    assert!(parse_peers("4,3000,[]").unwrap().is_empty());
}

#[test]
fn malformed_peers_reply_is_error() {
    assert!(parse_peers("nonsense").is_err());
    assert!(parse_peers("1,notaport,[]").is_err());
    assert!(parse_peers("1,3000,[[A1,[1.2.3.4]]]").is_err());
}

// -------------------- ConnectPolicy --------------------

#[test]
fn policy_without_user_has_no_credentials() {
    let policy = ConnectPolicy::from_config(&AuditConfig::default()).unwrap();
    assert!(policy.credentials.is_none());
    assert_eq!(policy.port, 3000);
}

#[test]
fn policy_hashes_password_and_sends_clear_only_for_external() {
    let mut cfg = AuditConfig::default();
    cfg.cluster.user = Some("admin".to_string());
    cfg.cluster.password = Some("admin123".to_string());

    let internal = ConnectPolicy::from_config(&cfg).unwrap().credentials.unwrap();
    assert!(internal.credential.starts_with("$2a$10$"));
    assert!(internal.clear_password.is_none());

    cfg.cluster.auth_mode = AuthMode::External;
    let external = ConnectPolicy::from_config(&cfg).unwrap().credentials.unwrap();
    assert_eq!(external.clear_password.as_deref(), Some("admin123"));
    assert!(!format!("{external:?}").contains("admin123"));

    cfg.cluster.auth_mode = AuthMode::Pki;
    assert!(ConnectPolicy::from_config(&cfg).unwrap().credentials.is_none());
}

// -------------------- TcpCluster --------------------

#[test]
fn tcp_connect_discovers_seed_and_answers_info() {
    let port = spawn_fake_node(
        vec![
            ("node", "BB9000000000001".to_string()),
            ("peers-clear-std", "1,3000,[]".to_string()),
            ("build", "5.1.0.3".to_string()),
            (CLUSTER_STABLE_COMMAND, "CAFE".to_string()),
        ],
        0,
    );

    let cluster = TcpCluster::connect(local_policy(port)).unwrap();
    assert_eq!(cluster.node_names(), vec!["BB9000000000001".to_string()]);
    assert_eq!(
        cluster.server_version("BB9000000000001").unwrap(),
        ServerVersion::new(5, 1, 0)
    );
    assert_eq!(cluster.check_stable().unwrap(), "CAFE");
    assert!(matches!(
        cluster.info_node("nope", "build"),
        Err(ClusterError::InvalidNode(_))
    ));
}

#[test]
fn tcp_scan_and_touch_round_trip() {
    let port = spawn_fake_node(
        vec![
            ("node", "N1".to_string()),
            ("peers-clear-std", "1,3000,[]".to_string()),
        ],
        13,
    );
    let cluster = TcpCluster::connect(local_policy(port)).unwrap();

    let mut seen = Vec::new();
    cluster
        .scan_node("N1", &request(100), &mut |r| {
            seen.push(r);
            ScanControl::Continue
        })
        .unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].digest, [5u8; 20]);

    let err = cluster.touch("N1", &seen[0], 0).unwrap_err();
    assert!(err.is_record_too_big());
}

#[test]
fn tcp_calls_after_close_fail() {
    let port = spawn_fake_node(
        vec![
            ("node", "N1".to_string()),
            ("peers-clear-std", "1,3000,[]".to_string()),
        ],
        0,
    );
    let cluster = TcpCluster::connect(local_policy(port)).unwrap();
    cluster.close();
    cluster.close();
    assert!(matches!(
        cluster.info_node("N1", "build"),
        Err(ClusterError::Closed)
    ));
}

#[test]
fn tcp_connect_to_closed_port_fails() {
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    assert!(matches!(
        TcpCluster::connect(local_policy(port)),
        Err(ClusterError::Connect { .. })
    ));
}

#[test]
fn tcp_scan_of_silent_node_times_out() {
    let port = spawn_stalled_node(vec![
        ("node", "N1".to_string()),
        ("peers-clear-std", "1,3000,[]".to_string()),
    ]);
    let mut policy = local_policy(port);
    policy.timeout = std::time::Duration::from_millis(100);
    let cluster = TcpCluster::connect(policy).unwrap();

    let started = std::time::Instant::now();
    let err = cluster
        .scan_node("N1", &request(100), &mut |_: RecordIdentity| {
            ScanControl::Continue
        })
        .unwrap_err();
    assert!(matches!(err, ClusterError::Wire(_)));
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
}
