//! Tests for the Consul wire types and pure decoding logic
#![allow(clippy::unwrap_used)]

use super::*;

fn entry(value: Option<&str>) -> KvEntry {
    KvEntry {
        value: value.map(str::to_string),
        modify_index: 7,
        session: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// KV payload shapes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_server_id_record_round_trip() {
    let record: ServerIdRecord = serde_json::from_str(r#"{"last_used_id":41}"#).unwrap();
    assert_eq!(record.last_used_id, 41);

    let json = serde_json::to_string(&ServerIdRecord { last_used_id: 42 }).unwrap();
    assert_eq!(json, r#"{"last_used_id":42}"#);
}

#[test]
fn test_node_record_field_names() {
    let json = serde_json::to_string(&NodeRecord {
        ip_address: "10.0.0.1".to_string(),
        server_id: 3,
        mysql_version: "8.0.31".to_string(),
    })
    .unwrap();

    assert!(json.contains(r#""ip_address":"10.0.0.1""#));
    assert!(json.contains(r#""server_id":3"#));
    assert!(json.contains(r#""mysql_version":"8.0.31""#));
}

#[test]
fn test_leader_record_shape() {
    let record: LeaderRecord = serde_json::from_str(r#"{"ip_address":"10.0.0.9"}"#).unwrap();
    assert_eq!(record.ip_address, "10.0.0.9");
}

#[test]
fn test_kv_entry_from_consul_response() {
    // Shape of a real /v1/kv response element
    let raw = r#"{
        "LockIndex": 1,
        "Key": "mcm/replication_leader",
        "Flags": 0,
        "Value": "eyJpcF9hZGRyZXNzIjoiMTAuMC4wLjEifQ==",
        "Session": "adf4238a-882b-9ddc-4a9d-5b6758e4159e",
        "CreateIndex": 12,
        "ModifyIndex": 34
    }"#;

    let entry: KvEntry = serde_json::from_str(raw).unwrap();
    assert_eq!(entry.modify_index, 34);
    assert_eq!(
        entry.session.as_deref(),
        Some("adf4238a-882b-9ddc-4a9d-5b6758e4159e")
    );

    let payload = decode_value(&entry, "mcm/replication_leader")
        .unwrap()
        .unwrap();
    let record: LeaderRecord = serde_json::from_slice(&payload).unwrap();
    assert_eq!(record.ip_address, "10.0.0.1");
}

// ─────────────────────────────────────────────────────────────────────────────
// Value decoding edge cases
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_decode_absent_value() {
    assert!(decode_value(&entry(None), "k").unwrap().is_none());
}

#[test]
fn test_decode_empty_value_is_absent() {
    // "Present but empty" must not parse as a payload; the server-id
    // loop re-enters its retry on this.
    assert!(decode_value(&entry(Some("")), "k").unwrap().is_none());
}

#[test]
fn test_decode_invalid_base64_is_malformed() {
    let err = decode_value(&entry(Some("%%%")), "mcm/server_id").unwrap_err();
    assert!(matches!(err, ClusterError::MalformedValue { .. }));
    assert!(err.to_string().contains("mcm/server_id"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Node listing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_collect_node_ips_sorts() {
    let payloads = vec![
        br#"{"ip_address":"10.0.0.3","server_id":3,"mysql_version":"8.0"}"#.to_vec(),
        br#"{"ip_address":"10.0.0.1","server_id":1,"mysql_version":"8.0"}"#.to_vec(),
        br#"{"ip_address":"10.0.0.2","server_id":2,"mysql_version":"8.0"}"#.to_vec(),
    ];

    assert_eq!(
        collect_node_ips(&payloads),
        vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]
    );
}

#[test]
fn test_collect_node_ips_skips_malformed() {
    let payloads = vec![
        br#"{"ip_address":"10.0.0.1","server_id":1,"mysql_version":"8.0"}"#.to_vec(),
        br#"{"unrelated":true}"#.to_vec(),
        b"not json at all".to_vec(),
    ];

    assert_eq!(collect_node_ips(&payloads), vec!["10.0.0.1"]);
}

#[test]
fn test_collect_node_ips_empty() {
    assert!(collect_node_ips(&[]).is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Session bookkeeping
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_health_session_missing_before_lease() {
    let client = ConsulClient::new(std::net::Ipv4Addr::new(10, 0, 0, 1));
    assert!(matches!(
        client.health_session(),
        Err(ClusterError::SessionMissing)
    ));
}

#[test]
fn test_remember_session_registers_for_renewal() {
    let client = ConsulClient::new(std::net::Ipv4Addr::new(10, 0, 0, 1));
    client.remember_session("s-1");

    assert_eq!(client.health_session().unwrap(), "s-1");
    assert_eq!(
        client.active_sessions.read().unwrap().as_slice(),
        ["s-1".to_string()]
    );
}

#[test]
fn test_session_request_wire_shape() {
    let json = serde_json::to_string(&SessionRequest {
        name: SESSION_NAME,
        ttl: SESSION_TTL,
        lock_delay: SESSION_LOCK_DELAY,
        behavior: SESSION_BEHAVIOR,
    })
    .unwrap();

    assert!(json.contains(r#""Name":"mcm/instances""#));
    assert!(json.contains(r#""TTL":"15s""#));
    assert!(json.contains(r#""LockDelay":"0s""#));
    assert!(json.contains(r#""Behavior":"delete""#));
}
