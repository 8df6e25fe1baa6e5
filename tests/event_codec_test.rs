use serversync::common::error::SyncError;
use serversync::common::event::{ChangeEvent, EventKind, SCHEMA_VERSION};
use serversync::common::server::ServerStatus;

#[test]
fn events_carry_a_type_tag() {
    let event = ChangeEvent::new(
        "lobby-1",
        4,
        "instance-x",
        1_700_000_000_000,
        EventKind::StatusChanged {
            status: ServerStatus::Draining,
        },
    );
    let json: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();

    assert_eq!(json["version"], SCHEMA_VERSION);
    assert_eq!(json["server_id"], "lobby-1");
    assert_eq!(json["body"]["type"], "STATUS_CHANGED");
    assert_eq!(json["body"]["status"], "DRAINING");
    assert_eq!(ChangeEvent::decode(&json.to_string()).unwrap(), event);
}

#[test]
fn deregistered_has_no_payload() {
    let payload = r#"{"version":1,"server_id":"lobby-1","sequence":9,"origin":"x","timestamp":0,"body":{"type":"DEREGISTERED"}}"#;
    let event = ChangeEvent::decode(payload).unwrap();
    assert_eq!(event.body, EventKind::Deregistered);
    assert_eq!(event.sequence, 9);
}

#[test]
fn malformed_payloads_are_rejected() {
    let cases = [
        "not json at all",
        r#"{"version":1,"server_id":"lobby-1","sequence":1,"origin":"x","timestamp":0,"body":{"type":"EXPLODED"}}"#,
        r#"{"version":2,"server_id":"lobby-1","sequence":1,"origin":"x","timestamp":0,"body":{"type":"DEREGISTERED"}}"#,
        r#"{"version":0,"server_id":"lobby-1","sequence":1,"origin":"x","timestamp":0,"body":{"type":"DEREGISTERED"}}"#,
        r#"{"version":1,"server_id":"  ","sequence":1,"origin":"x","timestamp":0,"body":{"type":"DEREGISTERED"}}"#,
        r#"{"version":1,"server_id":"lobby:seq","sequence":1,"origin":"x","timestamp":0,"body":{"type":"DEREGISTERED"}}"#,
        r#"{"version":1,"server_id":"lobby-1","sequence":0,"origin":"x","timestamp":0,"body":{"type":"DEREGISTERED"}}"#,
        r#"{"version":1,"server_id":"lobby-1","origin":"x","timestamp":0,"body":{"type":"DEREGISTERED"}}"#,
    ];
    for payload in cases {
        match ChangeEvent::decode(payload) {
            Err(SyncError::MalformedEvent(_)) => {}
            other => panic!("expected MalformedEvent for {}, got {:?}", payload, other),
        }
    }
}
