use super::*;

#[test]
fn requests_are_tagged_by_command() {
    let req = Request::Rename {
        src: "/a".to_string(),
        dst: "/b".to_string(),
    };
    let json = serde_json::to_value(&req).expect("encode");
    assert_eq!(json["cmd"], "Rename");
    assert_eq!(json["dst"], "/b");
    let back: Request = serde_json::from_value(json).expect("decode");
    assert_eq!(back, req);
    assert_eq!(back.name(), "rename");
}

#[test]
fn failures_carry_kind_and_message() {
    let resp = Response::from(FsError::NotEmpty("/a".to_string()));
    let json = serde_json::to_string(&resp).expect("encode");
    assert!(json.contains("\"status\":\"Failed\""));
    assert!(json.contains("\"kind\":\"not_empty\""));
    match serde_json::from_str::<Response>(&json).expect("decode") {
        Response::Failed { kind, message } => {
            assert_eq!(kind, ErrorKind::NotEmpty);
            assert_eq!(message, "/a: directory is not empty");
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[test]
fn unknown_command_is_rejected() {
    assert!(serde_json::from_str::<Request>(r#"{"cmd":"Format","path":"/"}"#).is_err());
}

#[test]
fn setup_write_lists_downstream_targets() {
    let req = DaemonRequest::SetupWrite {
        block_id: 4,
        targets: vec![DaemonInfo {
            id: 2,
            address: "127.0.0.1:9002".to_string(),
            name: "dn2".to_string(),
        }],
    };
    let bytes = serde_json::to_vec(&req).expect("encode");
    let back: DaemonRequest = serde_json::from_slice(&bytes).expect("decode");
    assert_eq!(back, req);
}

#[test]
fn setup_ack_error_is_optional_on_the_wire() {
    let joined = serde_json::to_string(&SetupAck::joined(3)).expect("encode");
    assert_eq!(joined, r#"{"block_id":3}"#);
    let failed: SetupAck =
        serde_json::from_str(r#"{"block_id":3,"error":"connect to downstream refused"}"#)
            .expect("decode");
    assert_eq!(failed.error.as_deref(), Some("connect to downstream refused"));
}
