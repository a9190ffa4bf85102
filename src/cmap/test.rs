use pretty_assertions::assert_eq;

use crate::{
    binding::{ReadPreference, ServerAddress, ServerType},
    bson::{doc, rawdoc},
    cmap::{Command, RawCommandResponse, StreamDescription},
    session::{ClientSession, Session},
};

#[test]
fn command_document_includes_session_fields() {
    let session = ClientSession::new();
    let mut command = Command::new("find", "db", rawdoc! { "find": "coll", "filter": {} });
    command.set_session(&session);
    command.set_txn_number(3);
    command.set_read_preference(ReadPreference::SecondaryPreferred);

    assert_eq!(
        command.to_document().unwrap(),
        doc! {
            "find": "coll",
            "filter": {},
            "$db": "db",
            "lsid": session.id().clone(),
            "txnNumber": 3_i64,
            "$readPreference": { "mode": "secondaryPreferred" },
        }
    );
}

#[test]
fn sensitive_commands_are_redacted() {
    assert!(Command::new("saslStart", "admin", rawdoc! {}).should_redact());
    assert!(Command::new("createUser", "admin", rawdoc! {}).should_redact());
    assert!(!Command::new("insert", "db", rawdoc! {}).should_redact());
}

#[test]
fn retryable_support_follows_handshake() {
    let description = StreamDescription::with_wire_version(6);
    assert!(description.supports_retryable_writes());
    assert!(description.supports_retryable_reads());

    let mut standalone = StreamDescription::with_wire_version(17);
    standalone.initial_server_type = ServerType::Standalone;
    assert!(!standalone.supports_retryable_writes());
    assert!(standalone.supports_retryable_reads());

    let mut no_sessions = StreamDescription::with_wire_version(17);
    no_sessions.logical_session_timeout = None;
    assert!(!no_sessions.supports_retryable_writes());

    let old = StreamDescription::with_wire_version(5);
    assert!(!old.supports_retryable_writes());
    assert!(!old.supports_retryable_reads());
}

#[test]
fn response_body_errors_are_invalid_responses() {
    let response =
        RawCommandResponse::from_document(ServerAddress::default(), &doc! { "ok": 1, "n": "x" })
            .unwrap();

    #[derive(Debug, serde::Deserialize)]
    struct Body {
        #[allow(dead_code)]
        n: i32,
    }

    let error = response.body::<Body>().unwrap_err();
    assert!(matches!(
        *error.kind,
        crate::error::ErrorKind::InvalidResponse { .. }
    ));
}
