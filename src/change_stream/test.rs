use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use crate::{
    bson::{doc, rawdoc, Bson, Document, Timestamp},
    change_stream::{
        event::{OperationType, ResumeToken},
        ChangeStream,
        ChangeStreamTarget,
    },
    cmap::StreamDescription,
    error::ErrorKind,
    options::{ChangeStreamOptions, ExecutionOptions},
    test::{command_error, cursor_reply, get_more_reply, network_error, MockDeployment},
    Namespace,
};

const NS: &str = "db.coll";

fn event(t: i32) -> Document {
    doc! {
        "_id": { "t": t },
        "operationType": "insert",
        "ns": { "db": "db", "coll": "coll" },
        "documentKey": { "_id": t },
        "fullDocument": { "_id": t },
    }
}

fn token(t: i32) -> ResumeToken {
    ResumeToken::new(rawdoc! { "t": t })
}

fn with_token(mut reply: Document, t: i32) -> Document {
    reply
        .get_document_mut("cursor")
        .unwrap()
        .insert("postBatchResumeToken", doc! { "t": t });
    reply
}

fn change_stream_stage(command: &Document) -> Document {
    command.get_array("pipeline").unwrap()[0]
        .as_document()
        .unwrap()
        .get_document("$changeStream")
        .unwrap()
        .clone()
}

async fn open(
    deployment: &MockDeployment,
    options: impl Into<Option<ChangeStreamOptions>>,
) -> ChangeStream {
    ChangeStream::open(
        Arc::new(deployment.binding()),
        ChangeStreamTarget::Collection(Namespace::new("db", "coll")),
        vec![doc! { "$match": { "operationType": "insert" } }],
        options,
        &ExecutionOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn opens_with_change_stream_stage_first() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment.reply(cursor_reply(42, NS, Vec::new()));

    let options = ChangeStreamOptions::builder()
        .full_document(crate::options::FullDocumentType::UpdateLookup)
        .batch_size(10_u32)
        .build();
    let stream = open(&deployment, options).await;
    assert!(stream.is_alive());

    let command = deployment.sent()[0].document();
    assert_eq!(command.get_str("aggregate").unwrap(), "coll");
    assert_eq!(
        change_stream_stage(&command),
        doc! { "fullDocument": "updateLookup" }
    );
    assert_eq!(
        command.get_array("pipeline").unwrap()[1],
        Bson::Document(doc! { "$match": { "operationType": "insert" } })
    );
    assert_eq!(
        command.get_document("cursor").unwrap(),
        &doc! { "batchSize": 10 }
    );
}

#[tokio::test]
async fn cluster_stream_runs_against_admin() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment.reply(cursor_reply(0, "admin.$cmd.aggregate", Vec::new()));

    ChangeStream::<Document>::open(
        Arc::new(deployment.binding()),
        ChangeStreamTarget::Cluster,
        Vec::new(),
        None,
        &ExecutionOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let command = deployment.sent()[0].document();
    assert_eq!(command.get_i32("aggregate").unwrap(), 1);
    assert_eq!(command.get_str("$db").unwrap(), "admin");
    assert_eq!(
        change_stream_stage(&command),
        doc! { "allChangesForCluster": true }
    );
}

#[tokio::test]
async fn resumes_after_last_returned_event() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment
        .reply(cursor_reply(42, NS, vec![event(1), event(2)]))
        .fail(network_error())
        .reply(cursor_reply(43, NS, vec![event(3)]));

    let mut stream = open(&deployment, None).await;
    let cancellation = CancellationToken::new();

    let first = stream.next_if_any(&cancellation).await.unwrap().unwrap();
    assert_eq!(first.operation_type, OperationType::Insert);
    assert_eq!(first.ns.unwrap().coll.as_deref(), Some("coll"));
    assert_eq!(stream.resume_token(), Some(&token(1)));

    stream.next_if_any(&cancellation).await.unwrap().unwrap();
    assert_eq!(stream.resume_token(), Some(&token(2)));

    let third = stream.next_if_any(&cancellation).await.unwrap().unwrap();
    assert_eq!(third.id, token(3));
    assert_eq!(stream.resume_token(), Some(&token(3)));

    assert_eq!(
        deployment.sent_names(),
        vec!["aggregate", "getMore", "aggregate"]
    );
    let resumed = deployment.sent()[2].document();
    assert_eq!(change_stream_stage(&resumed), doc! { "resumeAfter": { "t": 2 } });
}

#[tokio::test]
async fn resume_kills_old_cursor_after_server_error() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment
        .reply(cursor_reply(42, NS, vec![event(1)]))
        .reply(command_error(91, "ShutdownInProgress"))
        .reply(cursor_reply(43, NS, vec![event(2)]))
        .reply(doc! { "ok": 1, "cursorsKilled": [42_i64], "cursorsNotFound": [] });

    let mut stream = open(&deployment, None).await;
    let cancellation = CancellationToken::new();

    stream.next_if_any(&cancellation).await.unwrap().unwrap();
    let second = stream.next_if_any(&cancellation).await.unwrap().unwrap();
    assert_eq!(second.id, token(2));

    assert_eq!(
        deployment.sent_names(),
        vec!["aggregate", "getMore", "aggregate", "killCursors"]
    );
}

#[tokio::test]
async fn start_after_is_kept_until_an_event_is_returned() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment
        .reply(cursor_reply(42, NS, Vec::new()))
        .fail(network_error())
        .reply(cursor_reply(43, NS, vec![event(8)]))
        .fail(network_error())
        .reply(cursor_reply(44, NS, Vec::new()));

    let options = ChangeStreamOptions::builder()
        .start_after(token(7))
        .build();
    let mut stream = open(&deployment, options).await;
    let cancellation = CancellationToken::new();
    assert_eq!(stream.resume_token(), Some(&token(7)));

    assert!(stream.next_if_any(&cancellation).await.unwrap().is_none());
    let event = stream.next_if_any(&cancellation).await.unwrap().unwrap();
    assert_eq!(event.id, token(8));
    assert!(stream.next_if_any(&cancellation).await.unwrap().is_none());

    let sent = deployment.sent();
    assert_eq!(
        change_stream_stage(&sent[0].document()),
        doc! { "startAfter": { "t": 7 } }
    );
    assert_eq!(
        change_stream_stage(&sent[2].document()),
        doc! { "startAfter": { "t": 7 } }
    );
    assert_eq!(
        change_stream_stage(&sent[4].document()),
        doc! { "resumeAfter": { "t": 8 } }
    );
}

#[tokio::test]
async fn post_batch_resume_token_is_tracked() {
    let deployment = MockDeployment::new(StreamDescription::with_wire_version(17));
    deployment
        .reply(with_token(cursor_reply(42, NS, Vec::new()), 5))
        .reply(with_token(get_more_reply(42, NS, vec![event(6), event(7)]), 8))
        .reply(with_token(get_more_reply(42, NS, Vec::new()), 9));

    let mut stream = open(&deployment, None).await;
    let cancellation = CancellationToken::new();
    assert_eq!(stream.resume_token(), Some(&token(5)));

    assert!(stream.next_if_any(&cancellation).await.unwrap().is_none());
    assert_eq!(stream.resume_token(), Some(&token(5)));

    stream.next_if_any(&cancellation).await.unwrap().unwrap();
    assert_eq!(stream.resume_token(), Some(&token(6)));
    stream.next_if_any(&cancellation).await.unwrap().unwrap();
    assert_eq!(stream.resume_token(), Some(&token(8)));

    assert!(stream.next_if_any(&cancellation).await.unwrap().is_none());
    assert_eq!(stream.resume_token(), Some(&token(9)));
}

#[tokio::test]
async fn resume_without_token_starts_at_operation_time() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    let operation_time = Timestamp {
        time: 100,
        increment: 1,
    };
    let mut initial = cursor_reply(42, NS, Vec::new());
    initial.insert("operationTime", operation_time);
    deployment
        .reply(initial)
        .fail(network_error())
        .reply(cursor_reply(43, NS, Vec::new()));

    let mut stream = open(&deployment, None).await;
    let cancellation = CancellationToken::new();
    assert_eq!(stream.resume_token(), None);

    assert!(stream.next_if_any(&cancellation).await.unwrap().is_none());
    assert!(stream.next_if_any(&cancellation).await.unwrap().is_none());

    let resumed = deployment.sent()[2].document();
    assert_eq!(
        change_stream_stage(&resumed),
        doc! { "startAtOperationTime": operation_time }
    );
}

#[tokio::test]
async fn non_resumable_error_is_returned() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment
        .reply(cursor_reply(42, NS, Vec::new()))
        .reply(command_error(2, "BadValue"));

    let mut stream = open(&deployment, None).await;
    let cancellation = CancellationToken::new();

    assert!(stream.next_if_any(&cancellation).await.unwrap().is_none());
    let error = stream.next_if_any(&cancellation).await.unwrap_err();
    assert_eq!(error.code(), Some(2));
    assert_eq!(deployment.sent_names(), vec!["aggregate", "getMore"]);
}

#[tokio::test]
async fn server_errors_need_label_on_newer_servers() {
    let deployment = MockDeployment::new(StreamDescription::with_wire_version(17));
    let mut labelled = command_error(91, "ShutdownInProgress");
    labelled.insert("errorLabels", vec!["ResumableChangeStreamError"]);
    deployment
        .reply(cursor_reply(42, NS, vec![event(1)]))
        .reply(command_error(91, "ShutdownInProgress"));

    let mut stream = open(&deployment, None).await;
    let cancellation = CancellationToken::new();
    stream.next_if_any(&cancellation).await.unwrap().unwrap();
    let error = stream.next_if_any(&cancellation).await.unwrap_err();
    assert_eq!(error.code(), Some(91));

    let deployment = MockDeployment::new(StreamDescription::with_wire_version(17));
    deployment
        .reply(cursor_reply(42, NS, vec![event(1)]))
        .reply(labelled)
        .reply(cursor_reply(0, NS, vec![event(2)]))
        .reply(doc! { "ok": 1, "cursorsKilled": [42_i64], "cursorsNotFound": [] });

    let mut stream = open(&deployment, None).await;
    stream.next_if_any(&cancellation).await.unwrap().unwrap();
    let event = stream.next_if_any(&cancellation).await.unwrap().unwrap();
    assert_eq!(event.id, token(2));
}

#[tokio::test]
async fn event_without_id_is_rejected() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment.reply(cursor_reply(
        42,
        NS,
        vec![doc! { "operationType": "insert" }],
    ));

    let mut stream = open(&deployment, None).await;
    let error = stream
        .next_if_any(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::MissingResumeToken));
}
