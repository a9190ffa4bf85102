use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use crate::{
    bson::{doc, rawdoc, Document},
    change_stream::{event::ResumeToken, ChangeStreamTarget},
    cmap::StreamDescription,
    error::Result,
    operation::{Find, InsertRequest, WriteCommand},
    options::ExecutionOptions,
    sync,
    test::{cursor_reply, get_more_reply, network_error, MockDeployment},
    Namespace,
};

const NS: &str = "db.coll";

fn ns() -> Namespace {
    Namespace::new("db", "coll")
}

#[test]
fn cursor_iterates_across_batches() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment
        .reply(cursor_reply(42, NS, vec![doc! { "_id": 1 }, doc! { "_id": 2 }]))
        .reply(get_more_reply(0, NS, vec![doc! { "_id": 3 }]));
    let binding = deployment.binding();

    let mut find = Find::<Document>::new(ns(), doc! {}, None);
    let cursor = sync::execute_read(&mut find, &binding, true, &CancellationToken::new()).unwrap();
    let documents: Vec<Document> = sync::Cursor::new(cursor)
        .collect::<Result<_>>()
        .unwrap();

    assert_eq!(
        documents,
        vec![doc! { "_id": 1 }, doc! { "_id": 2 }, doc! { "_id": 3 }]
    );
    assert_eq!(deployment.sent_names(), vec!["find", "getMore"]);
}

#[test]
fn closing_cursor_kills_it() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment
        .reply(cursor_reply(42, NS, vec![doc! { "_id": 1 }]))
        .reply(doc! { "ok": 1, "cursorsKilled": [42_i64], "cursorsNotFound": [] });
    let binding = deployment.binding();

    let mut find = Find::<Document>::new(ns(), doc! {}, None);
    let cursor = sync::execute_read(&mut find, &binding, true, &CancellationToken::new()).unwrap();
    let mut cursor = sync::Cursor::new(cursor);
    assert!(cursor.move_next(&CancellationToken::new()).unwrap());
    assert_eq!(cursor.current(), &[doc! { "_id": 1 }]);
    cursor.close();

    assert_eq!(deployment.sent_names(), vec!["find", "killCursors"]);
}

#[test]
fn bulk_write_is_retried() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment
        .fail(network_error())
        .reply(doc! { "ok": 1, "n": 1 });
    let binding = deployment.binding();

    let result = sync::BulkWrite::new(ns(), vec![InsertRequest::new(doc! { "_id": 1 })], None)
        .execute(&binding, &ExecutionOptions::default(), &CancellationToken::new())
        .unwrap();

    assert_eq!(result.inserted_count, 1);
    let txn_numbers: Vec<_> = deployment
        .sent()
        .iter()
        .map(|sent| sent.command.txn_number)
        .collect();
    assert_eq!(txn_numbers, vec![Some(1), Some(1)]);
}

#[test]
fn execute_write_runs_write_command() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment.reply(doc! { "ok": 1, "n": 2 });
    let binding = deployment.binding();

    let mut op = WriteCommand::new(
        ns(),
        vec![
            InsertRequest::new(doc! { "_id": 1 }),
            InsertRequest::new(doc! { "_id": 2 }),
        ],
        None,
    )
    .unwrap();
    let result = sync::execute_write(&mut op, &binding, true, &CancellationToken::new()).unwrap();

    assert_eq!(result.inserted_count, 2);
    assert_eq!(deployment.sent_names(), vec!["insert"]);
}

#[test]
fn change_stream_returns_events_and_tracks_token() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment
        .reply(cursor_reply(
            42,
            NS,
            vec![doc! { "_id": { "t": 1 }, "operationType": "insert" }],
        ))
        .reply(doc! { "ok": 1, "cursorsKilled": [42_i64], "cursorsNotFound": [] });
    let cancellation = CancellationToken::new();

    let mut stream = sync::ChangeStream::<Document>::open(
        Arc::new(deployment.binding()),
        ChangeStreamTarget::Collection(ns()),
        Vec::new(),
        None,
        &ExecutionOptions::default(),
        &cancellation,
    )
    .unwrap();

    let event = stream.next_if_any(&cancellation).unwrap().unwrap();
    assert_eq!(event.get_str("operationType"), Ok("insert"));
    assert_eq!(
        stream.resume_token(),
        Some(&ResumeToken::new(rawdoc! { "t": 1 }))
    );
    assert!(stream.is_alive());

    stream.close();
    assert_eq!(
        deployment.sent_names(),
        vec!["aggregate", "killCursors"]
    );
}
