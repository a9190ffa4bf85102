use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use crate::{
    bson::{doc, Bson, Document},
    cmap::StreamDescription,
    error::ErrorKind,
    executor::execute_read,
    operation::Find,
    options::FindOptions,
    test::{command_error, cursor_reply, get_more_reply, network_error, MockDeployment},
    Cursor,
    Namespace,
};

const NS: &str = "db.coll";

fn docs(range: std::ops::Range<i32>) -> Vec<Document> {
    range.map(|x| doc! { "x": x }).collect()
}

async fn open(deployment: &MockDeployment, options: FindOptions) -> Cursor<Document> {
    let binding = deployment.binding();
    let mut find = Find::new(Namespace::new("db", "coll"), doc! {}, options);
    execute_read(&mut find, &binding, true, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn limit_truncates_oversized_first_batch() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment.reply(cursor_reply(0, NS, docs(0..7)));

    let mut cursor = open(&deployment, FindOptions::builder().limit(5_i64).build()).await;
    let cancellation = CancellationToken::new();

    assert!(cursor.move_next(&cancellation).await.unwrap());
    assert_eq!(cursor.current(), docs(0..5).as_slice());
    assert!(!cursor.move_next(&cancellation).await.unwrap());
    assert!(cursor.current().is_empty());
    assert!(cursor.is_exhausted());
    assert_eq!(deployment.sent_names(), vec!["find"]);
}

#[tokio::test]
async fn exhausted_cursor_never_sends_get_more() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment.reply(cursor_reply(0, NS, docs(0..2)));

    let mut cursor = open(&deployment, FindOptions::default()).await;
    let cancellation = CancellationToken::new();

    assert_eq!(cursor.id(), 0);
    assert!(cursor.move_next(&cancellation).await.unwrap());
    assert!(!cursor.move_next(&cancellation).await.unwrap());
    assert!(!cursor.move_next(&cancellation).await.unwrap());
    cursor.close().await;
    assert_eq!(deployment.sent_names(), vec!["find"]);
}

#[tokio::test]
async fn get_more_fetches_following_batches() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment
        .reply(cursor_reply(42, NS, docs(0..2)))
        .reply(get_more_reply(42, NS, docs(2..4)))
        .reply(get_more_reply(0, NS, docs(4..5)));

    let cursor = open(&deployment, FindOptions::builder().batch_size(2_u32).build()).await;
    let all = cursor.try_collect(&CancellationToken::new()).await.unwrap();

    assert_eq!(all, docs(0..5));
    assert_eq!(deployment.sent_names(), vec!["find", "getMore", "getMore"]);

    let get_more = deployment.sent()[1].document();
    assert_eq!(get_more.get_i64("getMore").unwrap(), 42);
    assert_eq!(get_more.get_str("collection").unwrap(), "coll");
    assert_eq!(get_more.get_i32("batchSize").unwrap(), 2);
    assert_eq!(get_more.get_str("$db").unwrap(), "db");
}

#[tokio::test]
async fn get_more_batch_size_never_exceeds_remaining_limit() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment
        .reply(cursor_reply(42, NS, docs(0..2)))
        .reply(get_more_reply(42, NS, docs(2..3)))
        .reply(doc! { "ok": 1, "cursorsKilled": [42_i64], "cursorsNotFound": [] });

    let options = FindOptions::builder()
        .limit(3_i64)
        .batch_size(2_u32)
        .build();
    let mut cursor = open(&deployment, options).await;
    let cancellation = CancellationToken::new();

    assert!(cursor.move_next(&cancellation).await.unwrap());
    assert!(cursor.move_next(&cancellation).await.unwrap());
    assert_eq!(cursor.current(), docs(2..3).as_slice());
    assert!(!cursor.move_next(&cancellation).await.unwrap());

    let sent = deployment.sent();
    assert_eq!(sent[1].document().get_i32("batchSize").unwrap(), 1);
    assert_eq!(
        deployment.sent_names(),
        vec!["find", "getMore", "killCursors"]
    );
    assert_eq!(cursor.id(), 0);
}

#[tokio::test]
async fn cursor_not_found_leaves_cursor_dead() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment
        .reply(cursor_reply(42, NS, docs(0..2)))
        .reply(command_error(43, "CursorNotFound"));

    let mut cursor = open(&deployment, FindOptions::default()).await;
    let cancellation = CancellationToken::new();

    assert!(cursor.move_next(&cancellation).await.unwrap());
    let error = cursor.move_next(&cancellation).await.unwrap_err();
    assert_eq!(error.code(), Some(43));
    assert_eq!(cursor.id(), 0);

    cursor.close().await;
    assert_eq!(deployment.sent_names(), vec!["find", "getMore"]);
}

#[tokio::test]
async fn network_error_on_get_more_leaves_cursor_dead() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment
        .reply(cursor_reply(42, NS, docs(0..1)))
        .fail(network_error());

    let mut cursor = open(&deployment, FindOptions::default()).await;
    let cancellation = CancellationToken::new();

    assert!(cursor.move_next(&cancellation).await.unwrap());
    let error = cursor.move_next(&cancellation).await.unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::Io(_)));
    assert_eq!(cursor.id(), 0);

    cursor.close().await;
    assert_eq!(deployment.sent_names(), vec!["find", "getMore"]);
}

#[tokio::test]
async fn close_kills_live_cursor() {
    let deployment = MockDeployment::new(StreamDescription::new_testing());
    deployment
        .reply(cursor_reply(42, NS, docs(0..2)))
        .reply(doc! { "ok": 1, "cursorsKilled": [42_i64], "cursorsNotFound": [] });

    let mut cursor = open(&deployment, FindOptions::default()).await;
    cursor.close().await;
    cursor.close().await;

    assert_eq!(deployment.sent_names(), vec!["find", "killCursors"]);
    let kill = deployment.sent()[1].document();
    assert_eq!(kill.get_str("killCursors").unwrap(), "coll");
    assert_eq!(
        kill.get_array("cursors").unwrap(),
        &vec![Bson::Int64(42)]
    );

    let error = cursor
        .move_next(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::Disposed));
}

#[tokio::test]
async fn comment_reaches_get_more_only_on_newer_servers() {
    for (wire_version, expected) in [(8, None), (9, Some(Bson::from("tag")))] {
        let deployment = MockDeployment::new(StreamDescription::with_wire_version(wire_version));
        deployment
            .reply(cursor_reply(42, NS, docs(0..1)))
            .reply(get_more_reply(0, NS, Vec::new()));

        let options = FindOptions::builder()
            .comment(Bson::from("tag"))
            .build();
        let cursor = open(&deployment, options).await;
        cursor.try_collect(&CancellationToken::new()).await.unwrap();

        let get_more = deployment.sent()[1].document();
        assert_eq!(get_more.get("comment").cloned(), expected);
    }
}
