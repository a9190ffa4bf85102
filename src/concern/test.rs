use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    bson::{self, doc},
    concern::{Acknowledgment, WriteConcern},
};

#[test]
fn write_concern_is_acknowledged() {
    assert!(WriteConcern::default().is_acknowledged());
    assert!(WriteConcern::majority().is_acknowledged());
    assert!(WriteConcern::nodes(1).is_acknowledged());
    assert!(!WriteConcern::unacknowledged().is_acknowledged());

    let journaled = WriteConcern::builder()
        .w(Acknowledgment::Nodes(0))
        .journal(true)
        .build();
    assert!(journaled.is_acknowledged());
    assert!(journaled.validate().is_err());
}

#[test]
fn write_concern_serializes_wire_names() {
    let write_concern = WriteConcern::builder()
        .w(Acknowledgment::Majority)
        .w_timeout(Duration::from_millis(250))
        .journal(true)
        .build();
    assert_eq!(
        bson::to_document(&write_concern).unwrap(),
        doc! { "w": "majority", "wtimeout": 250, "j": true }
    );

    assert_eq!(
        bson::to_document(&WriteConcern::nodes(2)).unwrap(),
        doc! { "w": 2 }
    );
    assert!(WriteConcern::default().is_empty());
}

#[test]
fn acknowledgment_round_trips_tags() {
    let parsed: WriteConcern = bson::from_document(doc! { "w": "dc-east" }).unwrap();
    assert_eq!(parsed.w, Some(Acknowledgment::Custom("dc-east".to_string())));

    let parsed: WriteConcern = bson::from_document(doc! { "w": 3, "wtimeout": 100 }).unwrap();
    assert_eq!(parsed.w, Some(Acknowledgment::Nodes(3)));
    assert_eq!(parsed.w_timeout, Some(Duration::from_millis(100)));
}
