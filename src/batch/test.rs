use pretty_assertions::assert_eq;

use crate::{
    batch::{build_batch, BatchLimits, BatchableSource, IndexMap},
    bson::{rawdoc, RawDocumentBuf},
    cmap::StreamDescription,
    error::{ErrorKind, Result},
};

fn item(i: i32) -> RawDocumentBuf {
    rawdoc! { "_id": i, "payload": "x".repeat(40) }
}

fn serialize(item: &i32) -> Result<RawDocumentBuf> {
    Ok(self::item(*item))
}

fn ids(documents: &[RawDocumentBuf]) -> Vec<i32> {
    documents
        .iter()
        .map(|d| d.get_i32("_id").unwrap())
        .collect()
}

fn limits(max_count: usize, max_length: usize) -> BatchLimits {
    BatchLimits {
        max_count,
        max_length,
        max_document_size: 16 * 1024 * 1024,
    }
}

fn entry_size() -> usize {
    crate::bson_util::array_entry_size_bytes(0, item(0).as_bytes().len())
}

#[test]
fn overflowing_batches_reproduce_every_item_once() {
    let items: Vec<i32> = (0..10).collect();
    let mut source = BatchableSource::new(items.clone());
    let limits = limits(1000, entry_size() * 3 + 5);

    let mut sent = Vec::new();
    let mut batches = 0;
    while source.has_more() {
        let batch = build_batch(&mut source, &limits, serialize).unwrap();
        assert!(!batch.documents.is_empty());
        assert!(batch.length <= limits.max_length);
        assert_eq!(ids(&batch.documents), source.batch_items().to_vec());
        sent.extend(ids(&batch.documents));
        source.advance_past_processed();
        batches += 1;
    }

    assert_eq!(batches, 4);
    assert_eq!(sent, items);
}

#[test]
fn count_limit_splits_batches() {
    let mut source = BatchableSource::new((0..5).collect::<Vec<i32>>());
    let limits = limits(2, usize::MAX);

    let mut sizes = Vec::new();
    while source.has_more() {
        let batch = build_batch(&mut source, &limits, serialize).unwrap();
        sizes.push(batch.documents.len());
        source.advance_past_processed();
    }
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[test]
fn retry_reproduces_processed_count() {
    let mut source = BatchableSource::new((0..6).collect::<Vec<i32>>());

    let small = limits(1000, entry_size() * 3 + 5);
    let first = build_batch(&mut source, &small, serialize).unwrap();
    assert_eq!(first.documents.len(), 3);
    assert_eq!(source.processed_count(), Some(3));

    let large = limits(1000, usize::MAX);
    let retry = build_batch(&mut source, &large, serialize).unwrap();
    assert_eq!(ids(&retry.documents), vec![0, 1, 2]);
    assert_eq!(source.processed_count(), Some(3));

    source.advance_past_processed();
    assert_eq!(source.offset(), 3);

    let next = build_batch(&mut source, &large, serialize).unwrap();
    assert_eq!(ids(&next.documents), vec![3, 4, 5]);
}

#[test]
fn oversized_single_item_still_makes_progress() {
    let mut source = BatchableSource::new(vec![1, 2]);
    let limits = limits(1000, 10);

    let batch = build_batch(&mut source, &limits, serialize).unwrap();
    assert_eq!(ids(&batch.documents), vec![1]);
    source.advance_past_processed();

    let batch = build_batch(&mut source, &limits, serialize).unwrap();
    assert_eq!(ids(&batch.documents), vec![2]);
    source.advance_past_processed();
    assert!(!source.has_more());
}

#[test]
fn document_above_max_size_is_rejected() {
    let mut source = BatchableSource::new(vec![1]);
    let limits = BatchLimits {
        max_count: 10,
        max_length: usize::MAX,
        max_document_size: 8,
    };
    let error = build_batch(&mut source, &limits, serialize).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));
}

#[test]
fn single_batch_source_cannot_overflow() {
    let mut source = BatchableSource::single_batch(vec![1, 2, 3]);
    let error = build_batch(&mut source, &limits(2, usize::MAX), serialize).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));

    let mut source = BatchableSource::single_batch(vec![1]);
    let batch = build_batch(&mut source, &limits(1, 1), serialize).unwrap();
    assert_eq!(batch.documents.len(), 1);
}

#[test]
fn limits_prefer_the_stricter_bound() {
    let description = StreamDescription::new_testing();

    let resolved = BatchLimits::resolve(Some(10), None, &description, 0);
    assert_eq!(resolved.max_count, 10);
    assert_eq!(resolved.max_length, 48_000_000 - 16_000);

    let resolved = BatchLimits::resolve(Some(1_000_000), Some(1024), &description, 16 * 1024);
    assert_eq!(resolved.max_count, 100_000);
    assert_eq!(resolved.max_length, 1024);
    assert_eq!(resolved.max_document_size, 16 * 1024 * 1024 + 16 * 1024);
}

#[test]
fn range_index_map_is_a_bijection() {
    let map = IndexMap::range(7, 5);
    let mapped: Vec<usize> = (0..map.len()).map(|i| map.map(i).unwrap()).collect();
    assert_eq!(mapped, vec![7, 8, 9, 10, 11]);
    assert_eq!(map.map(5), None);
}

#[test]
fn index_map_becomes_dense_when_not_contiguous() {
    let mut map = IndexMap::new();
    map.push(2);
    map.push(3);
    assert_eq!(map, IndexMap::range(2, 2));

    map.push(6);
    assert_eq!(map, IndexMap::Dense(vec![2, 3, 6]));
    assert_eq!(map.map(2), Some(6));
    assert_eq!(map.len(), 3);
}
