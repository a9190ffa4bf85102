//! Contains the types of results returned by operations.

mod bulk_write;

pub use bulk_write::{BulkWriteResult, BulkWriteUpsert};
pub(crate) use bulk_write::{BulkWriteBatchResult, BulkWriteCombiner};

/// The result of a [`CreateIndexes`](crate::operation::CreateIndexes) operation.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct CreateIndexesResult {
    /// The names of the created indexes, in the order they were requested.
    pub index_names: Vec<String>,
}
