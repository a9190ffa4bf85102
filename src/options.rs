//! Options for the operations in this crate.

use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Document, Timestamp},
    change_stream::event::ResumeToken,
    serde_util::{self, serialize_duration_option_as_int_millis, serialize_u32_option_as_i32},
};
pub use crate::{
    binding::{ReadPreference, ServerAddress, ServerType},
    concern::{Acknowledgment, WriteConcern},
};

/// Settings that apply to every operation run through the executors.
#[derive(Clone, Debug, TypedBuilder, PartialEq, Eq)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct ExecutionOptions {
    /// Whether reads that fail with a transient error are retried once.
    #[builder(default = true)]
    pub retry_reads: bool,

    /// Whether writes that fail with a transient error are retried once.
    #[builder(default = true)]
    pub retry_writes: bool,

    /// An upper bound on the number of requests per write command. The server's own limit still
    /// applies.
    pub max_batch_count: Option<usize>,

    /// An upper bound on the size in bytes of the requests in one write command. The server's
    /// own limit still applies.
    pub max_batch_length: Option<usize>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// An index to use for an operation.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
#[non_exhaustive]
pub enum Hint {
    /// The index's key pattern.
    Keys(Document),

    /// The index's name.
    Name(String),
}

impl Serialize for Hint {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Hint::Keys(keys) => keys.serialize(serializer),
            Hint::Name(name) => serializer.serialize_str(name),
        }
    }
}

/// Options for a `find` command.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct FindOptions {
    /// Allows the server to write temporary data to disk.
    pub allow_disk_use: Option<bool>,

    /// The number of documents the server should return per batch.
    #[serde(serialize_with = "serialize_u32_option_as_i32")]
    pub batch_size: Option<u32>,

    /// A comment to help trace the operation.
    pub comment: Option<Bson>,

    /// The index to use.
    pub hint: Option<Hint>,

    /// The maximum number of documents to return. A negative value requests a single batch of at
    /// most the absolute value.
    #[serde(serialize_with = "serialize_absolute_value")]
    pub limit: Option<i64>,

    /// How long a `getMore` on a tailable await cursor may block.
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    /// Limits the fields of the returned documents.
    pub projection: Option<Document>,

    /// The number of documents to skip.
    pub skip: Option<u64>,

    /// The order of the returned documents.
    pub sort: Option<Document>,

    /// The collation to use.
    pub collation: Option<Document>,
}

/// Options for an `aggregate` command.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AggregateOptions {
    /// Allows the server to write temporary data to disk.
    pub allow_disk_use: Option<bool>,

    /// The number of documents the server should return per batch. Sent inside the `cursor`
    /// subdocument.
    #[serde(skip)]
    pub batch_size: Option<u32>,

    /// Skips document validation for `$out` and `$merge` stages.
    pub bypass_document_validation: Option<bool>,

    /// The collation to use.
    pub collation: Option<Document>,

    /// A comment to help trace the operation.
    pub comment: Option<Bson>,

    /// The index to use.
    pub hint: Option<Hint>,

    /// How long a `getMore` on a change stream may block waiting for events.
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// The maximum amount of time to allow the pipeline to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    /// Variables accessible in the pipeline.
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,

    /// The write concern for pipelines ending in `$out` or `$merge`.
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,
}

/// Options for a `listCollections` command.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ListCollectionsOptions {
    /// The number of documents the server should return per batch.
    #[serde(skip)]
    pub batch_size: Option<u32>,

    /// Only return collections matching this filter.
    pub filter: Option<Document>,

    /// Only return collection names and types.
    pub name_only: Option<bool>,

    /// Only return collections the user is authorized to use.
    pub authorized_collections: Option<bool>,

    /// A comment to help trace the operation.
    pub comment: Option<Bson>,
}

/// Options for a `listIndexes` command.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ListIndexesOptions {
    /// The number of documents the server should return per batch.
    #[serde(skip)]
    pub batch_size: Option<u32>,

    /// The maximum amount of time to allow the command to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    /// A comment to help trace the operation.
    pub comment: Option<Bson>,
}

/// Options for a `count` command.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CountOptions {
    /// The index to use.
    pub hint: Option<Hint>,

    /// The maximum number of documents to count.
    #[serde(serialize_with = "serde_util::serialize_u64_option_as_i64")]
    pub limit: Option<u64>,

    /// The maximum amount of time to allow the count to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    /// The number of documents to skip before counting.
    #[serde(serialize_with = "serde_util::serialize_u64_option_as_i64")]
    pub skip: Option<u64>,

    /// The collation to use.
    pub collation: Option<Document>,

    /// A comment to help trace the operation.
    pub comment: Option<Bson>,
}

/// Options for a `distinct` command.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DistinctOptions {
    /// The maximum amount of time to allow the command to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    /// The collation to use.
    pub collation: Option<Document>,

    /// A comment to help trace the operation.
    pub comment: Option<Bson>,
}

/// Options for counting documents through an aggregation.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct CountDocumentsOptions {
    /// The index to use.
    pub hint: Option<Hint>,

    /// The maximum number of documents to count.
    pub limit: Option<u64>,

    /// The maximum amount of time to allow the count to run.
    pub max_time: Option<Duration>,

    /// The number of documents to skip before counting.
    pub skip: Option<u64>,

    /// The collation to use.
    pub collation: Option<Document>,

    /// A comment to help trace the operation.
    pub comment: Option<Bson>,
}

/// Options for a `createIndexes` command.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CreateIndexOptions {
    /// How many data-bearing members must finish building the index before it is ready.
    pub commit_quorum: Option<Bson>,

    /// The maximum amount of time to allow the command to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    /// The write concern for the command.
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,

    /// A comment to help trace the operation.
    pub comment: Option<Bson>,
}

/// Options describing a single index.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize, PartialEq)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct IndexOptions {
    /// The index name. Generated from the keys when not given.
    pub name: Option<String>,

    /// Rejects documents whose indexed values duplicate an existing document's.
    pub unique: Option<bool>,

    /// Only indexes documents that have the indexed fields.
    pub sparse: Option<bool>,

    /// Builds the index in the background on servers older than 4.2.
    pub background: Option<bool>,

    /// How long documents live in a TTL index.
    #[serde(
        rename = "expireAfterSeconds",
        default,
        with = "serde_util::duration_option_as_int_seconds"
    )]
    pub expire_after: Option<Duration>,

    /// Only indexes documents matching this filter.
    pub partial_filter_expression: Option<Document>,

    /// Hides the index from the query planner.
    pub hidden: Option<bool>,

    /// The collation of the index.
    pub collation: Option<Document>,

    /// Field weights of a text index.
    pub weights: Option<Document>,

    /// The default language of a text index.
    pub default_language: Option<String>,

    /// Index format version.
    #[serde(rename = "v")]
    pub version: Option<u32>,
}

/// Options for a bulk write.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct BulkWriteOptions {
    /// Whether requests are applied in order, stopping at the first error. Defaults to `true`.
    pub ordered: Option<bool>,

    /// Skips document validation.
    pub bypass_document_validation: Option<bool>,

    /// The write concern for every batch.
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,

    /// A comment to help trace the operation.
    pub comment: Option<Bson>,

    /// Variables accessible in update and delete filters.
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,

    /// Overrides [`ExecutionOptions::max_batch_count`] for this bulk write.
    #[serde(skip)]
    pub max_batch_count: Option<usize>,

    /// Overrides [`ExecutionOptions::max_batch_length`] for this bulk write.
    #[serde(skip)]
    pub max_batch_length: Option<usize>,
}

impl BulkWriteOptions {
    pub(crate) fn is_ordered(&self) -> bool {
        self.ordered.unwrap_or(true)
    }
}

/// Whether change events include the full document.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum FullDocumentType {
    /// Include the current version of updated documents.
    UpdateLookup,

    /// Include the post-image if one is available.
    WhenAvailable,

    /// Include the post-image and fail if it is not available.
    Required,
}

/// Whether change events include the document as it was before the change.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum FullDocumentBeforeChangeType {
    /// Include the pre-image if one is available.
    WhenAvailable,

    /// Include the pre-image and fail if it is not available.
    Required,

    /// Do not include the pre-image.
    Off,
}

/// Options for opening a change stream. The serialized fields form the `$changeStream` stage.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ChangeStreamOptions {
    /// Whether update events carry the full document.
    pub full_document: Option<FullDocumentType>,

    /// Whether events carry the document's pre-image.
    pub full_document_before_change: Option<FullDocumentBeforeChangeType>,

    /// Starts after the event with this token.
    pub resume_after: Option<ResumeToken>,

    /// Starts at this cluster time.
    pub start_at_operation_time: Option<Timestamp>,

    /// Starts after the event with this token, which may be an invalidate event.
    pub start_after: Option<ResumeToken>,

    /// Watches every database of the deployment.
    #[builder(setter(skip))]
    pub(crate) all_changes_for_cluster: Option<bool>,

    /// Includes DDL and other expanded events.
    pub show_expanded_events: Option<bool>,

    /// How long each `getMore` waits for new events.
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// The number of events the server should return per batch.
    #[serde(skip)]
    pub batch_size: Option<u32>,

    /// The collation to use.
    #[serde(skip)]
    pub collation: Option<Document>,

    /// A comment to help trace the operation.
    #[serde(skip)]
    pub comment: Option<Bson>,
}

impl ChangeStreamOptions {
    pub(crate) fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions::builder()
            .batch_size(self.batch_size)
            .collation(self.collation.clone())
            .max_await_time(self.max_await_time)
            .comment(self.comment.clone())
            .build()
    }
}

fn serialize_absolute_value<S>(
    val: &Option<i64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match val {
        Some(v) => serializer.serialize_i64(v.abs()),
        None => serializer.serialize_none(),
    }
}
