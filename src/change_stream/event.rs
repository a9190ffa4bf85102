//! Contains the types related to a `ChangeStream` event.

use serde::{Deserialize, Serialize};

use crate::bson::{Document, RawBson, RawDocumentBuf, Timestamp};

/// An opaque token used for resuming an interrupted change stream.
///
/// When starting a new change stream, a token can be supplied as the `resume_after` or
/// `start_after` option to continue the stream after the event that produced it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct ResumeToken(pub(crate) RawBson);

impl ResumeToken {
    pub(crate) fn from_raw(doc: Option<RawDocumentBuf>) -> Option<ResumeToken> {
        doc.map(|doc| ResumeToken(RawBson::Document(doc)))
    }

    /// Wraps an existing token value.
    pub fn new(token: impl Into<RawBson>) -> Self {
        Self(token.into())
    }

    /// The token value.
    pub fn as_raw(&self) -> &RawBson {
        &self.0
    }
}

/// A change event reported by a change stream.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ChangeStreamEvent<T> {
    /// The token to resume the stream after this event.
    #[serde(rename = "_id")]
    pub id: ResumeToken,

    /// The kind of change.
    pub operation_type: OperationType,

    /// The database and collection the change happened in.
    pub ns: Option<ChangeNamespace>,

    /// The `_id` (and shard key) of the changed document.
    pub document_key: Option<Document>,

    /// The fields an update changed or removed.
    pub update_description: Option<UpdateDescription>,

    /// The cluster time of the change.
    pub cluster_time: Option<Timestamp>,

    /// The document after the change. Present for inserts and replacements, and for updates when
    /// the stream asked for it.
    pub full_document: Option<T>,

    /// The document before the change, when the stream asked for pre-images.
    pub full_document_before_change: Option<T>,
}

/// The database and, for collection-level events, the collection of a change.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct ChangeNamespace {
    /// The database name.
    pub db: String,

    /// The collection name. Absent for database-level events such as `dropDatabase`.
    pub coll: Option<String>,
}

/// Describes which fields have been updated or removed from a document.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UpdateDescription {
    /// The changed fields and their new values.
    pub updated_fields: Document,

    /// The names of removed fields.
    pub removed_fields: Vec<String>,
}

/// The operation type represented in a given change notification.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum OperationType {
    /// A document was inserted.
    Insert,

    /// A document was updated.
    Update,

    /// A document was replaced.
    Replace,

    /// A document was deleted.
    Delete,

    /// The collection was dropped.
    Drop,

    /// The collection was renamed.
    Rename,

    /// The database was dropped.
    DropDatabase,

    /// The stream was invalidated and will report no further events.
    Invalidate,

    /// An event type this crate does not model.
    #[serde(other)]
    Other,
}
