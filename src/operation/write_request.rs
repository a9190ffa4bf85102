use serde::Serialize;
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::{self, doc, oid::ObjectId, Bson, Document, RawDocumentBuf},
    bson_util::{replacement_document_check, update_document_check},
    error::{Error, Result},
    options::Hint,
};

/// The command a write request is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteRequestType {
    /// Sent with `insert`.
    Insert,

    /// Sent with `update`.
    Update,

    /// Sent with `delete`.
    Delete,
}

impl WriteRequestType {
    pub(crate) fn command_name(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// The field of the command that holds the batched requests.
    pub(crate) fn payload_name(self) -> &'static str {
        match self {
            Self::Insert => "documents",
            Self::Update => "updates",
            Self::Delete => "deletes",
        }
    }

    /// Room in a message taken by the statement wrapper around each request, on top of the
    /// largest allowed document.
    pub(crate) fn document_overhead(self) -> usize {
        match self {
            Self::Insert => 0,
            Self::Update | Self::Delete => 16 * 1024,
        }
    }
}

/// One write of a bulk write.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum WriteRequest {
    /// Inserts a document.
    Insert(InsertRequest),

    /// Updates or replaces the documents matching a filter.
    Update(UpdateRequest),

    /// Deletes the documents matching a filter.
    Delete(DeleteRequest),
}

/// Inserts one document.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct InsertRequest {
    /// The document to insert. An `_id` is generated when absent.
    pub document: Document,
}

impl InsertRequest {
    /// Creates a request inserting `document`.
    pub fn new(document: Document) -> Self {
        Self { document }
    }

    /// The `_id` of the document, once it has one.
    pub fn id(&self) -> Option<&Bson> {
        self.document.get("_id")
    }
}

/// The changes an update request applies.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum UpdateModifications {
    /// A document of update operators, such as `{ "$set": { "x": 1 } }`.
    Document(Document),

    /// An aggregation pipeline.
    Pipeline(Vec<Document>),

    /// A document that replaces the matched document. It must not contain update operators.
    Replacement(Document),
}

impl From<Document> for UpdateModifications {
    fn from(item: Document) -> Self {
        UpdateModifications::Document(item)
    }
}

impl From<Vec<Document>> for UpdateModifications {
    fn from(item: Vec<Document>) -> Self {
        UpdateModifications::Pipeline(item)
    }
}

/// Updates or replaces documents. Serializes to an `update` statement.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UpdateRequest {
    /// Selects the documents to update.
    #[builder(!default)]
    #[serde(rename = "q")]
    pub filter: Document,

    /// The changes to apply.
    #[builder(!default)]
    #[serde(rename = "u")]
    pub update: UpdateModifications,

    /// Whether every matching document is updated rather than the first.
    pub multi: bool,

    /// Inserts a document when none match.
    pub upsert: Option<bool>,

    /// The collation to use.
    pub collation: Option<Document>,

    /// Filters selecting the array elements an update applies to.
    pub array_filters: Option<Vec<Document>>,

    /// The index to use.
    pub hint: Option<Hint>,
}

/// Deletes documents. Serializes to a `delete` statement.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DeleteRequest {
    /// Selects the documents to delete.
    #[builder(!default)]
    #[serde(rename = "q")]
    pub filter: Document,

    /// `1` deletes the first matching document, `0` deletes all of them.
    #[builder(default = 1)]
    pub limit: i32,

    /// The collation to use.
    pub collation: Option<Document>,

    /// The index to use.
    pub hint: Option<Hint>,
}

impl WriteRequest {
    /// The command this request is sent with.
    pub fn request_type(&self) -> WriteRequestType {
        match self {
            Self::Insert(_) => WriteRequestType::Insert,
            Self::Update(_) => WriteRequestType::Update,
            Self::Delete(_) => WriteRequestType::Delete,
        }
    }

    /// Whether replaying this request after an unknown outcome is safe. Writes that may touch
    /// more than one document are not.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            Self::Insert(_) => true,
            Self::Update(update) => !update.multi,
            Self::Delete(delete) => delete.limit != 0,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Self::Insert(_) => Ok(()),
            Self::Update(update) => match update.update {
                UpdateModifications::Document(ref document) => update_document_check(document),
                UpdateModifications::Replacement(ref document) => {
                    if update.multi {
                        return Err(Error::invalid_argument(
                            "a replacement cannot apply to multiple documents",
                        ));
                    }
                    replacement_document_check(document)
                }
                UpdateModifications::Pipeline(_) => Ok(()),
            },
            Self::Delete(delete) => match delete.limit {
                0 | 1 => Ok(()),
                other => Err(Error::invalid_argument(format!(
                    "delete limit must be 0 or 1, got {other}"
                ))),
            },
        }
    }

    /// Gives an insert request's document a generated `_id` as its first field if it has none, so
    /// the id is stable across attempts.
    pub(crate) fn ensure_id(&mut self) {
        if let Self::Insert(insert) = self {
            if !insert.document.contains_key("_id") {
                let mut document = doc! { "_id": ObjectId::new() };
                document.extend(std::mem::take(&mut insert.document));
                insert.document = document;
            }
        }
    }

    /// The statement for this request inside its command's payload array.
    pub(crate) fn to_raw_document(&self) -> Result<RawDocumentBuf> {
        match self {
            Self::Insert(insert) => Ok(RawDocumentBuf::from_document(&insert.document)?),
            Self::Update(update) => Ok(bson::to_raw_document_buf(update)?),
            Self::Delete(delete) => Ok(bson::to_raw_document_buf(delete)?),
        }
    }
}

impl From<InsertRequest> for WriteRequest {
    fn from(request: InsertRequest) -> Self {
        Self::Insert(request)
    }
}

impl From<UpdateRequest> for WriteRequest {
    fn from(request: UpdateRequest) -> Self {
        Self::Update(request)
    }
}

impl From<DeleteRequest> for WriteRequest {
    fn from(request: DeleteRequest) -> Self {
        Self::Delete(request)
    }
}
