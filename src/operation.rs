//! Server operations: how each command is built, how its reply is interpreted, and how it takes
//! part in retries.

mod aggregate;
mod bulk_write;
mod count;
mod count_documents;
mod create_indexes;
mod distinct;
mod find;
mod get_more;
mod kill_cursors;
mod list_collections;
mod list_indexes;
mod write_batch;
mod write_command;
mod write_request;


use std::{collections::VecDeque, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    bson::{self, RawDocumentBuf},
    bson_util::extend_raw_document_buf,
    cmap::{ChannelSource, Command, RawCommandResponse, StreamDescription},
    concern::WriteConcern,
    error::{CommandError, Error, ErrorKind, IndexedWriteError, Result, WriteConcernError},
    session::Session,
    Namespace,
};

pub use self::{
    aggregate::{Aggregate, AggregateTarget},
    bulk_write::BulkWrite,
    count::Count,
    count_documents::CountDocuments,
    create_indexes::CreateIndexes,
    distinct::Distinct,
    find::Find,
    get_more::{GetMore, GetMoreResult},
    kill_cursors::KillCursors,
    list_collections::ListCollections,
    list_indexes::ListIndexes,
    write_command::WriteCommand,
    write_request::{
        DeleteRequest,
        InsertRequest,
        UpdateModifications,
        UpdateRequest,
        WriteRequest,
        WriteRequestType,
    },
};
pub(crate) use self::{aggregate::ChangeStreamAggregate, bulk_write::Run, write_batch::WriteBatch};

pub(crate) const SERVER_4_0_0_WIRE_VERSION: i32 = 7;
pub(crate) const SERVER_4_4_0_WIRE_VERSION: i32 = 9;

/// A trait modeling the behavior of a server side operation.
///
/// No methods in this trait should have default behaviors to ensure that wrapper operations
/// replicate all behavior. Default behavior is provided by the `OperationWithDefaults` trait.
pub trait Operation {
    /// The output type of this operation.
    type O;

    /// The name of the server side command associated with this operation.
    const NAME: &'static str;

    /// Returns the command that should be sent to the server as part of this operation.
    /// Called once per attempt; a retry calls it again with the new connection's description.
    fn build(&mut self, description: &StreamDescription) -> Result<Command>;

    /// Interprets the server response to the command.
    fn handle_response(
        &self,
        response: RawCommandResponse,
        context: ExecutionContext<'_>,
    ) -> Result<Self::O>;

    /// Interpret an error encountered while sending the built command to the server, potentially
    /// recovering.
    fn handle_error(&self, error: Error) -> Result<Self::O>;

    /// Whether or not this operation will request acknowledgment from the server.
    fn is_acknowledged(&self) -> bool;

    /// The write concern to use for this operation, if any.
    fn write_concern(&self) -> Option<&WriteConcern>;

    /// The level of retryability the operation supports.
    fn retryability(&self) -> Retryability;

    /// Updates this operation as needed for a retry.
    fn update_for_retry(&mut self);

    /// The name of the command, for logging.
    fn name(&self) -> &str;
}

/// What an operation may use of the attempt that produced its reply.
pub struct ExecutionContext<'a> {
    pub(crate) channel_source: &'a Arc<dyn ChannelSource>,
    pub(crate) description: &'a StreamDescription,
    pub(crate) session: Option<&'a Arc<dyn Session>>,
}

/// The kind of retry an operation may take part in.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Retryability {
    /// Retried as a write, with a transaction number.
    Write,

    /// Retried as a read.
    Read,

    /// Never retried.
    None,
}

/// A response body useful for deserializing command errors.
#[derive(Deserialize, Debug)]
pub(crate) struct CommandErrorBody {
    #[serde(rename = "errorLabels")]
    pub(crate) error_labels: Option<Vec<String>>,

    #[serde(flatten)]
    pub(crate) command_error: CommandError,
}

impl From<CommandErrorBody> for Error {
    fn from(command_error_response: CommandErrorBody) -> Error {
        Error::new(
            ErrorKind::Command(command_error_response.command_error),
            command_error_response.error_labels,
        )
    }
}

/// Appends a serializable struct to the input document. The serializable struct MUST serialize to a
/// document; otherwise, an error will be returned.
pub(crate) fn append_options_to_raw_document<T: Serialize>(
    doc: &mut RawDocumentBuf,
    options: Option<&T>,
) -> Result<()> {
    if let Some(options) = options {
        let options_raw_doc = bson::to_raw_document_buf(options)?;
        extend_raw_document_buf(doc, options_raw_doc)?;
    }
    Ok(())
}

pub(crate) fn append_write_concern(
    doc: &mut RawDocumentBuf,
    write_concern: Option<&WriteConcern>,
) -> Result<()> {
    if let Some(write_concern) = write_concern.filter(|wc| !wc.is_empty()) {
        write_concern.validate()?;
        doc.append("writeConcern", bson::to_raw_document_buf(write_concern)?);
    }
    Ok(())
}

/// Body of a write response that could possibly have a write concern error but not write errors.
#[derive(Debug, Deserialize, Default, Clone)]
pub(crate) struct WriteConcernOnlyBody {
    #[serde(rename = "writeConcernError")]
    write_concern_error: Option<WriteConcernError>,

    #[serde(rename = "errorLabels")]
    labels: Option<Vec<String>>,
}

impl WriteConcernOnlyBody {
    pub(crate) fn validate(&self) -> Result<()> {
        match self.write_concern_error {
            Some(ref wc_error) => Err(Error::new(
                ErrorKind::Write(crate::error::WriteFailure::WriteConcernError(
                    wc_error.clone(),
                )),
                self.labels.clone(),
            )),
            None => Ok(()),
        }
    }
}

/// The reply to an `insert`, `update` or `delete` command.
#[derive(Deserialize, Debug, Default)]
pub(crate) struct WriteResponseBody {
    #[serde(default)]
    pub(crate) n: u64,

    #[serde(rename = "nModified")]
    pub(crate) n_modified: Option<u64>,

    #[serde(default)]
    pub(crate) upserted: Vec<UpsertedId>,

    #[serde(rename = "writeErrors", default)]
    pub(crate) write_errors: Vec<IndexedWriteError>,

    #[serde(rename = "writeConcernError")]
    pub(crate) write_concern_error: Option<WriteConcernError>,

    #[serde(rename = "errorLabels")]
    pub(crate) labels: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct UpsertedId {
    pub(crate) index: usize,

    #[serde(rename = "_id")]
    pub(crate) id: bson::Bson,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CursorBody {
    pub(crate) cursor: CursorInfo,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CursorInfo {
    pub(crate) id: i64,

    pub(crate) ns: Namespace,

    #[serde(alias = "nextBatch")]
    pub(crate) first_batch: VecDeque<RawDocumentBuf>,

    pub(crate) post_batch_resume_token: Option<RawDocumentBuf>,
}

pub(crate) use self::sealed::OperationWithDefaults;

mod sealed {
    use super::{
        Command,
        Error,
        ExecutionContext,
        RawCommandResponse,
        Result,
        Retryability,
        StreamDescription,
        WriteConcern,
    };

    // A mirror of the `Operation` trait, with default behavior where appropriate. Should only be
    // implemented by operation types that do not delegate to other operations.
    pub trait OperationWithDefaults {
        /// The output type of this operation.
        type O;

        /// The name of the server side command associated with this operation.
        const NAME: &'static str;

        /// Returns the command that should be sent to the server as part of this operation.
        fn build(&mut self, description: &StreamDescription) -> Result<Command>;

        /// Interprets the server response to the command.
        fn handle_response(
            &self,
            response: RawCommandResponse,
            context: ExecutionContext<'_>,
        ) -> Result<Self::O>;

        /// Interpret an error encountered while sending the built command to the server,
        /// potentially recovering.
        fn handle_error(&self, error: Error) -> Result<Self::O> {
            Err(error)
        }

        /// Whether or not this operation will request acknowledgment from the server.
        fn is_acknowledged(&self) -> bool {
            self.write_concern()
                .map(WriteConcern::is_acknowledged)
                .unwrap_or(true)
        }

        /// The write concern to use for this operation, if any.
        fn write_concern(&self) -> Option<&WriteConcern> {
            None
        }

        /// The level of retryability the operation supports.
        fn retryability(&self) -> Retryability {
            Retryability::None
        }

        /// Updates this operation as needed for a retry.
        fn update_for_retry(&mut self) {}

        fn name(&self) -> &str {
            Self::NAME
        }
    }
}

impl<T: OperationWithDefaults> Operation for T {
    type O = T::O;
    const NAME: &'static str = T::NAME;
    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        self.build(description)
    }
    fn handle_response(
        &self,
        response: RawCommandResponse,
        context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        self.handle_response(response, context)
    }
    fn handle_error(&self, error: Error) -> Result<Self::O> {
        self.handle_error(error)
    }
    fn is_acknowledged(&self) -> bool {
        self.is_acknowledged()
    }
    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern()
    }
    fn retryability(&self) -> Retryability {
        self.retryability()
    }
    fn update_for_retry(&mut self) {
        self.update_for_retry()
    }
    fn name(&self) -> &str {
        self.name()
    }
}
