//! Resumable change streams.

pub mod event;
#[cfg(test)]
mod test;

use std::{collections::VecDeque, marker::PhantomData, sync::Arc};

use derive_where::derive_where;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{
    binding::ReadBinding,
    bson::{self, Document, RawDocumentBuf, Timestamp},
    cursor::Cursor,
    error::{Error, ErrorKind, Result},
    executor::execute_read,
    operation::{AggregateTarget, ChangeStreamAggregate},
    options::{ChangeStreamOptions, ExecutionOptions},
    trace::CURSOR_TRACING_EVENT_TARGET,
    Namespace,
};

use self::event::{ChangeStreamEvent, ResumeToken};

/// What a change stream watches.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ChangeStreamTarget {
    /// One collection.
    Collection(Namespace),

    /// Every collection of a database.
    Database(String),

    /// Every database of the deployment.
    Cluster,
}

impl ChangeStreamTarget {
    pub(crate) fn aggregate_target(&self) -> AggregateTarget {
        match self {
            ChangeStreamTarget::Collection(ns) => AggregateTarget::Collection(ns.clone()),
            ChangeStreamTarget::Database(db) => AggregateTarget::Database(db.clone()),
            ChangeStreamTarget::Cluster => AggregateTarget::Database("admin".to_string()),
        }
    }
}

/// The state of a change stream needed to resume it.
#[derive(Clone, Debug, Default)]
pub(crate) struct ChangeStreamData {
    /// The `operationTime` returned by the initial `aggregate` command.
    pub(crate) initial_operation_time: Option<Timestamp>,

    /// The cached resume token.
    pub(crate) resume_token: Option<ResumeToken>,

    /// Whether the stream has returned a document, which decides between `startAfter` and
    /// `resumeAfter` on resume.
    pub(crate) document_returned: bool,
}

/// A stream of the changes to a collection, database or deployment.
///
/// A change stream survives transient failures. When fetching events fails with a resumable
/// error, such as a network error or a primary step-down, it closes the old cursor, opens a new
/// one starting after the last event it returned, and carries on as one continuous stream.
#[derive_where(Debug)]
pub struct ChangeStream<T = ChangeStreamEvent<Document>> {
    cursor: Cursor<RawDocumentBuf>,
    buffer: VecDeque<RawDocumentBuf>,
    #[derive_where(skip)]
    binding: Arc<dyn ReadBinding>,
    retry_reads: bool,
    target: ChangeStreamTarget,
    pipeline: Vec<Document>,
    options: Option<ChangeStreamOptions>,
    data: ChangeStreamData,
    #[derive_where(skip)]
    _phantom: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ChangeStream<T> {
    /// Opens a change stream with `pipeline` applied to the events. The initial `aggregate` and
    /// every resume are retried according to `execution.retry_reads`.
    pub async fn open(
        binding: Arc<dyn ReadBinding>,
        target: ChangeStreamTarget,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
        execution: &ExecutionOptions,
        cancellation: &CancellationToken,
    ) -> Result<Self> {
        let retry_reads = execution.retry_reads;
        let pipeline: Vec<Document> = pipeline.into_iter().collect();
        let options = options.into();
        let mut op =
            ChangeStreamAggregate::new(target.clone(), pipeline.clone(), options.clone(), None)?;
        let (cursor, data) =
            execute_read(&mut op, binding.as_ref(), retry_reads, cancellation).await?;
        Ok(Self {
            cursor,
            buffer: VecDeque::new(),
            binding,
            retry_reads,
            target,
            pipeline,
            options,
            data,
            _phantom: PhantomData,
        })
    }

    /// Returns the next event if one is available, making at most one round trip for new events
    /// (plus the commands of a resume). `None` means the batch the server returned was empty.
    pub async fn next_if_any(&mut self, cancellation: &CancellationToken) -> Result<Option<T>> {
        loop {
            if let Some(document) = self.buffer.pop_front() {
                return self.surface(document).map(Some);
            }
            match self.cursor.move_next(cancellation).await {
                Ok(true) => {
                    self.buffer = self.cursor.take_current().into();
                    if self.buffer.is_empty() {
                        if let Some(token) = self.cursor.post_batch_resume_token() {
                            self.data.resume_token = Some(token.clone());
                        }
                        return Ok(None);
                    }
                }
                Ok(false) => return Ok(None),
                Err(error) if error.is_resumable() => {
                    tracing::debug!(
                        target: CURSOR_TRACING_EVENT_TARGET,
                        error = %error,
                        "Resuming change stream"
                    );
                    if let Err(resume_error) = self.resume(cancellation).await {
                        return Err(resume_error.with_source(error));
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Caches the token of a document about to be returned and deserializes it. The last document
    /// of a batch is resumed from the batch's token when the server sent one.
    fn surface(&mut self, document: RawDocumentBuf) -> Result<T> {
        let token = match self.cursor.post_batch_resume_token() {
            Some(token) if self.buffer.is_empty() => token.clone(),
            _ => {
                let id = document
                    .get("_id")?
                    .ok_or_else(|| Error::from(ErrorKind::MissingResumeToken))?;
                ResumeToken(id.to_raw_bson())
            }
        };
        self.data.resume_token = Some(token);
        self.data.document_returned = true;
        Ok(bson::from_slice(document.as_bytes())?)
    }

    async fn resume(&mut self, cancellation: &CancellationToken) -> Result<()> {
        let mut op = ChangeStreamAggregate::new(
            self.target.clone(),
            self.pipeline.clone(),
            self.options.clone(),
            Some(self.data.clone()),
        )?;
        let (cursor, data) =
            execute_read(&mut op, self.binding.as_ref(), self.retry_reads, cancellation).await?;

        // The new cursor continues from the cached point, not from the original options.
        let resume_token = cursor
            .post_batch_resume_token()
            .filter(|_| cursor.was_first_batch_empty())
            .cloned()
            .or_else(|| self.data.resume_token.take());
        let data = ChangeStreamData {
            initial_operation_time: self
                .data
                .initial_operation_time
                .or(data.initial_operation_time),
            resume_token,
            document_returned: self.data.document_returned,
        };

        let mut old = std::mem::replace(&mut self.cursor, cursor);
        old.close().await;
        self.buffer.clear();
        self.data = data;
        Ok(())
    }
}

impl<T> ChangeStream<T> {
    /// The token to resume after the most recently returned event, or the latest token the
    /// server reported when no event was returned since.
    pub fn resume_token(&self) -> Option<&ResumeToken> {
        self.data.resume_token.as_ref()
    }

    /// Whether the stream may still return events.
    pub fn is_alive(&self) -> bool {
        !self.buffer.is_empty() || !self.cursor.is_exhausted()
    }

    /// Changes the type events are deserialized into.
    pub fn with_type<D>(self) -> ChangeStream<D> {
        ChangeStream {
            cursor: self.cursor,
            buffer: self.buffer,
            binding: self.binding,
            retry_reads: self.retry_reads,
            target: self.target,
            pipeline: self.pipeline,
            options: self.options,
            data: self.data,
            _phantom: PhantomData,
        }
    }

    /// Closes the stream, killing its cursor on the server.
    pub async fn close(&mut self) {
        self.buffer.clear();
        self.cursor.close().await;
    }
}
