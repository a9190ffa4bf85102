use std::marker::PhantomData;

use derive_where::derive_where;
use serde::de::DeserializeOwned;

use crate::{
    bson::{rawdoc, Document, RawDocumentBuf},
    cmap::{Command, RawCommandResponse, StreamDescription},
    cursor::{Cursor, CursorSpecification},
    error::{Error, Result},
    operation::{
        append_options_to_raw_document,
        CursorBody,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
        SERVER_4_4_0_WIRE_VERSION,
    },
    options::FindOptions,
    Namespace,
};

/// Queries a collection, returning a cursor over the matching documents.
#[derive_where(Debug)]
pub struct Find<T> {
    ns: Namespace,
    filter: Document,
    options: Option<Box<FindOptions>>,
    #[derive_where(skip)]
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Find<T> {
    /// Queries `ns` for the documents matching `filter`.
    pub fn new(ns: Namespace, filter: Document, options: impl Into<Option<FindOptions>>) -> Self {
        Self {
            ns,
            filter,
            options: options.into().map(Box::new),
            _phantom: PhantomData,
        }
    }

    /// The number of documents the cursor may return in total. A negative limit asks for a
    /// single batch of at most its absolute value.
    fn cursor_limit(&self) -> Option<usize> {
        self.options
            .as_ref()
            .and_then(|opts| opts.limit)
            .and_then(|limit| usize::try_from(limit.unsigned_abs()).ok())
    }
}

impl<T: DeserializeOwned> OperationWithDefaults for Find<T> {
    type O = Cursor<T>;

    const NAME: &'static str = "find";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = rawdoc! {
            Self::NAME: self.ns.coll.clone(),
        };

        if let Some(ref mut options) = self.options {
            // negative limits should be interpreted as request for single batch
            if options.limit.is_some_and(|limit| limit < 0) {
                body.append("singleBatch", true);
            }

            if let Some(ref mut batch_size) = options.batch_size {
                if i32::try_from(*batch_size).is_err() {
                    return Err(Error::invalid_argument(
                        "the batch size must fit into a signed 32-bit integer",
                    ));
                }
                // A batch size equal to the limit would leave the cursor open on the server.
                if let Some(limit) = options.limit.and_then(|limit| u32::try_from(limit).ok()) {
                    if *batch_size == limit {
                        *batch_size += 1;
                    }
                }
            }
        }

        append_options_to_raw_document(&mut body, self.options.as_ref())?;

        let raw_filter = RawDocumentBuf::from_document(&self.filter)?;
        body.append("filter", raw_filter);

        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let body: CursorBody = response.body()?;

        // The comment is only propagated to getMore on 4.4+.
        let comment = if context.description.max_wire_version.unwrap_or(0)
            < SERVER_4_4_0_WIRE_VERSION
        {
            None
        } else {
            self.options.as_ref().and_then(|opts| opts.comment.clone())
        };

        let spec = CursorSpecification::new(
            body.cursor,
            response.source_address().clone(),
            self.options.as_ref().and_then(|opts| opts.batch_size),
            self.options.as_ref().and_then(|opts| opts.max_await_time),
            comment,
        )
        .with_limit(self.cursor_limit());

        Cursor::new(
            spec,
            context.channel_source.clone(),
            context.session.cloned(),
        )
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
