use std::marker::PhantomData;

use derive_where::derive_where;
use serde::de::DeserializeOwned;

use crate::{
    bson::{rawdoc, Document},
    cmap::{Command, RawCommandResponse, StreamDescription},
    cursor::{Cursor, CursorSpecification},
    error::Result,
    operation::{
        append_options_to_raw_document,
        CursorBody,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
    },
    options::ListCollectionsOptions,
};

/// Lists the collections of a database.
#[derive_where(Debug)]
pub struct ListCollections<T = Document> {
    db: String,
    options: Option<ListCollectionsOptions>,
    #[derive_where(skip)]
    _phantom: PhantomData<fn() -> T>,
}

impl<T> ListCollections<T> {
    /// Lists the collections of `db`.
    pub fn new(db: impl Into<String>, options: impl Into<Option<ListCollectionsOptions>>) -> Self {
        Self {
            db: db.into(),
            options: options.into(),
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> OperationWithDefaults for ListCollections<T> {
    type O = Cursor<T>;

    const NAME: &'static str = "listCollections";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = rawdoc! {
            Self::NAME: 1,
        };

        let mut options = self.options.clone();
        if let Some(ref mut options) = options {
            // The server can only skip loading collection metadata when filtering on name.
            if let Some(ref filter) = options.filter {
                if options.name_only == Some(true) && filter.keys().any(|k| k != "name") {
                    options.name_only = Some(false);
                }
            }
            if let Some(batch_size) = options.batch_size {
                body.append(
                    "cursor",
                    rawdoc! { "batchSize": i32::try_from(batch_size).unwrap_or(i32::MAX) },
                );
            }
        }
        append_options_to_raw_document(&mut body, options.as_ref())?;

        Ok(Command::new(Self::NAME, &self.db, body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let body: CursorBody = response.body()?;
        let spec = CursorSpecification::new(
            body.cursor,
            response.source_address().clone(),
            self.options.as_ref().and_then(|opts| opts.batch_size),
            None,
            None,
        );
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
