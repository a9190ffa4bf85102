use std::marker::PhantomData;

use derive_where::derive_where;
use serde::de::DeserializeOwned;

use crate::{
    binding::ServerAddress,
    bson::{rawdoc, Document},
    cmap::{Command, RawCommandResponse, StreamDescription},
    cursor::{Cursor, CursorSpecification},
    error::{Error, Result},
    operation::{
        append_options_to_raw_document,
        CursorBody,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
    },
    options::ListIndexesOptions,
    Namespace,
};

/// Lists the indexes of a collection. A collection that does not exist has no indexes.
#[derive_where(Debug)]
pub struct ListIndexes<T = Document> {
    ns: Namespace,
    options: Option<ListIndexesOptions>,
    address: Option<ServerAddress>,
    #[derive_where(skip)]
    _phantom: PhantomData<fn() -> T>,
}

impl<T> ListIndexes<T> {
    /// Lists the indexes of `ns`. A missing collection yields an empty cursor.
    pub fn new(ns: Namespace, options: impl Into<Option<ListIndexesOptions>>) -> Self {
        Self {
            ns,
            options: options.into(),
            address: None,
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> OperationWithDefaults for ListIndexes<T> {
    type O = Cursor<T>;

    const NAME: &'static str = "listIndexes";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        self.address = Some(description.server_address.clone());

        let mut body = rawdoc! {
            Self::NAME: self.ns.coll.clone(),
        };
        if let Some(size) = self.options.as_ref().and_then(|o| o.batch_size) {
            let size = i32::try_from(size)
                .map_err(|_| Error::invalid_argument("batch size must fit into an i32"))?;
            body.append("cursor", rawdoc! { "batchSize": size });
        }
        append_options_to_raw_document(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, &self.ns.db, body))
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
            self.options.as_ref().and_then(|o| o.batch_size),
            None,
            None,
        );
        Cursor::new(
            spec,
            context.channel_source.clone(),
            context.session.cloned(),
        )
    }

    fn handle_error(&self, error: Error) -> Result<Self::O> {
        if error.is_ns_not_found() {
            return Ok(Cursor::exhausted(
                self.ns.clone(),
                self.address.clone().unwrap_or_default(),
            ));
        }
        Err(error)
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
