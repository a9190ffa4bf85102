use serde::Deserialize;

use crate::{
    bson::{rawdoc, Document, RawDocumentBuf},
    cmap::{Command, RawCommandResponse, StreamDescription},
    error::Result,
    operation::{append_options_to_raw_document, ExecutionContext, OperationWithDefaults, Retryability},
    options::CountOptions,
    Namespace,
};

/// Counts documents with the `count` command, which may use collection metadata and is not
/// accurate inside sharded clusters with orphaned documents.
#[derive(Debug)]
pub struct Count {
    ns: Namespace,
    filter: Option<Document>,
    options: Option<CountOptions>,
}

impl Count {
    /// Counts the documents of `ns` matching `filter`. Without a filter the server answers from
    /// collection metadata.
    pub fn new(
        ns: Namespace,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<CountOptions>>,
    ) -> Self {
        Self {
            ns,
            filter: filter.into(),
            options: options.into(),
        }
    }
}

impl OperationWithDefaults for Count {
    type O = u64;

    const NAME: &'static str = "count";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = rawdoc! {
            Self::NAME: self.ns.coll.clone(),
        };
        if let Some(ref filter) = self.filter {
            body.append("query", RawDocumentBuf::from_document(filter)?);
        }
        append_options_to_raw_document(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let response: Response = response.body()?;
        Ok(response.n)
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    n: u64,
}
