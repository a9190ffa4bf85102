use serde::Deserialize;

use crate::{
    bson::{rawdoc, Bson, Document, RawDocumentBuf},
    cmap::{Command, RawCommandResponse, StreamDescription},
    error::Result,
    operation::{append_options_to_raw_document, ExecutionContext, OperationWithDefaults, Retryability},
    options::DistinctOptions,
    Namespace,
};

/// Finds the distinct values of a field across the documents matching a query.
#[derive(Debug)]
pub struct Distinct {
    ns: Namespace,
    field_name: String,
    query: Document,
    options: Option<DistinctOptions>,
}

impl Distinct {
    /// Finds the distinct values of `field_name` among the documents matching `query`.
    pub fn new(
        ns: Namespace,
        field_name: impl Into<String>,
        query: Document,
        options: impl Into<Option<DistinctOptions>>,
    ) -> Self {
        Self {
            ns,
            field_name: field_name.into(),
            query,
            options: options.into(),
        }
    }
}

impl OperationWithDefaults for Distinct {
    type O = Vec<Bson>;

    const NAME: &'static str = "distinct";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = rawdoc! {
            Self::NAME: self.ns.coll.clone(),
            "key": self.field_name.clone(),
            "query": RawDocumentBuf::from_document(&self.query)?,
        };
        append_options_to_raw_document(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let response: Response = response.body()?;
        Ok(response.values)
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    values: Vec<Bson>,
}
