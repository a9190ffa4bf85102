use crate::{
    bson::{self, rawdoc},
    cmap::{Command, RawCommandResponse, StreamDescription},
    concern::WriteConcern,
    error::{Error, Result},
    index::IndexModel,
    operation::{
        append_options_to_raw_document,
        append_write_concern,
        ExecutionContext,
        OperationWithDefaults,
        WriteConcernOnlyBody,
        SERVER_4_4_0_WIRE_VERSION,
    },
    options::CreateIndexOptions,
    results::CreateIndexesResult,
    Namespace,
};

/// Creates indexes on a collection. Indexes without a name get the server's default name.
#[derive(Debug)]
pub struct CreateIndexes {
    ns: Namespace,
    indexes: Vec<IndexModel>,
    options: Option<CreateIndexOptions>,
}

impl CreateIndexes {
    /// Creates `indexes` on `ns`. Indexes without a name get the default one.
    pub fn new(
        ns: Namespace,
        indexes: Vec<IndexModel>,
        options: impl Into<Option<CreateIndexOptions>>,
    ) -> Self {
        Self {
            ns,
            indexes,
            options: options.into(),
        }
    }
}

impl OperationWithDefaults for CreateIndexes {
    type O = CreateIndexesResult;

    const NAME: &'static str = "createIndexes";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        if self.indexes.is_empty() {
            return Err(Error::invalid_argument("no indexes to create"));
        }
        // commit quorum is not supported on < 4.4
        if description.max_wire_version.unwrap_or(0) < SERVER_4_4_0_WIRE_VERSION
            && self
                .options
                .as_ref()
                .is_some_and(|options| options.commit_quorum.is_some())
        {
            return Err(Error::invalid_argument(
                "specifying a commit quorum is not supported on server versions < 4.4",
            ));
        }

        self.indexes.iter_mut().for_each(IndexModel::update_name);
        let mut indexes = bson::RawArrayBuf::new();
        for index in &self.indexes {
            indexes.push(bson::to_raw_document_buf(index)?);
        }
        let mut body = rawdoc! {
            Self::NAME: self.ns.coll.clone(),
            "indexes": indexes,
        };
        append_options_to_raw_document(&mut body, self.options.as_ref())?;
        append_write_concern(&mut body, self.write_concern())?;

        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let response: WriteConcernOnlyBody = response.body()?;
        response.validate()?;
        let index_names = self
            .indexes
            .iter()
            .filter_map(|index| index.name().map(str::to_string))
            .collect();
        Ok(CreateIndexesResult { index_names })
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options
            .as_ref()
            .and_then(|opts| opts.write_concern.as_ref())
    }
}
