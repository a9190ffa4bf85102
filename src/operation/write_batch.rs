use crate::{
    batch::{build_batch, BatchLimits, BatchableSource, IndexMap},
    bson::rawdoc,
    bson_util::to_raw_array,
    cmap::{Command, RawCommandResponse, StreamDescription},
    concern::WriteConcern,
    error::Result,
    operation::{
        append_options_to_raw_document,
        append_write_concern,
        ExecutionContext,
        OperationWithDefaults,
        Retryability,
        Run,
        WriteRequest,
        WriteRequestType,
        WriteResponseBody,
    },
    options::BulkWriteOptions,
    results::BulkWriteBatchResult,
    Namespace,
};

/// Sends the requests of one run as a sequence of `insert`, `update` or `delete` commands, one
/// batch per execution.
#[derive(Debug)]
pub(crate) struct WriteBatch {
    ns: Namespace,
    request_type: WriteRequestType,
    source: BatchableSource<WriteRequest>,
    index_map: IndexMap,
    options: BulkWriteOptions,
    max_batch_count: Option<usize>,
    max_batch_length: Option<usize>,
    retryable: bool,
}

impl WriteBatch {
    pub(crate) fn new(
        ns: Namespace,
        run: Run,
        options: BulkWriteOptions,
        max_batch_count: Option<usize>,
        max_batch_length: Option<usize>,
    ) -> Self {
        let retryable = run.requests.iter().all(WriteRequest::is_retryable);
        Self {
            ns,
            request_type: run.request_type,
            source: BatchableSource::new(run.requests),
            index_map: run.index_map,
            options,
            max_batch_count,
            max_batch_length,
            retryable,
        }
    }

    /// A batch whose requests must all go out in one command. Limits configured in `options`
    /// still apply, so a run that exceeds them is rejected rather than split.
    pub(crate) fn single(ns: Namespace, run: Run, options: BulkWriteOptions) -> Self {
        let retryable = run.requests.iter().all(WriteRequest::is_retryable);
        Self {
            ns,
            request_type: run.request_type,
            source: BatchableSource::single_batch(run.requests),
            index_map: run.index_map,
            max_batch_count: options.max_batch_count,
            max_batch_length: options.max_batch_length,
            options,
            retryable,
        }
    }

    /// Whether requests remain to be sent.
    pub(crate) fn has_more(&self) -> bool {
        self.source.has_more()
    }

    /// Moves past the batch that was just applied.
    pub(crate) fn advance(&mut self) {
        self.source.advance_past_processed();
    }

    /// The requests left unsent when the request at `failed_in_batch` within the current batch
    /// stopped an ordered bulk write.
    pub(crate) fn unprocessed_after(&self, failed_in_batch: usize) -> Vec<WriteRequest> {
        let batch = self.source.batch_items();
        batch
            .iter()
            .skip(failed_in_batch + 1)
            .chain(self.source.remaining_after_batch())
            .cloned()
            .collect()
    }
}

impl OperationWithDefaults for WriteBatch {
    type O = BulkWriteBatchResult;

    const NAME: &'static str = "writeBatch";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        let limits = BatchLimits::resolve(
            self.max_batch_count,
            self.max_batch_length,
            description,
            self.request_type.document_overhead(),
        );
        let batch = build_batch(&mut self.source, &limits, WriteRequest::to_raw_document)?;

        let name = self.request_type.command_name();
        let mut body = rawdoc! { name: self.ns.coll.clone() };
        if self.options.ordered.is_none() {
            body.append("ordered", true);
        }
        append_options_to_raw_document(&mut body, Some(&self.options))?;
        append_write_concern(&mut body, self.options.write_concern.as_ref())?;
        body.append(
            self.request_type.payload_name(),
            to_raw_array(batch.documents),
        );

        Ok(Command::new(name, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let body: WriteResponseBody = if self.is_acknowledged() {
            response.body()?
        } else {
            WriteResponseBody::default()
        };
        let offset = self.source.offset();
        BulkWriteBatchResult::new(
            self.request_type,
            self.source.batch_items(),
            self.options.is_ordered(),
            body,
            |local| self.index_map.map(offset + local),
        )
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.write_concern.as_ref()
    }

    fn retryability(&self) -> Retryability {
        if self.retryable {
            Retryability::Write
        } else {
            Retryability::None
        }
    }

    fn name(&self) -> &str {
        self.request_type.command_name()
    }
}
