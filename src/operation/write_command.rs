use crate::{
    batch::IndexMap,
    cmap::{Command, RawCommandResponse, StreamDescription},
    concern::WriteConcern,
    error::{Error, Result},
    operation::{ExecutionContext, Operation, Retryability, Run, WriteBatch, WriteRequest},
    options::BulkWriteOptions,
    results::{BulkWriteCombiner, BulkWriteResult},
    Namespace,
};

/// Sends requests of a single type as exactly one `insert`, `update` or `delete` command.
///
/// Unlike [`BulkWrite`](super::BulkWrite), the requests are never split across commands. A list
/// that does not fit within the connection's batch limits is rejected before anything is sent.
#[derive(Debug)]
pub struct WriteCommand {
    batch: WriteBatch,
    request_count: usize,
    acknowledged: bool,
    ordered: bool,
}

impl WriteCommand {
    /// Prepares `requests` for `ns`. The requests must be non-empty and share one type.
    pub fn new(
        ns: Namespace,
        requests: impl IntoIterator<Item = impl Into<WriteRequest>>,
        options: impl Into<Option<BulkWriteOptions>>,
    ) -> Result<Self> {
        let mut requests: Vec<WriteRequest> = requests.into_iter().map(Into::into).collect();
        let request_type = requests
            .first()
            .map(WriteRequest::request_type)
            .ok_or_else(|| {
                Error::invalid_argument("a write command requires at least one request")
            })?;
        if requests.iter().any(|request| request.request_type() != request_type) {
            return Err(Error::invalid_argument(
                "the requests of a write command must all have the same type",
            ));
        }
        for request in requests.iter_mut() {
            request.validate()?;
            request.ensure_id();
        }

        let options = options.into().unwrap_or_default();
        let acknowledged = options
            .write_concern
            .as_ref()
            .is_none_or(|wc| wc.is_acknowledged());
        let request_count = requests.len();
        let run = Run {
            request_type,
            index_map: IndexMap::range(0, request_count),
            requests,
        };
        Ok(Self {
            ordered: options.is_ordered(),
            batch: WriteBatch::single(ns, run, options),
            request_count,
            acknowledged,
        })
    }
}

impl Operation for WriteCommand {
    type O = BulkWriteResult;

    const NAME: &'static str = "writeCommand";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        self.batch.build(description)
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        context: ExecutionContext<'_>,
    ) -> Result<Self::O> {
        let result = self.batch.handle_response(response, context)?;
        let unprocessed = match result.first_error_in_batch.filter(|_| self.ordered) {
            Some(failed) => self.batch.unprocessed_after(failed),
            None => Vec::new(),
        };
        let mut combiner = BulkWriteCombiner::new(self.request_count, self.acknowledged);
        combiner.add(result);
        combiner.finish(unprocessed)
    }

    fn handle_error(&self, error: Error) -> Result<Self::O> {
        Err(error)
    }

    fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.batch.write_concern()
    }

    fn retryability(&self) -> Retryability {
        self.batch.retryability()
    }

    fn update_for_retry(&mut self) {
        self.batch.update_for_retry()
    }

    fn name(&self) -> &str {
        self.batch.name()
    }
}
