use tokio_util::sync::CancellationToken;

use crate::{
    batch::IndexMap,
    binding::WriteBinding,
    error::{Error, Result},
    executor::{execute_write_with_context, RetryableWriteContext},
    operation::{WriteBatch, WriteRequest, WriteRequestType},
    options::{BulkWriteOptions, ExecutionOptions},
    results::{BulkWriteCombiner, BulkWriteResult},
    trace::COMMAND_TRACING_EVENT_TARGET,
    Namespace,
};

/// Applies a list of inserts, updates and deletes to one collection.
///
/// Requests are grouped into runs of a single request type, and each run is sent as one or more
/// `insert`, `update` or `delete` commands. An ordered bulk write keeps the caller's order and
/// stops at the first failed request. An unordered one groups requests by type and executes
/// every run regardless of failures.
#[derive(Debug)]
pub struct BulkWrite {
    ns: Namespace,
    requests: Vec<WriteRequest>,
    options: BulkWriteOptions,
}

/// Consecutive requests of one type sent through the same [`WriteBatch`].
#[derive(Debug)]
pub(crate) struct Run {
    pub(crate) request_type: WriteRequestType,
    pub(crate) requests: Vec<WriteRequest>,
    pub(crate) index_map: IndexMap,
}

impl Run {
    fn new(request_type: WriteRequestType) -> Self {
        Self {
            request_type,
            requests: Vec::new(),
            index_map: IndexMap::new(),
        }
    }

    fn push(&mut self, original_index: usize, request: WriteRequest) {
        self.index_map.push(original_index);
        self.requests.push(request);
    }

    fn len(&self) -> usize {
        self.requests.len()
    }
}

impl BulkWrite {
    /// Prepares `requests` for `ns`. Nothing is validated or sent until [`execute`](Self::execute).
    pub fn new(
        ns: Namespace,
        requests: impl IntoIterator<Item = impl Into<WriteRequest>>,
        options: impl Into<Option<BulkWriteOptions>>,
    ) -> Self {
        Self {
            ns,
            requests: requests.into_iter().map(Into::into).collect(),
            options: options.into().unwrap_or_default(),
        }
    }

    /// Executes every run through one write context, so that a retry's new channel is reused by
    /// the batches that follow it.
    ///
    /// Returns a [`BulkWriteFailure`](crate::error::BulkWriteFailure) error carrying the partial
    /// result when any request failed, the write concern was not satisfied, or requests were left
    /// unsent.
    pub async fn execute(
        self,
        binding: &dyn WriteBinding,
        execution: &ExecutionOptions,
        cancellation: &CancellationToken,
    ) -> Result<BulkWriteResult> {
        let Self {
            ns,
            mut requests,
            options,
        } = self;
        if requests.is_empty() {
            return Err(Error::invalid_argument("a bulk write requires at least one request"));
        }
        for request in requests.iter_mut() {
            request.validate()?;
            request.ensure_id();
        }

        let max_batch_count = options.max_batch_count.or(execution.max_batch_count);
        let max_batch_length = options.max_batch_length.or(execution.max_batch_length);
        let ordered = options.is_ordered();
        let acknowledged = options
            .write_concern
            .as_ref()
            .is_none_or(|wc| wc.is_acknowledged());
        let request_count = requests.len();

        let mut context =
            RetryableWriteContext::create(binding, execution.retry_writes, cancellation).await?;
        let server_max = usize::try_from(context.description().max_write_batch_size)
            .unwrap_or(usize::MAX)
            .max(1);
        let max_run_length = max_batch_count.map_or(server_max, |count| count.clamp(1, server_max));
        let runs = if ordered {
            ordered_runs(requests, max_run_length)
        } else {
            unordered_runs(requests, max_run_length)
        };

        tracing::debug!(
            target: COMMAND_TRACING_EVENT_TARGET,
            namespace = %ns,
            requests = request_count,
            runs = runs.len(),
            ordered,
            "Executing bulk write"
        );

        let mut combiner = BulkWriteCombiner::new(request_count, acknowledged);
        let mut runs = runs.into_iter();
        while let Some(run) = runs.next() {
            let mut batch = WriteBatch::new(
                ns.clone(),
                run,
                options.clone(),
                max_batch_count,
                max_batch_length,
            );
            while batch.has_more() {
                let result = execute_write_with_context(&mut batch, &mut context, cancellation)
                    .await?;
                let stop_at = result.first_error_in_batch.filter(|_| ordered);
                combiner.add(result);
                if let Some(failed) = stop_at {
                    let mut unprocessed = batch.unprocessed_after(failed);
                    unprocessed.extend(runs.flat_map(|run| run.requests));
                    return combiner.finish(unprocessed);
                }
                batch.advance();
            }
        }
        combiner.finish(Vec::new())
    }
}

/// Splits the requests wherever the request type changes or a run reaches `max_run_length`.
pub(crate) fn ordered_runs(requests: Vec<WriteRequest>, max_run_length: usize) -> Vec<Run> {
    let mut runs: Vec<Run> = Vec::new();
    for (index, request) in requests.into_iter().enumerate() {
        let request_type = request.request_type();
        match runs.last_mut() {
            Some(run) if run.request_type == request_type && run.len() < max_run_length => {
                run.push(index, request);
            }
            _ => {
                let mut run = Run::new(request_type);
                run.push(index, request);
                runs.push(run);
            }
        }
    }
    runs
}

/// Keeps one open run per request type. A full run is sealed and replaced by a new one of the
/// same type; the open runs follow the sealed ones, inserts first.
pub(crate) fn unordered_runs(requests: Vec<WriteRequest>, max_run_length: usize) -> Vec<Run> {
    let mut sealed = Vec::new();
    let mut open: [Option<Run>; 3] = [None, None, None];
    for (index, request) in requests.into_iter().enumerate() {
        let request_type = request.request_type();
        let slot = &mut open[type_slot(request_type)];
        let run = slot.get_or_insert_with(|| Run::new(request_type));
        run.push(index, request);
        if run.len() >= max_run_length {
            sealed.extend(slot.take());
        }
    }
    sealed.extend(open.into_iter().flatten());
    sealed
}

fn type_slot(request_type: WriteRequestType) -> usize {
    match request_type {
        WriteRequestType::Insert => 0,
        WriteRequestType::Update => 1,
        WriteRequestType::Delete => 2,
    }
}
