use std::collections::{HashMap, HashSet};

use crate::{
    bson::Bson,
    error::{
        BulkWriteFailure,
        Error,
        ErrorKind,
        IndexedWriteError,
        Result,
        WriteConcernError,
    },
    operation::{WriteRequest, WriteRequestType, WriteResponseBody},
};

/// The combined result of every batch of a bulk write.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct BulkWriteResult {
    /// Whether the server acknowledged the writes. When `false`, the counts are meaningless.
    pub acknowledged: bool,

    /// The number of requests in the bulk write.
    pub request_count: usize,

    /// The number of inserted documents.
    pub inserted_count: u64,

    /// The number of documents matched by updates, not counting upserts.
    pub matched_count: u64,

    /// The number of documents modified by updates. `None` when a server did not report it for
    /// every update batch.
    pub modified_count: Option<u64>,

    /// The number of deleted documents.
    pub deleted_count: u64,

    /// The documents inserted by upserts, ordered by request index.
    pub upserts: Vec<BulkWriteUpsert>,

    /// The `_id`s of inserted documents, keyed by request index.
    pub inserted_ids: HashMap<usize, Bson>,
}

impl BulkWriteResult {
    pub(crate) fn unacknowledged(request_count: usize) -> Self {
        Self {
            acknowledged: false,
            request_count,
            ..Default::default()
        }
    }
}

/// A document inserted by an upsert.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct BulkWriteUpsert {
    /// The index of the request in the bulk write.
    pub index: usize,

    /// The `_id` of the inserted document.
    pub id: Bson,
}

/// The outcome of one `insert`, `update` or `delete` command of a bulk write, with every index
/// already mapped back to the caller's request list.
#[derive(Clone, Debug)]
pub(crate) struct BulkWriteBatchResult {
    pub(crate) request_type: WriteRequestType,
    pub(crate) n: u64,
    pub(crate) n_modified: Option<u64>,
    pub(crate) upserts: Vec<BulkWriteUpsert>,
    pub(crate) inserted_ids: Vec<(usize, Bson)>,
    pub(crate) write_errors: Vec<IndexedWriteError>,
    pub(crate) write_concern_error: Option<WriteConcernError>,
    pub(crate) labels: Vec<String>,

    /// The position within the batch of the first failed request.
    pub(crate) first_error_in_batch: Option<usize>,
}

impl BulkWriteBatchResult {
    /// Interprets the reply to a batch. `map_index` translates a position within the batch to the
    /// position in the caller's request list.
    pub(crate) fn new(
        request_type: WriteRequestType,
        batch: &[WriteRequest],
        ordered: bool,
        body: WriteResponseBody,
        map_index: impl Fn(usize) -> Option<usize>,
    ) -> Result<Self> {
        let translate = |local: usize| {
            map_index(local).ok_or_else(|| {
                Error::invalid_response(format!(
                    "server reported index {local} for a batch of {} requests",
                    batch.len()
                ))
            })
        };

        let first_error_in_batch = body.write_errors.iter().map(|e| e.index).min();
        let failed: HashSet<usize> = body.write_errors.iter().map(|e| e.index).collect();

        let mut inserted_ids = Vec::new();
        if request_type == WriteRequestType::Insert {
            for (local, request) in batch.iter().enumerate() {
                if failed.contains(&local)
                    || (ordered && first_error_in_batch.is_some_and(|first| local > first))
                {
                    continue;
                }
                if let WriteRequest::Insert(insert) = request {
                    if let Some(id) = insert.id() {
                        inserted_ids.push((translate(local)?, id.clone()));
                    }
                }
            }
        }

        let upserts = body
            .upserted
            .iter()
            .map(|upserted| {
                Ok(BulkWriteUpsert {
                    index: translate(upserted.index)?,
                    id: upserted.id.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let write_errors = body
            .write_errors
            .into_iter()
            .map(|mut error| {
                error.index = translate(error.index)?;
                Ok(error)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            request_type,
            n: body.n,
            n_modified: body.n_modified,
            upserts,
            inserted_ids,
            write_errors,
            write_concern_error: body.write_concern_error,
            labels: body.labels.unwrap_or_default(),
            first_error_in_batch,
        })
    }
}

/// Folds batch results into the result of the whole bulk write.
#[derive(Debug)]
pub(crate) struct BulkWriteCombiner {
    acknowledged: bool,
    result: BulkWriteResult,
    modified_count_available: bool,
    write_errors: Vec<IndexedWriteError>,
    write_concern_errors: Vec<WriteConcernError>,
    labels: HashSet<String>,
}

impl BulkWriteCombiner {
    pub(crate) fn new(request_count: usize, acknowledged: bool) -> Self {
        Self {
            acknowledged,
            result: BulkWriteResult {
                acknowledged,
                request_count,
                ..Default::default()
            },
            modified_count_available: true,
            write_errors: Vec::new(),
            write_concern_errors: Vec::new(),
            labels: HashSet::new(),
        }
    }

    pub(crate) fn add(&mut self, batch: BulkWriteBatchResult) {
        let result = &mut self.result;
        match batch.request_type {
            WriteRequestType::Insert => result.inserted_count += batch.n,
            WriteRequestType::Update => {
                result.matched_count += batch.n.saturating_sub(batch.upserts.len() as u64);
                match batch.n_modified {
                    Some(n_modified) => {
                        *result.modified_count.get_or_insert(0) += n_modified;
                    }
                    None => self.modified_count_available = false,
                }
            }
            WriteRequestType::Delete => result.deleted_count += batch.n,
        }
        result.upserts.extend(batch.upserts);
        result.inserted_ids.extend(batch.inserted_ids);
        self.write_errors.extend(batch.write_errors);
        self.write_concern_errors.extend(batch.write_concern_error);
        self.labels.extend(batch.labels);
    }

    /// Produces the final result, or a [`BulkWriteFailure`] carrying it as the partial result when
    /// any request failed, the write concern was not met, or requests were left unsent.
    pub(crate) fn finish(self, unprocessed_requests: Vec<WriteRequest>) -> Result<BulkWriteResult> {
        if !self.acknowledged {
            return Ok(BulkWriteResult::unacknowledged(self.result.request_count));
        }

        let mut result = self.result;
        result.modified_count = if self.modified_count_available {
            Some(result.modified_count.unwrap_or(0))
        } else {
            None
        };
        result.upserts.sort_by_key(|upsert| upsert.index);

        let mut write_errors = self.write_errors;
        write_errors.sort_by_key(|error| error.index);
        let write_concern_error = combine_write_concern_errors(self.write_concern_errors);

        if write_errors.is_empty()
            && write_concern_error.is_none()
            && unprocessed_requests.is_empty()
        {
            return Ok(result);
        }

        Err(Error::new(
            ErrorKind::BulkWrite(BulkWriteFailure {
                write_errors,
                write_concern_error,
                partial_result: Some(result),
                unprocessed_requests,
            }),
            Some(self.labels),
        ))
    }
}

/// Several batches may each report a write concern error. They are reported as one, keeping the
/// last error's code.
fn combine_write_concern_errors(
    mut errors: Vec<WriteConcernError>,
) -> Option<WriteConcernError> {
    if errors.len() <= 1 {
        return errors.pop();
    }
    let message = errors
        .iter()
        .map(|error| error.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    let mut labels: Vec<String> = Vec::new();
    for label in errors.iter().flat_map(|error| error.labels.iter()) {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    let mut last = errors.pop()?;
    last.message = message;
    last.labels = labels;
    Some(last)
}
