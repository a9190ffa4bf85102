use crate::{
    error::{IndexedWriteError, WriteConcernError},
    operation::WriteRequest,
    results::BulkWriteResult,
};

/// The outcome of a bulk write in which one or more requests failed, the write concern could not
/// be satisfied, or requests were never sent to the server.
///
/// The result of the requests that did succeed is available in `partial_result`; a
/// `BulkWriteFailure` does not mean that nothing was written.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct BulkWriteFailure {
    /// The individual write errors, indexed by the position of the failed request in the list
    /// passed by the caller.
    pub write_errors: Vec<IndexedWriteError>,

    /// The write concern error reported by the server, if any.
    pub write_concern_error: Option<WriteConcernError>,

    /// The combined result of every batch that was executed.
    pub partial_result: Option<BulkWriteResult>,

    /// Requests that were not sent because an earlier request of an ordered bulk write failed.
    pub unprocessed_requests: Vec<WriteRequest>,
}

impl BulkWriteFailure {
    /// The original indexes of the failed requests, in the order they were reported.
    pub fn failed_indexes(&self) -> impl Iterator<Item = usize> + '_ {
        self.write_errors.iter().map(|e| e.index)
    }
}
