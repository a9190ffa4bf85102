use crate::{
    batch::{BatchableSource, Overflow},
    bson::RawDocumentBuf,
    bson_util::array_entry_size_bytes,
    cmap::StreamDescription,
    error::{Error, Result},
};

/// Room left in a message for the command fields around the batched documents.
const COMMAND_OVERHEAD_SIZE: usize = 16_000;

/// Size and count bounds for one batch. Each bound is the stricter of what the caller configured
/// and what the connection reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchLimits {
    pub(crate) max_count: usize,
    pub(crate) max_length: usize,
    pub(crate) max_document_size: usize,
}

impl BatchLimits {
    /// `document_overhead` is added to the server's maximum document size for items that are
    /// wrapped in a statement document, as updates and deletes are.
    pub(crate) fn resolve(
        max_count: Option<usize>,
        max_length: Option<usize>,
        description: &StreamDescription,
        document_overhead: usize,
    ) -> Self {
        let server_count = usize::try_from(description.max_write_batch_size).unwrap_or(0);
        let server_length = usize::try_from(description.max_message_size_bytes)
            .unwrap_or(0)
            .saturating_sub(COMMAND_OVERHEAD_SIZE);
        let max_document_size =
            usize::try_from(description.max_bson_object_size).unwrap_or(0) + document_overhead;
        Self {
            max_count: max_count.map_or(server_count, |count| count.min(server_count)).max(1),
            max_length: max_length.map_or(server_length, |length| length.min(server_length)),
            max_document_size,
        }
    }
}

/// The documents of one batch and their combined size as array entries.
#[derive(Debug, Default)]
pub(crate) struct SizedBatch {
    pub(crate) documents: Vec<RawDocumentBuf>,
    pub(crate) length: usize,
}

impl SizedBatch {
    fn push(&mut self, document: RawDocumentBuf) {
        self.length += array_entry_size_bytes(self.documents.len(), document.as_bytes().len());
        self.documents.push(document);
    }

    fn pop(&mut self) -> Option<RawDocumentBuf> {
        let document = self.documents.pop()?;
        self.length -= array_entry_size_bytes(self.documents.len(), document.as_bytes().len());
        Some(document)
    }
}

/// Packs as many items from `source` as fit within `limits` into one batch.
///
/// A single item that exceeds the count or length bound on its own still forms a batch; only an
/// item above the document size limit is rejected. A retry takes exactly the items of the first
/// attempt.
pub(crate) fn build_batch<T, F>(
    source: &mut BatchableSource<T>,
    limits: &BatchLimits,
    mut serialize: F,
) -> Result<SizedBatch>
where
    F: FnMut(&T) -> Result<RawDocumentBuf>,
{
    let mut batch = SizedBatch::default();

    if let Some(count) = source.processed_count() {
        source.start_batch();
        while batch.documents.len() < count {
            let (_, item) = source
                .next_item()
                .ok_or_else(|| Error::internal("source shrank between batch attempts"))?;
            batch.push(serialize(item)?);
        }
        source.end_batch(count, None)?;
        return Ok(batch);
    }

    if let Some(overflow) = source.start_batch() {
        batch.push(overflow.document);
    }

    while let Some((index, item)) = source.next_item() {
        let document = serialize(item)?;
        if document.as_bytes().len() > limits.max_document_size {
            return Err(Error::invalid_argument(format!(
                "item {index} is {} bytes, which exceeds the maximum document size of {} bytes",
                document.as_bytes().len(),
                limits.max_document_size
            )));
        }

        batch.push(document);
        let exceeded =
            batch.documents.len() > limits.max_count || batch.length > limits.max_length;
        if exceeded && batch.documents.len() > 1 {
            if !source.can_be_split() {
                return Err(Error::invalid_argument(
                    "the items of a single-batch write do not fit in one command",
                ));
            }
            let document = batch
                .pop()
                .ok_or_else(|| Error::internal("overflowed batch was empty"))?;
            let count = batch.documents.len();
            source.end_batch(count, Some(Overflow { index, document }))?;
            return Ok(batch);
        }
    }

    let count = batch.documents.len();
    source.end_batch(count, None)?;
    Ok(batch)
}
