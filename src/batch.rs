//! Splitting request lists into wire batches.

mod index_map;
mod serializer;
#[cfg(test)]
mod test;

use crate::{
    bson::RawDocumentBuf,
    error::{Error, Result},
};

pub use self::index_map::IndexMap;
pub(crate) use self::serializer::{build_batch, BatchLimits};

/// An item that was serialized for a batch but did not fit. It is the first item of the next
/// batch, and its bytes are reused rather than serialized again.
#[derive(Debug, Clone)]
pub(crate) struct Overflow {
    pub(crate) index: usize,
    pub(crate) document: RawDocumentBuf,
}

/// An ordered list of items consumed in size-bounded batches.
///
/// `offset` only advances, and only past items that were part of a completed batch. The number
/// of items the first attempt of a batch took is remembered so a retry reproduces the same
/// batch even if the new connection reports different limits.
#[derive(Debug)]
pub struct BatchableSource<T> {
    items: Vec<T>,
    offset: usize,
    position: usize,
    processed_count: Option<usize>,
    overflow: Option<Overflow>,
    can_be_split: bool,
}

impl<T> BatchableSource<T> {
    /// A source that may be sent in as many batches as its size requires.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            offset: 0,
            position: 0,
            processed_count: None,
            overflow: None,
            can_be_split: true,
        }
    }

    /// A source whose items must all go out in one batch.
    pub fn single_batch(items: Vec<T>) -> Self {
        Self {
            can_be_split: false,
            ..Self::new(items)
        }
    }

    /// Every item, including those already sent.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// The index of the first item not yet part of a completed batch.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// How many items the first attempt of the in-flight batch took.
    pub fn processed_count(&self) -> Option<usize> {
        self.processed_count
    }

    /// Whether this source may be split across batches.
    pub fn can_be_split(&self) -> bool {
        self.can_be_split
    }

    /// Whether items remain after the last completed batch.
    pub fn has_more(&self) -> bool {
        self.offset < self.items.len()
    }

    /// The items of the in-flight batch.
    pub fn batch_items(&self) -> &[T] {
        let end = self.offset + self.processed_count.unwrap_or(0);
        &self.items[self.offset..end]
    }

    /// The items after the in-flight batch.
    pub(crate) fn remaining_after_batch(&self) -> &[T] {
        &self.items[self.offset + self.processed_count.unwrap_or(0)..]
    }

    /// Begins building a batch. Returns the serialized overflow from the previous batch when it
    /// is the first item to send; iteration then resumes after it.
    pub(crate) fn start_batch(&mut self) -> Option<Overflow> {
        self.position = self.offset;
        if self.processed_count.is_some() {
            return None;
        }
        match self.overflow.take() {
            Some(overflow) if overflow.index == self.offset => {
                self.position += 1;
                Some(overflow)
            }
            _ => None,
        }
    }

    /// The next item to consider for the batch being built, with its index in the source.
    pub(crate) fn next_item(&mut self) -> Option<(usize, &T)> {
        let index = self.position;
        let item = self.items.get(index)?;
        self.position += 1;
        Some((index, item))
    }

    /// Finalizes the batch being built with `count` items. The count is recorded only for the
    /// first attempt; a retry must take exactly the recorded number.
    pub(crate) fn end_batch(&mut self, count: usize, overflow: Option<Overflow>) -> Result<()> {
        match self.processed_count {
            None => {
                self.processed_count = Some(count);
                self.overflow = overflow;
                Ok(())
            }
            Some(processed) if processed == count => Ok(()),
            Some(processed) => Err(Error::internal(format!(
                "retried batch has {count} items but the first attempt had {processed}"
            ))),
        }
    }

    /// Moves past the in-flight batch once it has been applied.
    pub(crate) fn advance_past_processed(&mut self) {
        if let Some(count) = self.processed_count.take() {
            self.offset += count;
        }
        self.position = self.offset;
    }
}
