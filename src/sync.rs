//! Blocking variants of every call that touches the network. This is only available when the
//! `sync` feature is enabled.
//!
//! Each wrapper drives the async implementation on a runtime owned by this module, so the
//! semantics are identical. Do not call these from inside an async context.

#[cfg(test)]
mod test;

use std::sync::{Arc, LazyLock};

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{
    binding::{ReadBinding, ServerAddress, WriteBinding},
    bson::Document,
    change_stream::{event::ResumeToken, ChangeStream as AsyncChangeStream, ChangeStreamTarget},
    cursor::Cursor as AsyncCursor,
    error::Result,
    executor,
    operation::{BulkWrite as AsyncBulkWrite, Operation, WriteRequest},
    options::{BulkWriteOptions, ChangeStreamOptions, ExecutionOptions},
    results::BulkWriteResult,
    runtime,
    Namespace,
};

pub(crate) static TOKIO_RUNTIME: LazyLock<tokio::runtime::Runtime> =
    LazyLock::new(|| match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => panic!("Error occurred when starting the underlying async runtime: {err}"),
    });

/// Blocking [`executor::execute_read`].
pub fn execute_read<T: Operation>(
    op: &mut T,
    binding: &dyn ReadBinding,
    retry_requested: bool,
    cancellation: &CancellationToken,
) -> Result<T::O> {
    runtime::block_on(executor::execute_read(
        op,
        binding,
        retry_requested,
        cancellation,
    ))
}

/// Blocking [`executor::execute_write`].
pub fn execute_write<T: Operation>(
    op: &mut T,
    binding: &dyn WriteBinding,
    retry_requested: bool,
    cancellation: &CancellationToken,
) -> Result<T::O> {
    runtime::block_on(executor::execute_write(
        op,
        binding,
        retry_requested,
        cancellation,
    ))
}

/// A blocking cursor. Iterating it yields the documents one at a time, fetching batches as
/// needed.
#[derive(Debug)]
pub struct Cursor<T> {
    async_cursor: AsyncCursor<T>,
    buffer: std::vec::IntoIter<T>,
}

impl<T: DeserializeOwned> Cursor<T> {
    /// Wraps a cursor returned by a cursor-producing operation.
    pub fn new(async_cursor: AsyncCursor<T>) -> Self {
        Self {
            async_cursor,
            buffer: Vec::new().into_iter(),
        }
    }

    /// Blocking [`AsyncCursor::move_next`]. Documents still buffered by iteration are discarded.
    pub fn move_next(&mut self, cancellation: &CancellationToken) -> Result<bool> {
        self.buffer = Vec::new().into_iter();
        runtime::block_on(self.async_cursor.move_next(cancellation))
    }

    /// The batch the last [`move_next`](Cursor::move_next) advanced to.
    pub fn current(&self) -> &[T] {
        self.async_cursor.current()
    }

    /// The server's id for this cursor.
    pub fn id(&self) -> i64 {
        self.async_cursor.id()
    }

    /// The address of the server that owns the cursor.
    pub fn address(&self) -> &ServerAddress {
        self.async_cursor.address()
    }

    /// Blocking [`AsyncCursor::close`].
    pub fn close(&mut self) {
        runtime::block_on(self.async_cursor.close())
    }
}

impl<T: DeserializeOwned> Iterator for Cursor<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let cancellation = CancellationToken::new();
        loop {
            if let Some(document) = self.buffer.next() {
                return Some(Ok(document));
            }
            match runtime::block_on(self.async_cursor.move_next(&cancellation)) {
                Ok(true) => self.buffer = self.async_cursor.take_current().into_iter(),
                Ok(false) => return None,
                Err(error) => return Some(Err(error)),
            }
        }
    }
}

/// A blocking change stream.
#[derive(Debug)]
pub struct ChangeStream<T> {
    async_stream: AsyncChangeStream<T>,
}

impl<T: DeserializeOwned> ChangeStream<T> {
    /// Blocking [`AsyncChangeStream::open`].
    pub fn open(
        binding: Arc<dyn ReadBinding>,
        target: ChangeStreamTarget,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
        execution: &ExecutionOptions,
        cancellation: &CancellationToken,
    ) -> Result<Self> {
        let async_stream = runtime::block_on(AsyncChangeStream::open(
            binding,
            target,
            pipeline,
            options,
            execution,
            cancellation,
        ))?;
        Ok(Self { async_stream })
    }

    /// Blocking [`AsyncChangeStream::next_if_any`].
    pub fn next_if_any(&mut self, cancellation: &CancellationToken) -> Result<Option<T>> {
        runtime::block_on(self.async_stream.next_if_any(cancellation))
    }

    /// The cached resume token.
    pub fn resume_token(&self) -> Option<&ResumeToken> {
        self.async_stream.resume_token()
    }

    /// Whether the stream may still return events.
    pub fn is_alive(&self) -> bool {
        self.async_stream.is_alive()
    }

    /// Blocking [`AsyncChangeStream::close`].
    pub fn close(&mut self) {
        runtime::block_on(self.async_stream.close())
    }
}

/// A blocking bulk write.
#[derive(Debug)]
pub struct BulkWrite {
    inner: AsyncBulkWrite,
}

impl BulkWrite {
    /// See [`AsyncBulkWrite::new`].
    pub fn new(
        ns: Namespace,
        requests: impl IntoIterator<Item = impl Into<WriteRequest>>,
        options: impl Into<Option<BulkWriteOptions>>,
    ) -> Self {
        Self {
            inner: AsyncBulkWrite::new(ns, requests, options),
        }
    }

    /// Blocking [`AsyncBulkWrite::execute`].
    pub fn execute(
        self,
        binding: &dyn WriteBinding,
        execution: &ExecutionOptions,
        cancellation: &CancellationToken,
    ) -> Result<BulkWriteResult> {
        runtime::block_on(self.inner.execute(binding, execution, cancellation))
    }
}
