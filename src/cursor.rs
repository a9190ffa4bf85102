//! A lazily-fetched, server-paginated result set.

#[cfg(test)]
mod test;

use std::{collections::VecDeque, sync::Arc, time::Duration};

use derive_where::derive_where;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{
    binding::ServerAddress,
    bson::{self, Bson, RawDocumentBuf},
    change_stream::event::ResumeToken,
    cmap::ChannelSource,
    error::{Error, ErrorKind, Result},
    executor::execute_on_source,
    operation::{CursorInfo, GetMore, KillCursors},
    runtime,
    session::Session,
    trace::CURSOR_TRACING_EVENT_TARGET,
    Namespace,
};

/// How long closing a cursor waits for the server to kill it.
const KILL_CURSORS_TIMEOUT: Duration = Duration::from_secs(10);

/// The reply to a cursor-producing command, before the cursor is bound to a channel source.
#[derive(Debug, Clone)]
pub(crate) struct CursorSpecification {
    pub(crate) info: CursorInformation,
    pub(crate) initial_buffer: VecDeque<RawDocumentBuf>,
    pub(crate) post_batch_resume_token: Option<ResumeToken>,
}

impl CursorSpecification {
    pub(crate) fn new(
        cursor: CursorInfo,
        address: ServerAddress,
        batch_size: impl Into<Option<u32>>,
        max_await_time: impl Into<Option<Duration>>,
        comment: impl Into<Option<Bson>>,
    ) -> Self {
        Self {
            info: CursorInformation {
                ns: cursor.ns,
                id: cursor.id,
                address,
                batch_size: batch_size.into(),
                limit: None,
                max_await_time: max_await_time.into(),
                comment: comment.into(),
            },
            initial_buffer: cursor.first_batch,
            post_batch_resume_token: ResumeToken::from_raw(cursor.post_batch_resume_token),
        }
    }

    /// Caps the number of documents the cursor returns. `None` and `Some(0)` mean no limit.
    pub(crate) fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.info.limit = limit.filter(|limit| *limit > 0);
        self
    }
}

/// Static information about a cursor.
#[derive(Clone, Debug)]
pub(crate) struct CursorInformation {
    pub(crate) ns: Namespace,
    pub(crate) address: ServerAddress,
    pub(crate) id: i64,
    pub(crate) batch_size: Option<u32>,
    pub(crate) limit: Option<usize>,
    pub(crate) max_await_time: Option<Duration>,
    pub(crate) comment: Option<Bson>,
}

/// A server-side result set, delivered one batch at a time.
///
/// The first batch arrives with the command that opened the cursor. Once it has been consumed,
/// [`move_next`](Cursor::move_next) fetches further batches with `getMore` from the server that
/// owns the cursor until the server reports the cursor exhausted or the limit is reached.
///
/// A cursor that is dropped while the server still holds it schedules a `killCursors` on the
/// current tokio runtime. Call [`close`](Cursor::close) to wait for that instead.
#[derive_where(Debug; T)]
pub struct Cursor<T> {
    info: CursorInformation,
    #[derive_where(skip)]
    channel_source: Option<Arc<dyn ChannelSource>>,
    #[derive_where(skip)]
    session: Option<Arc<dyn Session>>,
    first_batch: Option<Vec<T>>,
    current_batch: Option<Vec<T>>,
    count: usize,
    post_batch_resume_token: Option<ResumeToken>,
    was_first_batch_empty: bool,
    closed: bool,
}

impl<T: DeserializeOwned> Cursor<T> {
    pub(crate) fn new(
        spec: CursorSpecification,
        channel_source: Arc<dyn ChannelSource>,
        session: Option<Arc<dyn Session>>,
    ) -> Result<Self> {
        let was_first_batch_empty = spec.initial_buffer.is_empty();
        let mut cursor = Self {
            channel_source: (spec.info.id != 0).then_some(channel_source),
            info: spec.info,
            session,
            first_batch: None,
            current_batch: None,
            count: 0,
            post_batch_resume_token: spec.post_batch_resume_token,
            was_first_batch_empty,
            closed: false,
        };
        let first_batch = deserialize_batch(spec.initial_buffer)?;
        cursor.first_batch = Some(cursor.save_batch(first_batch));
        Ok(cursor)
    }

    /// A cursor with no documents and no server-side state.
    pub(crate) fn exhausted(ns: Namespace, address: ServerAddress) -> Self {
        Self {
            info: CursorInformation {
                ns,
                address,
                id: 0,
                batch_size: None,
                limit: None,
                max_await_time: None,
                comment: None,
            },
            channel_source: None,
            session: None,
            first_batch: Some(Vec::new()),
            current_batch: None,
            count: 0,
            post_batch_resume_token: None,
            was_first_batch_empty: true,
            closed: false,
        }
    }

    /// Advances to the next batch, fetching it from the server if needed. Returns `false` once
    /// the cursor is exhausted; the current batch is then empty.
    ///
    /// A `getMore` that fails because the server no longer knows the cursor, or because the
    /// connection was lost, leaves the cursor dead so that no `killCursors` is sent for it.
    pub async fn move_next(&mut self, cancellation: &CancellationToken) -> Result<bool> {
        if self.closed {
            return Err(ErrorKind::Disposed.into());
        }
        if let Some(first_batch) = self.first_batch.take() {
            self.current_batch = Some(first_batch);
            return Ok(true);
        }
        if self.current_batch.is_none() {
            return Ok(false);
        }
        if self.info.id == 0 || self.limit_reached() {
            self.current_batch = None;
            let source = self.channel_source.take();
            let id = std::mem::take(&mut self.info.id);
            if let Some(source) = source.filter(|_| id != 0) {
                kill_cursor(source, self.info.ns.clone(), id, self.session.clone()).await;
            }
            return Ok(false);
        }

        let batch = self.get_more(cancellation).await?;
        self.current_batch = Some(batch);
        Ok(true)
    }

    /// Collects the remaining documents of the cursor.
    pub async fn try_collect(mut self, cancellation: &CancellationToken) -> Result<Vec<T>> {
        let mut documents = Vec::new();
        while self.move_next(cancellation).await? {
            documents.extend(self.take_current());
        }
        self.close().await;
        Ok(documents)
    }

    async fn get_more(&mut self, cancellation: &CancellationToken) -> Result<Vec<T>> {
        let source = self
            .channel_source
            .clone()
            .ok_or_else(|| Error::internal("live cursor has no channel source"))?;

        let mut op = GetMore::new(self.info.clone(), self.next_batch_size());
        let result = match execute_on_source(&mut op, &source, self.session.as_ref(), cancellation)
            .await
        {
            Ok(result) => result,
            Err(error) => {
                if error.is_cursor_not_found() || error.is_network_error() {
                    self.info.id = 0;
                    self.channel_source = None;
                }
                return Err(error);
            }
        };

        self.info.id = result.id;
        if result.id == 0 {
            self.channel_source = None;
        }
        self.post_batch_resume_token = result.post_batch_resume_token;
        let batch = deserialize_batch(result.batch)?;
        Ok(self.save_batch(batch))
    }
}

impl<T> Cursor<T> {
    /// Counts a batch towards the limit, truncating whatever goes past it.
    fn save_batch(&mut self, mut batch: Vec<T>) -> Vec<T> {
        if let Some(limit) = self.info.limit {
            batch.truncate(limit.saturating_sub(self.count));
        }
        self.count += batch.len();
        batch
    }

    fn limit_reached(&self) -> bool {
        self.info.limit.is_some_and(|limit| self.count >= limit)
    }

    /// The number of documents the next `getMore` asks for. Zero leaves it to the server.
    fn next_batch_size(&self) -> u32 {
        let mut batch_size = self.info.batch_size.unwrap_or(0);
        if let Some(limit) = self.info.limit {
            let remaining = u32::try_from(limit.saturating_sub(self.count)).unwrap_or(u32::MAX);
            if batch_size == 0 || batch_size > remaining {
                batch_size = remaining;
            }
        }
        batch_size
    }

    /// The batch the last successful [`move_next`](Cursor::move_next) advanced to.
    pub fn current(&self) -> &[T] {
        self.current_batch.as_deref().unwrap_or(&[])
    }

    /// Takes the documents of the current batch, leaving it empty.
    pub fn take_current(&mut self) -> Vec<T> {
        self.current_batch
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// The server's id for this cursor. Zero once the server holds no more results.
    pub fn id(&self) -> i64 {
        self.info.id
    }

    /// The namespace the cursor iterates.
    pub fn namespace(&self) -> &Namespace {
        &self.info.ns
    }

    /// The address of the server that owns the cursor.
    pub fn address(&self) -> &ServerAddress {
        &self.info.address
    }

    /// Whether the command that opened the cursor returned no documents.
    pub fn was_first_batch_empty(&self) -> bool {
        self.was_first_batch_empty
    }

    /// The resume token the server sent with the last batch, for change stream cursors.
    pub fn post_batch_resume_token(&self) -> Option<&ResumeToken> {
        self.post_batch_resume_token.as_ref()
    }

    /// Whether the cursor can produce no further batches.
    pub fn is_exhausted(&self) -> bool {
        self.first_batch.is_none() && (self.info.id == 0 || self.limit_reached())
    }

    /// Closes the cursor, killing it on the server if it is still alive there. Failures to kill
    /// the cursor are logged and otherwise ignored. Closing twice does nothing.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.first_batch = None;
        self.current_batch = None;
        let source = self.channel_source.take();
        let id = std::mem::take(&mut self.info.id);
        if let Some(source) = source.filter(|_| id != 0) {
            kill_cursor(source, self.info.ns.clone(), id, self.session.clone()).await;
        }
    }
}

impl<T> Drop for Cursor<T> {
    fn drop(&mut self) {
        if self.closed || self.info.id == 0 {
            return;
        }
        if let Some(source) = self.channel_source.take() {
            let ns = self.info.ns.clone();
            let id = self.info.id;
            let session = self.session.clone();
            runtime::spawn(async move { kill_cursor(source, ns, id, session).await });
        }
    }
}

fn deserialize_batch<T: DeserializeOwned>(batch: VecDeque<RawDocumentBuf>) -> Result<Vec<T>> {
    batch
        .iter()
        .map(|document| Ok(bson::from_slice(document.as_bytes())?))
        .collect()
}

/// Kills a cursor on the server that owns it. Errors and timeouts are only logged.
pub(crate) async fn kill_cursor(
    source: Arc<dyn ChannelSource>,
    ns: Namespace,
    cursor_id: i64,
    session: Option<Arc<dyn Session>>,
) {
    let mut op = KillCursors::new(ns, vec![cursor_id]);
    let cancellation = CancellationToken::new();
    let kill = execute_on_source(&mut op, &source, session.as_ref(), &cancellation);
    match tokio::time::timeout(KILL_CURSORS_TIMEOUT, kill).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            tracing::debug!(
                target: CURSOR_TRACING_EVENT_TARGET,
                cursorId = cursor_id,
                error = %error,
                "Failed to kill cursor"
            );
        }
        Err(_) => {
            tracing::debug!(
                target: CURSOR_TRACING_EVENT_TARGET,
                cursorId = cursor_id,
                "Timed out killing cursor"
            );
        }
    }
}
