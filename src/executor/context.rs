use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    binding::{ReadBinding, ReadPreference, WriteBinding},
    cmap::{Channel, ChannelSource, StreamDescription},
    error::{Error, Result},
    session::Session,
    BoxFuture,
};

/// A channel source and one channel checked out of it.
pub(crate) struct BoundChannel {
    pub(crate) source: Arc<dyn ChannelSource>,
    pub(crate) channel: Box<dyn Channel>,
}

impl BoundChannel {
    async fn acquire(
        source: BoxFuture<'_, Result<Arc<dyn ChannelSource>>>,
        cancellation: &CancellationToken,
    ) -> Result<Self> {
        if cancellation.is_cancelled() {
            return Err(Error::cancelled());
        }
        let source = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(Error::cancelled()),
            source = source => source?,
        };
        let channel = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(Error::cancelled()),
            channel = source.get_channel() => channel?,
        };
        Ok(Self { source, channel })
    }

    pub(crate) fn description(&self) -> &StreamDescription {
        self.channel.description()
    }
}

/// The state of one logical read: its binding, the channel currently in use, and whether the
/// caller asked for retries.
///
/// The channel is replaced at most once, when a retryable failure leads to a second attempt, and
/// is released when the context is dropped.
pub struct RetryableReadContext<'a> {
    binding: &'a dyn ReadBinding,
    retry_requested: bool,
    session: Option<Arc<dyn Session>>,
    pub(crate) bound: BoundChannel,
}

impl<'a> RetryableReadContext<'a> {
    /// Selects a server through `binding` and checks out a channel to it.
    pub async fn create(
        binding: &'a dyn ReadBinding,
        retry_requested: bool,
        cancellation: &CancellationToken,
    ) -> Result<Self> {
        let bound = BoundChannel::acquire(binding.get_read_channel_source(), cancellation).await?;
        Ok(Self {
            binding,
            retry_requested,
            session: binding.session(),
            bound,
        })
    }

    /// Whether the caller asked for a failed read to be retried.
    pub fn retry_requested(&self) -> bool {
        self.retry_requested
    }

    /// The description of the channel currently bound.
    pub fn description(&self) -> &StreamDescription {
        self.bound.description()
    }

    /// The source of the channel currently bound.
    pub fn channel_source(&self) -> &Arc<dyn ChannelSource> {
        &self.bound.source
    }

    pub(crate) fn session(&self) -> Option<&Arc<dyn Session>> {
        self.session.as_ref()
    }

    pub(crate) fn read_preference(&self) -> &ReadPreference {
        self.binding.read_preference()
    }

    /// Selects a server again and binds a new channel. On failure the old channel stays bound.
    pub(crate) async fn rebind(&mut self, cancellation: &CancellationToken) -> Result<()> {
        let binding = self.binding;
        self.bound =
            BoundChannel::acquire(binding.get_read_channel_source(), cancellation).await?;
        Ok(())
    }
}

/// The state of one logical write, or of every batch of a bulk write: its binding, the channel
/// currently in use, and whether the caller asked for retries.
pub struct RetryableWriteContext<'a> {
    binding: &'a dyn WriteBinding,
    retry_requested: bool,
    session: Option<Arc<dyn Session>>,
    pub(crate) bound: BoundChannel,
}

impl<'a> RetryableWriteContext<'a> {
    /// Selects a writable server through `binding` and checks out a channel to it.
    pub async fn create(
        binding: &'a dyn WriteBinding,
        retry_requested: bool,
        cancellation: &CancellationToken,
    ) -> Result<Self> {
        let bound =
            BoundChannel::acquire(binding.get_write_channel_source(), cancellation).await?;
        Ok(Self {
            binding,
            retry_requested,
            session: binding.session(),
            bound,
        })
    }

    /// Whether the caller asked for a failed write to be retried.
    pub fn retry_requested(&self) -> bool {
        self.retry_requested
    }

    /// The description of the channel currently bound.
    pub fn description(&self) -> &StreamDescription {
        self.bound.description()
    }

    /// The source of the channel currently bound.
    pub fn channel_source(&self) -> &Arc<dyn ChannelSource> {
        &self.bound.source
    }

    pub(crate) fn session(&self) -> Option<&Arc<dyn Session>> {
        self.session.as_ref()
    }

    /// Selects a writable server again and binds a new channel. On failure the old channel stays
    /// bound.
    pub(crate) async fn rebind(&mut self, cancellation: &CancellationToken) -> Result<()> {
        let binding = self.binding;
        self.bound =
            BoundChannel::acquire(binding.get_write_channel_source(), cancellation).await?;
        Ok(())
    }
}
