use crate::{
    binding::ServerDescription,
    cmap::{Command, RawCommandResponse, StreamDescription},
    error::Result,
    BoxFuture,
};

/// An established connection to one server.
///
/// Implementations frame the command, send it, and return the reply without interpreting it;
/// `ok: 0` replies are turned into errors by the executor. A transport failure must be reported
/// as an [`ErrorKind::Io`](crate::error::ErrorKind::Io) error so it is classified as a network
/// error.
pub trait Channel: Send + Sync {
    /// The handshake description of this connection.
    fn description(&self) -> &StreamDescription;

    /// Sends a command and waits for its reply.
    fn send_command(&mut self, command: Command) -> BoxFuture<'_, Result<RawCommandResponse>>;
}

/// A handle to one selected server from which channels can be checked out.
///
/// Cursors keep their source alive so that every `getMore` and the final `killCursors` go to
/// the server that owns the cursor.
pub trait ChannelSource: Send + Sync {
    /// The server this source is bound to.
    fn server(&self) -> &ServerDescription;

    /// Checks out a channel to the server.
    fn get_channel(&self) -> BoxFuture<'_, Result<Box<dyn Channel>>>;
}
