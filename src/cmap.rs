//! Connection-level types shared with the pool implementation: the command model, raw replies,
//! and the handshake-derived description of a connection.

mod channel;
#[cfg(test)]
mod test;

use std::time::Duration;

use serde::de::DeserializeOwned;

pub use self::channel::{Channel, ChannelSource};
use crate::{
    binding::{ReadPreference, ServerAddress, ServerType},
    bson::{self, Document, RawDocument, RawDocumentBuf},
    error::{Error, ErrorKind, Result},
    session::Session,
};

/// Commands whose bodies and replies must never be logged.
pub(crate) const REDACTED_COMMANDS: [&str; 7] = [
    "authenticate",
    "saslstart",
    "saslcontinue",
    "getnonce",
    "createuser",
    "updateuser",
    "copydbsaslstart",
];

/// A database command ready to be framed and sent by a [`Channel`].
///
/// The body holds the command-specific fields; the session, transaction number and read
/// preference are kept separately so a retry can reuse or replace them.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Command {
    /// The command name, which is also the first key of `body`.
    pub name: String,

    /// The database the command runs against.
    pub target_db: String,

    /// The command document without `$db` or session fields.
    pub body: RawDocumentBuf,

    /// The logical session id.
    pub lsid: Option<Document>,

    /// The transaction number of a retryable write.
    pub txn_number: Option<i64>,

    /// The read preference to forward to mongos.
    pub read_preference: Option<ReadPreference>,
}

impl Command {
    pub(crate) fn new(
        name: impl ToString,
        target_db: impl ToString,
        body: RawDocumentBuf,
    ) -> Self {
        Self {
            name: name.to_string(),
            target_db: target_db.to_string(),
            body,
            lsid: None,
            txn_number: None,
            read_preference: None,
        }
    }

    pub(crate) fn set_session(&mut self, session: &dyn Session) {
        self.lsid = Some(session.id().clone());
    }

    pub(crate) fn set_txn_number(&mut self, txn_number: i64) {
        self.txn_number = Some(txn_number);
    }

    pub(crate) fn set_read_preference(&mut self, read_preference: ReadPreference) {
        self.read_preference = Some(read_preference);
    }

    /// Whether the body of this command or its reply may contain credentials.
    pub fn should_redact(&self) -> bool {
        REDACTED_COMMANDS.contains(&self.name.to_lowercase().as_str())
    }

    /// The complete document to put on the wire.
    pub fn to_document(&self) -> Result<Document> {
        let mut document = self.body.to_document()?;
        document.insert("$db", self.target_db.as_str());
        if let Some(ref lsid) = self.lsid {
            document.insert("lsid", lsid.clone());
        }
        if let Some(txn_number) = self.txn_number {
            document.insert("txnNumber", txn_number);
        }
        if let Some(ref read_preference) = self.read_preference {
            document.insert("$readPreference", bson::to_bson(read_preference)?);
        }
        Ok(document)
    }
}

/// A raw reply to a [`Command`].
#[derive(Debug, Clone)]
pub struct RawCommandResponse {
    source: ServerAddress,
    raw: RawDocumentBuf,
}

impl RawCommandResponse {
    /// Wraps a reply received from `source`.
    pub fn new(source: ServerAddress, raw: RawDocumentBuf) -> Self {
        Self { source, raw }
    }

    /// Builds a reply from a parsed document.
    pub fn from_document(source: ServerAddress, document: &Document) -> Result<Self> {
        Ok(Self {
            source,
            raw: RawDocumentBuf::from_document(document)?,
        })
    }

    pub(crate) fn body<T: DeserializeOwned>(&self) -> Result<T> {
        bson::from_slice(self.raw.as_bytes()).map_err(|e| {
            Error::from(ErrorKind::InvalidResponse {
                message: format!("{e}"),
            })
        })
    }

    /// The reply document.
    pub fn raw_body(&self) -> &RawDocument {
        &self.raw
    }

    /// The address of the server that sent this response.
    pub fn source_address(&self) -> &ServerAddress {
        &self.source
    }
}

/// Limits and capabilities a server reported during the connection handshake.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct StreamDescription {
    /// The address of the server.
    pub server_address: ServerAddress,

    /// The type of the server when the handshake occurred.
    pub initial_server_type: ServerType,

    /// The maximum wire version that the server understands.
    pub max_wire_version: Option<i32>,

    /// How long sessions stay alive on the server without use. Absent when the deployment does
    /// not support sessions.
    pub logical_session_timeout: Option<Duration>,

    /// The maximum size of a single document.
    pub max_bson_object_size: i64,

    /// The maximum number of writes in one `insert`, `update` or `delete` command.
    pub max_write_batch_size: i64,

    /// The maximum size of a wire message.
    pub max_message_size_bytes: i32,
}

impl Default for StreamDescription {
    fn default() -> Self {
        Self {
            server_address: ServerAddress::default(),
            initial_server_type: ServerType::Unknown,
            max_wire_version: None,
            logical_session_timeout: None,
            max_bson_object_size: 16 * 1024 * 1024,
            max_write_batch_size: 100_000,
            max_message_size_bytes: 48_000_000,
        }
    }
}

impl StreamDescription {
    /// A description of a replica set primary with the given wire version and default limits.
    pub fn new(server_address: ServerAddress, max_wire_version: i32) -> Self {
        Self {
            server_address,
            initial_server_type: ServerType::RsPrimary,
            max_wire_version: Some(max_wire_version),
            logical_session_timeout: Some(Duration::from_secs(30 * 60)),
            ..Default::default()
        }
    }

    /// Whether retryable writes may be used on this connection: the deployment must support
    /// sessions, must not be a standalone, and must be 3.6 or newer.
    pub(crate) fn supports_retryable_writes(&self) -> bool {
        self.initial_server_type != ServerType::Standalone
            && self.logical_session_timeout.is_some()
            && self.max_wire_version.is_some_and(|version| version >= 6)
    }

    /// Whether retryable reads may be used on this connection.
    pub(crate) fn supports_retryable_reads(&self) -> bool {
        self.max_wire_version.is_some_and(|version| version >= 6)
    }

    /// Gets a description of a stream for a 4.2 connection.
    #[cfg(test)]
    pub(crate) fn new_testing() -> Self {
        Self::with_wire_version(8)
    }

    #[cfg(test)]
    pub(crate) fn with_wire_version(max_wire_version: i32) -> Self {
        Self::new(ServerAddress::default(), max_wire_version)
    }
}
