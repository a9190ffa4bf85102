//! Bindings resolve a logical read or write to a concrete server. Topology monitoring and server
//! selection live behind these traits.

use std::{fmt, sync::Arc};

use serde::{Serialize, Serializer};

use crate::{bson::doc, cmap::ChannelSource, error::Result, session::Session, BoxFuture};

/// The address of a server.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// The hostname or IP address.
    pub host: String,

    /// The port, if not the default of 27017.
    pub port: Option<u16>,
}

impl ServerAddress {
    /// Creates an address from a host and port.
    pub fn new(host: impl Into<String>, port: impl Into<Option<u16>>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", None)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}:{}", self.host, self.port.unwrap_or(27017))
    }
}

/// The role a server plays in its deployment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServerType {
    /// A single, non-replicated server.
    Standalone,

    /// A router to a sharded cluster.
    Mongos,

    /// The primary of a replica set.
    RsPrimary,

    /// A secondary of a replica set.
    RsSecondary,

    /// A replica set arbiter.
    RsArbiter,

    /// A hidden, starting up or recovering replica set member.
    RsOther,

    /// A member not yet configured into a replica set.
    RsGhost,

    /// A load balancer in front of a deployment.
    LoadBalancer,

    /// A server whose type has not been determined.
    #[default]
    Unknown,
}

/// What the binding knew about a server when it selected it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerDescription {
    /// The server's address.
    pub address: ServerAddress,

    /// The server's type.
    pub server_type: ServerType,

    /// The maximum wire version the server reported.
    pub max_wire_version: Option<i32>,
}

/// The read preference attached to read commands.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub enum ReadPreference {
    /// Only the primary.
    #[default]
    Primary,

    /// The primary if available, otherwise a secondary.
    PrimaryPreferred,

    /// Only secondaries.
    Secondary,

    /// A secondary if available, otherwise the primary.
    SecondaryPreferred,

    /// The member with the lowest latency.
    Nearest,
}

impl ReadPreference {
    fn mode(&self) -> &'static str {
        match self {
            ReadPreference::Primary => "primary",
            ReadPreference::PrimaryPreferred => "primaryPreferred",
            ReadPreference::Secondary => "secondary",
            ReadPreference::SecondaryPreferred => "secondaryPreferred",
            ReadPreference::Nearest => "nearest",
        }
    }
}

impl Serialize for ReadPreference {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        doc! { "mode": self.mode() }.serialize(serializer)
    }
}

/// Resolves reads to a channel source according to a read preference.
pub trait ReadBinding: Send + Sync {
    /// The read preference that selected the server.
    fn read_preference(&self) -> &ReadPreference;

    /// The session reads run in, if any.
    fn session(&self) -> Option<Arc<dyn Session>>;

    /// Selects a server for a read. Called once per attempt.
    fn get_read_channel_source(&self) -> BoxFuture<'_, Result<Arc<dyn ChannelSource>>>;
}

/// Resolves writes to a channel source for a writable server.
pub trait WriteBinding: Send + Sync {
    /// The session writes run in, if any. Retryable writes require one.
    fn session(&self) -> Option<Arc<dyn Session>>;

    /// Selects a writable server. Called once per attempt.
    fn get_write_channel_source(&self) -> BoxFuture<'_, Result<Arc<dyn ChannelSource>>>;
}
