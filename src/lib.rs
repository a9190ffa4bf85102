//! The operation execution core of a MongoDB driver.
//!
//! This crate turns high level operations (find, aggregate, bulk write, change streams) into
//! commands, runs them over channels that a connection pool hands out, and turns the replies
//! back into typed cursors and results. Three concerns carry most of the weight:
//!
//! - **Retries.** [`executor::execute_read`] and [`executor::execute_write`] run an operation
//!   once and, when the failure is transient and the operation, session and server all allow it,
//!   once more on a freshly selected server. Retried writes reuse their transaction number so the
//!   server applies them at most once.
//! - **Cursors.** A [`Cursor`] holds the first batch of a cursor-producing command and fetches
//!   further batches with `getMore` from the server owning the cursor, honoring a client-side
//!   limit and killing the server-side cursor when dropped early.
//! - **Bulk write batching.** [`operation::BulkWrite`] groups requests into runs and splits each
//!   run into commands that respect the server's count and size limits, reporting failures with
//!   the caller's original request indexes.
//!
//! Server selection, connection pooling, wire framing and authentication are not part of this
//! crate. They are reached through the [`binding::ReadBinding`], [`binding::WriteBinding`],
//! [`cmap::ChannelSource`] and [`cmap::Channel`] traits.
//!
//! # Feature flags
//!
//! | Feature | Description | Default |
//! |:--------|:------------|:--------|
//! | `sync`  | Blocking variants of every network-touching call, in [`sync`]. | no |
//!
//! # Logging
//!
//! Commands, retry decisions and cursor cleanup are reported as [`tracing`] events with the
//! targets `mongodb_opcore::command`, `mongodb_opcore::retry` and `mongodb_opcore::cursor`.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod options;

pub use ::bson;

pub mod batch;
pub mod binding;
mod bson_util;
pub mod change_stream;
pub mod cmap;
mod concern;
mod cursor;
pub mod error;
pub mod executor;
mod index;
mod namespace;
pub mod operation;
pub mod results;
pub(crate) mod runtime;
mod serde_util;
pub mod session;
#[cfg(any(feature = "sync", docsrs))]
#[cfg_attr(docsrs, doc(cfg(feature = "sync")))]
pub mod sync;
#[cfg(test)]
mod test;
mod trace;

pub use crate::{
    change_stream::ChangeStream,
    cursor::Cursor,
    executor::{execute_read, execute_write},
    index::IndexModel,
    namespace::Namespace,
};

pub use futures_util::future::BoxFuture;
