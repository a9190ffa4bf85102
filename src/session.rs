//! Logical sessions as seen by the execution core.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::bson::{doc, spec::BinarySubtype, Binary, Document};

/// The parts of a logical session the executors need: its id, whether a multi-statement
/// transaction is in progress, and the transaction number counter used by retryable writes.
pub trait Session: Send + Sync {
    /// The `lsid` attached to commands run in this session.
    fn id(&self) -> &Document;

    /// Whether the session is inside a multi-statement transaction. Retries are owned by the
    /// transaction layer in that case.
    fn is_in_transaction(&self) -> bool;

    /// Increments and returns the transaction number. The returned value is attached to the
    /// first attempt of a retryable write and reused unchanged on its retry.
    fn advance_transaction_number(&self) -> i64;
}

/// A server session identified by a random UUID.
#[derive(Debug)]
pub struct ClientSession {
    id: Document,
    txn_number: AtomicI64,
    in_transaction: AtomicBool,
}

impl ClientSession {
    /// Creates a session with a freshly generated `lsid`.
    pub fn new() -> Self {
        let uuid = uuid::Uuid::new_v4();
        let binary = Binary {
            subtype: BinarySubtype::Uuid,
            bytes: uuid.as_bytes().to_vec(),
        };
        Self {
            id: doc! { "id": binary },
            txn_number: AtomicI64::new(0),
            in_transaction: AtomicBool::new(false),
        }
    }

    /// Marks the session as being inside a multi-statement transaction.
    pub fn start_transaction(&self) {
        self.in_transaction.store(true, Ordering::SeqCst);
    }

    /// Marks the current transaction as finished.
    pub fn end_transaction(&self) {
        self.in_transaction.store(false, Ordering::SeqCst);
    }

    /// The last transaction number handed out.
    pub fn txn_number(&self) -> i64 {
        self.txn_number.load(Ordering::SeqCst)
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for ClientSession {
    fn id(&self) -> &Document {
        &self.id
    }

    fn is_in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    fn advance_transaction_number(&self) -> i64 {
        self.txn_number.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod test {
    use super::{ClientSession, Session};
    use crate::bson::{spec::BinarySubtype, Bson};

    #[test]
    fn transaction_numbers_increase() {
        let session = ClientSession::new();
        assert_eq!(session.txn_number(), 0);
        assert_eq!(session.advance_transaction_number(), 1);
        assert_eq!(session.advance_transaction_number(), 2);
        assert_eq!(session.txn_number(), 2);
    }

    #[test]
    fn sessions_have_distinct_ids() {
        let a = ClientSession::new();
        let b = ClientSession::new();
        match a.id().get("id") {
            Some(Bson::Binary(binary)) => {
                assert_eq!(binary.subtype, BinarySubtype::Uuid);
                assert_eq!(binary.bytes.len(), 16);
            }
            other => panic!("expected a UUID lsid, got {other:?}"),
        }
        assert_ne!(a.id(), b.id());
    }
}
