use crate::transaction::TransactionId;

/// Notifications about the session's transactions. Delivered after the
/// operation that caused them has finished, so a callback may call back
/// into the session.
pub trait InterpreterCallbacks {
    fn transaction_committed(&mut self, _id: TransactionId) {}

    fn transaction_rolled_back(&mut self, _id: TransactionId) {}

    fn transaction_unloaded(&mut self, _id: TransactionId) {}
}
