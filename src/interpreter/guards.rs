use tracing::warn;

use crate::diag::DiagnosticConsumer;
use crate::parser::{ParseResult, ParseResultTransaction};
use crate::transaction::{CompilationOptions, TransactionId};

use super::Interpreter;

/// Keeps a transaction open while alive. Everything processed meanwhile
/// nests under it and is loaded when it is popped or dropped.
pub struct PushTransaction<'a> {
    interp: &'a Interpreter,
    id: Option<TransactionId>,
}

impl<'a> PushTransaction<'a> {
    pub(super) fn new(interp: &'a Interpreter) -> Self {
        let opts = interp.default_compilation_options();
        let id = interp.parser.borrow_mut().begin_transaction(opts);
        PushTransaction {
            interp,
            id: Some(id),
        }
    }

    pub fn transaction(&self) -> Option<TransactionId> {
        self.id
    }

    /// End and commit the transaction now.
    pub fn pop(mut self) -> ParseResultTransaction {
        self.finish()
    }

    fn finish(&mut self) -> ParseResultTransaction {
        let Some(id) = self.id.take() else {
            return ParseResultTransaction {
                transaction: None,
                result: ParseResult::Failed,
            };
        };
        let prt = self.interp.end_and_commit(id);
        self.interp.dispatch_events();
        if let (Some(id), true) = (prt.transaction, prt.result != ParseResult::Failed) {
            if self.interp.run_static_init_on_transaction(id).is_error() {
                warn!(transaction = %id, "static initialization failed");
            }
        }
        prt
    }
}

impl Drop for PushTransaction<'_> {
    fn drop(&mut self) {
        if self.id.is_some() {
            let prt = self.finish();
            if prt.result == ParseResult::Failed {
                warn!("pushed transaction failed");
            }
        }
    }
}

/// Restores the previous diagnostic consumer when dropped.
pub struct DiagnosticConsumerGuard<'a> {
    interp: &'a Interpreter,
    previous: Option<Box<dyn DiagnosticConsumer>>,
}

impl<'a> DiagnosticConsumerGuard<'a> {
    pub(super) fn new(interp: &'a Interpreter, consumer: Box<dyn DiagnosticConsumer>) -> Self {
        let previous = interp
            .parser
            .borrow_mut()
            .diags_mut()
            .replace_consumer(consumer);
        DiagnosticConsumerGuard {
            interp,
            previous: Some(previous),
        }
    }
}

impl Drop for DiagnosticConsumerGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.interp
                .parser
                .borrow_mut()
                .diags_mut()
                .replace_consumer(previous);
        }
    }
}
