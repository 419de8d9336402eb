//! Shared test helpers for the kiln test suite.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use kiln::interpreter::InterpreterCallbacks;
use kiln::{CompilationResult, Interpreter, InvocationOptions, TransactionId, Value};

/// A minic session with code generation and default options.
pub fn session() -> Interpreter {
    Interpreter::with_minic(InvocationOptions::default()).expect("session")
}

/// A minic session that accepts redefinitions at the prompt.
pub fn shadowing_session() -> Interpreter {
    let opts = InvocationOptions {
        allow_redefinition: true,
        ..InvocationOptions::default()
    };
    Interpreter::with_minic(opts).expect("session")
}

/// Declare `input`, failing the test if it does not compile.
pub fn declare_ok(interp: &Interpreter, input: &str) {
    assert_eq!(
        interp.declare(input),
        CompilationResult::Success,
        "failed to declare: {}",
        input
    );
}

/// Evaluate `input` and return its integer value.
pub fn eval_int(interp: &Interpreter, input: &str) -> Option<i64> {
    match interp.evaluate(input) {
        (CompilationResult::Success, Value::Int(n)) => Some(n),
        _ => None,
    }
}

/// Transaction lifecycle events, in the order they were delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Committed(TransactionId),
    RolledBack(TransactionId),
    Unloaded(TransactionId),
}

/// Callbacks that append every event to a shared log.
pub struct Recorder(pub Rc<RefCell<Vec<Event>>>);

impl InterpreterCallbacks for Recorder {
    fn transaction_committed(&mut self, id: TransactionId) {
        self.0.borrow_mut().push(Event::Committed(id));
    }

    fn transaction_rolled_back(&mut self, id: TransactionId) {
        self.0.borrow_mut().push(Event::RolledBack(id));
    }

    fn transaction_unloaded(&mut self, id: TransactionId) {
        self.0.borrow_mut().push(Event::Unloaded(id));
    }
}

/// Install a `Recorder` on `interp` and return its log.
pub fn record_events(interp: &Interpreter) -> Rc<RefCell<Vec<Event>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    interp.set_callbacks(Some(Box::new(Recorder(log.clone()))));
    log
}
