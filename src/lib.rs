//! # kiln - a transactional incremental compiler
//!
//! kiln compiles source fragments one at a time into a running process and
//! can take each of them back out again.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kiln::{CompilationResult, InvocationOptions, Interpreter, Value};
//!
//! let interp = Interpreter::with_minic(InvocationOptions::default()).unwrap();
//! interp.declare("int twice(int a) { return a * 2; }");
//! assert_eq!(interp.evaluate("twice(21)"), (CompilationResult::Success, Value::Int(42)));
//! interp.unload(1);
//! ```
//!
//! ## Architecture
//!
//! Every fragment goes through the same stages:
//!
//! 1. **Transaction** - records what the fragment declared
//! 2. **Collector** - routes the frontend's declarations into it, running
//!    the transformers
//! 3. **Parser** - drives the frontend and decides commit or rollback
//! 4. **Loader** - turns the generated module into machine code and owns it
//!    until the transaction is unloaded
//!
//! A failed fragment is rolled back without touching anything committed
//! before it. Unloading runs newest first and removes exactly what one
//! transaction added.

pub mod ast;
pub mod collector;
pub mod diag;
pub mod error;
pub mod frontend;
pub mod interpreter;
pub mod jit;
pub mod lir;
pub mod minic;
pub mod parser;
pub mod source;
pub mod transaction;
pub mod transform;

pub use error::{
    CodegenError, CollectorError, EmitError, InterpreterError, LoadError, TransactionError,
    UnloadError,
};
pub use interpreter::{CompilationResult, ExecutionResult, Interpreter, Value};
pub use parser::{IncrementalParser, ParseResult, ParseResultTransaction};
pub use transaction::{
    CompilationOptions, InvocationOptions, RuntimeOptions, State, Transaction, TransactionId,
};
