//! Incremental loader
//!
//! Turns a transaction's `CodeModule` into callable machine code with
//! Cranelift, and undoes that again on unload.
//!
//! ## Architecture
//!
//! ```text
//! CodeModule -> weak reuse policy -> import resolution -> ModuleCompiler
//!            -> Cranelift IR -> native code -> LoadedCode (one per handle)
//! ```
//!
//! Every transaction gets its own `JITModule`, so dropping one transaction's
//! code frees exactly its memory. Cross-module references are bound to
//! absolute addresses at load time: a module's imports must all resolve
//! before it is compiled, from the session symbol table, from other
//! sessions' generators, or from the host process.
//!
//! ## Calling Convention
//!
//! Every generated function takes and returns `i64` in the host's C
//! calling convention:
//!
//! ```ignore
//! type GeneratedFn = unsafe extern "C" fn(i64, ...) -> i64;
//! ```

mod code;
mod compiler;
mod host;
mod loader;
mod policy;
mod translate;

pub use code::{call_function, MAX_CALL_ARGS};
pub use loader::{ExecutionGuard, ImportPin, IncrementalJit, SymbolGenerator};
pub use policy::{HostLookupPolicy, LoaderConfig};

use std::fmt;

use thiserror::Error;

/// Backend failure while building machine code.
#[derive(Debug, Clone, Error)]
pub enum JitError {
    /// Native target could not be configured
    #[error("JIT: cannot configure native target: {0}")]
    Isa(String),
    /// Cranelift compilation failed
    #[error("JIT compilation failed: {0}")]
    CompilationFailed(String),
    /// Invalid LIR structure
    #[error("JIT: invalid LIR: {0}")]
    InvalidLir(String),
    #[error("JIT: cannot call a function with {0} arguments")]
    TooManyArguments(usize),
}

/// Loader-side ownership token for one transaction's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceHandle(u64);

impl ResourceHandle {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rt{}", self.0)
    }
}
