//! Error types shared across the engine
//!
//! Each layer has its own error enum; the orchestrator and the interpreter
//! turn them into diagnostics or result codes at the boundary.

use std::path::PathBuf;

use thiserror::Error;

use crate::ast::DeclId;
use crate::jit::JitError;
use crate::transaction::{State, TransactionId};

/// Misuse of the transaction state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("transaction {id} cannot accept declarations in state {state}")]
    NotCollecting { id: TransactionId, state: State },

    #[error("transaction {id} is still collecting, its last declaration is not final")]
    NotCompleted { id: TransactionId },

    #[error("transaction {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TransactionId,
        from: State,
        to: State,
    },

    #[error("compilation options of transaction {0} are frozen once collecting ends")]
    OptionsFrozen(TransactionId),

    #[error("cannot append an empty declaration group")]
    EmptyGroup,

    #[error("unknown transaction {0}")]
    Unknown(TransactionId),

    #[error("transaction {child} already has parent {parent}")]
    AlreadyNested {
        child: TransactionId,
        parent: TransactionId,
    },

    #[error("nesting {child} under {parent} would create a cycle")]
    Cycle {
        child: TransactionId,
        parent: TransactionId,
    },

    #[error("transaction {parent} still owns non-terminal nested transaction {child}")]
    NonTerminalChild {
        parent: TransactionId,
        child: TransactionId,
    },
}

/// Failure to route a declaration batch into a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectorError {
    #[error("declarations arrived while no transaction is open")]
    NoTransaction,

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

/// Failure to turn collected declarations into a code module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    #[error("declaration {0:?} was forgotten before code generation")]
    StaleDeclaration(DeclId),

    #[error("'{name}': {message}")]
    Unsupported { name: String, message: String },
}

/// Failure of the loader to add or remove a module.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("unresolved symbol(s): {}", .0.join(", "))]
    UnresolvedSymbols(Vec<String>),

    #[error("symbol '{0}' is already defined")]
    DuplicateDefinition(String),

    #[error("transaction {transaction} is in use: {reason}")]
    InUse {
        transaction: TransactionId,
        reason: String,
    },

    #[error("transaction {0} already has loaded code")]
    AlreadyLoaded(TransactionId),

    #[error(transparent)]
    Jit(#[from] JitError),
}

/// Failure to generate or load code for an already committed transaction.
#[derive(Debug, Clone, Error)]
pub enum EmitError {
    #[error("transaction {0} is not committed")]
    NotCommitted(TransactionId),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Failure to unload a committed transaction.
#[derive(Debug, Clone, Error)]
pub enum UnloadError {
    #[error("unknown transaction {0}")]
    Unknown(TransactionId),

    #[error("transaction {0} is not committed")]
    NotCommitted(TransactionId),

    #[error("transaction {id} is nested in {parent}, unload {parent} instead")]
    Nested {
        id: TransactionId,
        parent: TransactionId,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

/// Failure to bring up a session.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error(transparent)]
    Jit(#[from] JitError),

    #[error("cannot load library {path}: {message}")]
    Library { path: PathBuf, message: String },

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
