//! Declaration transformers
//!
//! The collector runs every freshly parsed top-level declaration through
//! two chains: transaction transformers see every declaration, wrapper
//! transformers additionally see synthesized wrapper functions. A
//! transformer may rewrite the declaration in place, replace it, suppress
//! it, or reject it as invalid. New sibling declarations go through
//! `TransformContext::emit`, which queues them back into the collector
//! after the current one, bypassing the chains.

mod extract;
mod shadow;
mod value;

pub use extract::DeclExtractor;
pub use shadow::{shadow_namespace, DefinitionShadower};
pub use value::ValueExtractionSynthesizer;

use crate::ast::{DeclId, DeclStore};
use crate::diag::DiagnosticsEngine;
use crate::transaction::{CompilationOptions, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformResult {
    Unchanged,
    /// Append this declaration instead.
    Replaced(DeclId),
    /// Leave the declaration out of the transaction.
    Suppressed,
    /// The declaration is unusable and is dropped.
    Invalid,
}

pub trait Transformer {
    fn name(&self) -> &'static str;

    fn transform(&mut self, decl: DeclId, cx: &mut TransformContext<'_>) -> TransformResult;
}

/// What a transformer may touch while it runs.
pub struct TransformContext<'a> {
    decls: &'a mut DeclStore,
    diags: &'a mut DiagnosticsEngine,
    transaction: &'a mut Transaction,
    emitted: &'a mut Vec<DeclId>,
}

impl<'a> TransformContext<'a> {
    pub(crate) fn new(
        decls: &'a mut DeclStore,
        diags: &'a mut DiagnosticsEngine,
        transaction: &'a mut Transaction,
        emitted: &'a mut Vec<DeclId>,
    ) -> Self {
        TransformContext {
            decls,
            diags,
            transaction,
            emitted,
        }
    }

    pub fn decls(&self) -> &DeclStore {
        self.decls
    }

    pub fn decls_mut(&mut self) -> &mut DeclStore {
        self.decls
    }

    pub fn diags(&mut self) -> &mut DiagnosticsEngine {
        self.diags
    }

    pub fn transaction(&self) -> &Transaction {
        self.transaction
    }

    pub fn options(&self) -> &CompilationOptions {
        self.transaction.options()
    }

    pub fn set_shadow_namespace(&mut self, ns: String) {
        self.transaction.set_shadow_namespace(ns);
    }

    /// Queue a new declaration for the current transaction. It is appended
    /// after the declaration being transformed and is not transformed
    /// itself.
    pub fn emit(&mut self, decl: DeclId) {
        self.emitted.push(decl);
    }
}
