//! Incremental parser
//!
//! Drives the frontend one fragment at a time and manages transaction
//! boundaries around it:
//!
//! ```text
//! begin_transaction -> Frontend::parse -> end_transaction -> commit_transaction
//!                                                              |-> codegen
//!                                                              |-> loader
//!                                                              `-> history
//! ```
//!
//! A failed fragment is rolled back on its own: its declarations are
//! forgotten, its macro directives reverted, and everything committed
//! before it stays as it was.

use std::fmt::{self, Write};
use std::iter;

use tracing::{debug, warn};

use crate::ast::DeclStore;
use crate::collector::{DeclCollector, DeclSink};
use crate::diag::DiagnosticsEngine;
use crate::error::{CodegenError, EmitError, LoadError, TransactionError, UnloadError};
use crate::frontend::{CodeGenerator, Frontend, FrontendContext, ParseRequest};
use crate::jit::IncrementalJit;
use crate::lir::CodeModule;
use crate::source::{SourceLocation, SourceManager};
use crate::transaction::{
    CompilationOptions, IssuedDiags, MacroDirective, State, TransactionArena, TransactionId,
};
use crate::transform::{DeclExtractor, DefinitionShadower, ValueExtractionSynthesizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    Success,
    SuccessWithWarnings,
    Failed,
}

/// Outcome of a fragment plus the transaction it produced. The transaction
/// is `None` when nothing survived: a rolled back fragment, or an empty
/// nested transaction that was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseResultTransaction {
    pub transaction: Option<TransactionId>,
    pub result: ParseResult,
}

/// Lifecycle notifications, drained by the session after each operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserEvent {
    Committed(TransactionId),
    RolledBack(TransactionId),
    Unloaded(TransactionId),
}

pub struct IncrementalParser {
    frontend: Box<dyn Frontend>,
    codegen: Option<Box<dyn CodeGenerator>>,
    collector: DeclCollector,
    arena: TransactionArena,
    decls: DeclStore,
    diags: DiagnosticsEngine,
    sources: SourceManager,
    /// Committed top-level transactions in commit order.
    history: Vec<TransactionId>,
    module_no: usize,
    events: Vec<ParserEvent>,
}

impl IncrementalParser {
    pub fn new(frontend: Box<dyn Frontend>, codegen: Option<Box<dyn CodeGenerator>>) -> Self {
        IncrementalParser {
            frontend,
            codegen,
            collector: DeclCollector::new(),
            arena: TransactionArena::new(),
            decls: DeclStore::new(),
            diags: DiagnosticsEngine::new(),
            sources: SourceManager::new(),
            history: Vec::new(),
            module_no: 0,
            events: Vec::new(),
        }
    }

    pub fn has_code_generator(&self) -> bool {
        self.codegen.is_some()
    }

    /// Install the standard transformer chains.
    pub fn set_transformers(&mut self) {
        self.collector.setup(
            vec![Box::new(DefinitionShadower)],
            vec![Box::new(DeclExtractor), Box::new(ValueExtractionSynthesizer)],
        );
    }

    /// Chain a consumer that sees every finalized batch.
    pub fn set_chained_consumer(&mut self, sink: Option<Box<dyn DeclSink>>) {
        self.collector.set_downstream(sink);
    }

    pub fn decls(&self) -> &DeclStore {
        &self.decls
    }

    pub fn decls_mut(&mut self) -> &mut DeclStore {
        &mut self.decls
    }

    pub fn diags(&self) -> &DiagnosticsEngine {
        &self.diags
    }

    pub fn diags_mut(&mut self) -> &mut DiagnosticsEngine {
        &mut self.diags
    }

    pub fn sources(&self) -> &SourceManager {
        &self.sources
    }

    pub fn arena(&self) -> &TransactionArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut TransactionArena {
        &mut self.arena
    }

    pub fn should_wrap(&self, input: &str) -> bool {
        self.frontend.should_wrap(input)
    }

    /// A location no fragment will ever occupy.
    pub fn next_available_unique_source_loc(&mut self) -> SourceLocation {
        self.sources.next_unique_location()
    }

    /// Open a transaction and make it current. It nests under the current
    /// transaction if that one has not finished yet.
    pub fn begin_transaction(&mut self, opts: CompilationOptions) -> TransactionId {
        let id = self.arena.create(opts);
        if let Some(parent) = self.collector.transaction() {
            let open = self
                .arena
                .get(parent)
                .is_some_and(|t| !t.state().is_terminal());
            if open {
                if let Err(e) = self.arena.add_nested(parent, id) {
                    warn!(error = %e, "cannot nest transaction");
                }
            }
        }
        self.collector.set_transaction(Some(id));
        debug!(transaction = %id, nested = self.arena.get(id).is_some_and(|t| t.is_nested()), "begin transaction");
        id
    }

    /// Stop collecting into `id` and classify the outcome from the
    /// diagnostics issued since the last commit.
    pub fn end_transaction(
        &mut self,
        id: TransactionId,
    ) -> Result<ParseResultTransaction, TransactionError> {
        let t = self.arena.require_mut(id)?;
        t.set_state(State::Completed)?;
        let ignore_warnings = t.options().ignore_prompt_diags && t.wrapper().is_some();
        let parent = t.parent();
        let empty = t.is_empty();

        let issued = if self.diags.num_errors() > 0 {
            IssuedDiags::Errors
        } else if self.diags.num_warnings() > 0 && !ignore_warnings {
            IssuedDiags::Warnings
        } else {
            IssuedDiags::None
        };
        self.arena.set_issued_diags(id, issued);
        self.collector.set_transaction(parent);

        let result = match self.arena.issued_diags(id) {
            IssuedDiags::None => ParseResult::Success,
            IssuedDiags::Warnings => ParseResult::SuccessWithWarnings,
            IssuedDiags::Errors => ParseResult::Failed,
        };
        debug!(transaction = %id, ?result, "end transaction");

        if parent.is_some() && empty {
            // Nothing to keep: give it back to the pool.
            self.arena.require_mut(id)?.set_state(State::RolledBack)?;
            self.arena.release(id)?;
            return Ok(ParseResultTransaction {
                transaction: None,
                result,
            });
        }
        Ok(ParseResultTransaction {
            transaction: Some(id),
            result,
        })
    }

    /// Generate and load code for a completed transaction, or roll it back
    /// if it failed. On return `prt` reflects the final outcome.
    pub fn commit_transaction(
        &mut self,
        prt: &mut ParseResultTransaction,
        mut loader: Option<&mut IncrementalJit>,
    ) {
        let Some(id) = prt.transaction else {
            return;
        };
        let Some(t) = self.arena.get(id) else {
            prt.transaction = None;
            return;
        };
        let top_level = !t.is_nested();
        let opts = *t.options();

        if prt.result == ParseResult::Failed || self.arena.issued_diags(id) == IssuedDiags::Errors {
            self.fail(prt, id, loader, top_level);
            return;
        }

        let children: Vec<TransactionId> = t.nested().to_vec();
        for child in children {
            if self.arena.get(child).is_some_and(|c| c.state() == State::Completed) {
                let mut child_prt = ParseResultTransaction {
                    transaction: Some(child),
                    result: prt.result,
                };
                self.commit_transaction(&mut child_prt, loader.as_deref_mut());
            }
        }

        if top_level {
            self.perform_pending_instantiations(id, opts, loader.as_deref_mut());
        }

        // A nested transaction that failed above escalated to this one.
        if self.arena.issued_diags(id) == IssuedDiags::Errors {
            self.fail(prt, id, loader, top_level);
            return;
        }

        if opts.code_generation {
            if let Err(e) = self.codegen_transaction(id) {
                self.diags.error(SourceLocation::INVALID, e.to_string());
                self.arena.set_issued_diags(id, IssuedDiags::Errors);
                self.fail(prt, id, loader, top_level);
                return;
            }
        }

        if top_level {
            if let Some(loader) = loader.as_deref_mut() {
                if let Err(e) = self.load_transaction(id, opts.opt_level, loader) {
                    self.diags.error(SourceLocation::INVALID, e.to_string());
                    self.arena.set_issued_diags(id, IssuedDiags::Errors);
                    self.fail(prt, id, Some(loader), top_level);
                    return;
                }
            }
        }

        if let Some(t) = self.arena.get_mut(id) {
            if let Err(e) = t.set_state(State::Committed) {
                warn!(error = %e, "cannot commit transaction");
                return;
            }
        }
        // Nested commits are only final once their root is.
        if top_level {
            self.add_transaction(id);
            self.diags.reset();
            for child in self.arena.descendants(id) {
                if self.arena.get(child).is_some_and(|c| c.is_committed()) {
                    self.events.push(ParserEvent::Committed(child));
                }
            }
            self.events.push(ParserEvent::Committed(id));
        }
        debug!(transaction = %id, "committed transaction");
    }

    fn fail(
        &mut self,
        prt: &mut ParseResultTransaction,
        id: TransactionId,
        loader: Option<&mut IncrementalJit>,
        top_level: bool,
    ) {
        if let Err(e) = self.rollback_transaction(id, loader) {
            warn!(transaction = %id, error = %e, "rollback failed");
        }
        if top_level {
            self.diags.reset();
        }
        prt.transaction = None;
        prt.result = ParseResult::Failed;
    }

    /// Declarations the frontend deferred to the end of the unit, collected
    /// in a transaction nested under `id`.
    fn perform_pending_instantiations(
        &mut self,
        id: TransactionId,
        opts: CompilationOptions,
        loader: Option<&mut IncrementalJit>,
    ) {
        let saved = self.collector.transaction();
        self.collector.set_transaction(Some(id));
        let nested = self.begin_transaction(opts);
        {
            let mut cx = FrontendContext::new(
                &mut self.collector,
                &mut self.arena,
                &mut self.decls,
                &mut self.diags,
                &mut self.sources,
            );
            self.frontend.perform_pending_instantiations(&mut cx);
        }
        match self.end_transaction(nested) {
            Ok(mut nested_prt) => self.commit_transaction(&mut nested_prt, loader),
            Err(e) => warn!(error = %e, "pending instantiations"),
        }
        self.collector.set_transaction(saved);
    }

    /// Run the code generator over batches not generated yet.
    fn codegen_transaction(&mut self, id: TransactionId) -> Result<(), CodegenError> {
        let Some(codegen) = self.codegen.as_mut() else {
            return Ok(());
        };
        let Some(t) = self.arena.get(id) else {
            return Ok(());
        };
        let pending = &t.decls()[t.emitted()..];
        for batch in pending {
            if let Err(e) = codegen.handle_top_level_decl(batch, &self.decls) {
                codegen.discard();
                return Err(e);
            }
        }
        let upto = t.decls().len();
        self.module_no += 1;
        let name = format!("kiln_module_{}", self.module_no);
        let module = codegen.handle_translation_unit(&name);
        if let Some(t) = self.arena.get_mut(id) {
            if let Some(module) = module {
                t.add_module(module);
            }
            t.mark_emitted(upto);
        }
        Ok(())
    }

    /// Generate code for `id` now, before it is committed. The module is
    /// loaded together with the rest of the transaction at commit.
    pub fn emit_transaction(&mut self, id: TransactionId) -> Result<(), CodegenError> {
        debug!(transaction = %id, "emit transaction");
        self.codegen_transaction(id)
    }

    /// Generate and load code for a committed transaction that was parsed
    /// without code generation. A failure leaves the transaction committed
    /// but without code, so it can be emitted again later.
    pub fn emit_all_decls(
        &mut self,
        id: TransactionId,
        loader: Option<&mut IncrementalJit>,
    ) -> Result<(), EmitError> {
        let t = self
            .arena
            .get(id)
            .filter(|t| t.is_committed())
            .ok_or(EmitError::NotCommitted(id))?;
        if t.resource().is_some() {
            return Ok(());
        }
        let opt_level = t.options().opt_level;
        let subtree: Vec<TransactionId> = iter::once(id).chain(self.arena.descendants(id)).collect();
        let mut outcome: Result<(), EmitError> = subtree
            .iter()
            .try_for_each(|tid| self.codegen_transaction(*tid))
            .map_err(EmitError::from);
        if outcome.is_ok() {
            if let Some(loader) = loader {
                outcome = self
                    .load_transaction(id, opt_level, loader)
                    .map_err(EmitError::from);
            }
        }
        if let Err(e) = &outcome {
            self.diags.error(SourceLocation::INVALID, e.to_string());
            for tid in &subtree {
                if let Some(t) = self.arena.get_mut(*tid) {
                    t.take_module();
                    t.mark_emitted(0);
                }
            }
        }
        self.diags.reset();
        debug!(transaction = %id, ok = outcome.is_ok(), "emitted all declarations");
        outcome
    }

    /// Hand the module of `id` and of its nested transactions to the loader
    /// as one unit.
    fn load_transaction(
        &mut self,
        id: TransactionId,
        opt_level: u8,
        loader: &mut IncrementalJit,
    ) -> Result<(), LoadError> {
        let mut merged: Option<CodeModule> = None;
        for tid in iter::once(id).chain(self.arena.descendants(id)) {
            let Some(t) = self.arena.get_mut(tid) else {
                continue;
            };
            if t.resource().is_some() {
                continue;
            }
            if let Some(module) = t.take_module() {
                match &mut merged {
                    Some(m) => m.merge(module),
                    None => merged = Some(module),
                }
            }
        }
        let Some(module) = merged.filter(|m| !m.is_empty()) else {
            return Ok(());
        };
        let handle = loader.add_module(id, module, opt_level)?;
        if let Some(t) = self.arena.get_mut(id) {
            t.set_resource(Some(handle));
        }
        Ok(())
    }

    /// Forget everything `id` and its subtree declared, revert their macro
    /// directives, and release them.
    pub fn rollback_transaction(
        &mut self,
        id: TransactionId,
        loader: Option<&mut IncrementalJit>,
    ) -> Result<(), TransactionError> {
        let t = self.arena.require(id)?;
        if t.state().is_terminal() {
            return Err(TransactionError::InvalidTransition {
                id,
                from: t.state(),
                to: State::RolledBack,
            });
        }
        let subtree = self.arena.descendants(id);
        if let Some(loader) = loader {
            let handles: Vec<_> = subtree
                .iter()
                .filter_map(|c| self.arena.get(*c).and_then(|t| t.resource()))
                .collect();
            if let Err(e) = loader.remove_modules(&handles) {
                warn!(transaction = %id, error = %e, "cannot unload nested code");
            }
        }
        for tid in subtree.iter().rev().chain(iter::once(&id)) {
            self.revert(*tid);
        }
        if let Some(codegen) = self.codegen.as_mut() {
            codegen.discard();
        }

        for child in &subtree {
            if let Some(c) = self.arena.get_mut(*child) {
                if !c.state().is_terminal() {
                    c.set_state(State::RolledBack)?;
                }
            }
        }
        let state = if self.arena.issued_diags(id) == IssuedDiags::Errors {
            State::RolledBackWithErrors
        } else {
            State::RolledBack
        };
        let t = self.arena.require_mut(id)?;
        let parent = t.parent();
        t.set_state(state)?;
        if self.collector.transaction() == Some(id) {
            self.collector.set_transaction(parent);
        }
        self.deregister_transaction(id);
        self.arena.release(id)?;
        self.events.push(ParserEvent::RolledBack(id));
        debug!(transaction = %id, %state, "rolled back transaction");
        Ok(())
    }

    /// Undo the declarations and macro directives of one transaction.
    fn revert(&mut self, id: TransactionId) {
        let Some(t) = self.arena.get(id) else {
            return;
        };
        let decls: Vec<_> = t
            .decls()
            .iter()
            .chain(t.deserialized_decls())
            .flat_map(|b| b.group.iter().copied())
            .collect();
        let macros = t.macros().to_vec();
        for decl in decls.into_iter().rev() {
            self.decls.forget(decl);
        }
        for info in macros.into_iter().rev() {
            match info.directive {
                MacroDirective::Define { .. } => {
                    self.decls.undefine_macro(&info.name);
                }
                MacroDirective::Undefine {
                    previous: Some(body),
                } => {
                    self.decls
                        .restore_macro(&info.name, crate::ast::MacroDefinition { body });
                }
                MacroDirective::Undefine { previous: None } => {}
            }
        }
    }

    /// Remove the code, declarations and history entry of a committed
    /// top-level transaction. On failure nothing changes.
    pub fn unload_transaction(
        &mut self,
        id: TransactionId,
        loader: Option<&mut IncrementalJit>,
    ) -> Result<(), UnloadError> {
        let t = self.arena.get(id).ok_or(UnloadError::Unknown(id))?;
        if !t.is_committed() {
            return Err(UnloadError::NotCommitted(id));
        }
        if let Some(parent) = t.parent() {
            return Err(UnloadError::Nested { id, parent });
        }
        let subtree: Vec<TransactionId> = iter::once(id).chain(self.arena.descendants(id)).collect();
        let mut handles: Vec<_> = subtree
            .iter()
            .filter_map(|c| self.arena.get(*c).and_then(|t| t.resource()))
            .collect();
        handles.dedup();

        self.set_unloading(&subtree, true);
        if let Some(loader) = loader {
            if let Err(e) = loader.remove_modules(&handles) {
                self.set_unloading(&subtree, false);
                return Err(e.into());
            }
        }
        for tid in subtree.iter().rev() {
            self.revert(*tid);
        }
        self.deregister_transaction(id);
        self.arena.release(id)?;
        self.events.push(ParserEvent::Unloaded(id));
        debug!(transaction = %id, "unloaded transaction");
        Ok(())
    }

    fn set_unloading(&mut self, ids: &[TransactionId], unloading: bool) {
        for id in ids {
            if let Some(t) = self.arena.get_mut(*id) {
                t.set_unloading(unloading);
            }
        }
    }

    /// Append a committed top-level transaction to the history.
    pub fn add_transaction(&mut self, id: TransactionId) {
        if self.history.contains(&id) {
            return;
        }
        if let Some(prev) = self.history.last().copied() {
            if let Some(p) = self.arena.get_mut(prev) {
                p.set_next(Some(id));
            }
        }
        self.history.push(id);
    }

    /// Unlink `id` from the history, keeping the successor chain intact.
    pub fn deregister_transaction(&mut self, id: TransactionId) {
        let Some(pos) = self.history.iter().position(|t| *t == id) else {
            return;
        };
        self.history.remove(pos);
        let next = self.history.get(pos).copied();
        if let Some(prev) = pos.checked_sub(1).and_then(|p| self.history.get(p).copied()) {
            if let Some(p) = self.arena.get_mut(prev) {
                p.set_next(next);
            }
        }
        if let Some(t) = self.arena.get_mut(id) {
            t.set_next(None);
        }
    }

    /// Parse `input` into a fresh transaction, then commit it.
    pub fn compile(
        &mut self,
        input: &str,
        wrapper: Option<&str>,
        opts: CompilationOptions,
        loader: Option<&mut IncrementalJit>,
    ) -> ParseResultTransaction {
        let id = self.begin_transaction(opts);
        self.parse_internal(input, wrapper);
        let mut prt = match self.end_transaction(id) {
            Ok(prt) => prt,
            Err(e) => {
                warn!(transaction = %id, error = %e, "cannot end transaction");
                return ParseResultTransaction {
                    transaction: None,
                    result: ParseResult::Failed,
                };
            }
        };
        self.commit_transaction(&mut prt, loader);
        prt
    }

    /// Parse and commit without generating code.
    pub fn parse(&mut self, input: &str, opts: CompilationOptions) -> ParseResultTransaction {
        let opts = CompilationOptions {
            code_generation: false,
            ..opts
        };
        self.compile(input, None, opts, None)
    }

    /// Feed one fragment to the frontend, into the current transaction.
    pub fn parse_internal(&mut self, input: &str, wrapper: Option<&str>) {
        let (fid, start) = self.sources.create_buffer(input);
        if let Some(t) = self
            .collector
            .transaction()
            .and_then(|id| self.arena.get_mut(id))
        {
            t.set_buffer(fid);
        }
        let request = ParseRequest {
            source: input,
            wrapper,
            start,
        };
        let mut cx = FrontendContext::new(
            &mut self.collector,
            &mut self.arena,
            &mut self.decls,
            &mut self.diags,
            &mut self.sources,
        );
        self.frontend.parse(&request, &mut cx);
    }

    /// Run `f` with a frontend context collecting into the current
    /// transaction.
    pub fn with_frontend_context<R>(&mut self, f: impl FnOnce(&mut FrontendContext<'_>) -> R) -> R {
        let mut cx = FrontendContext::new(
            &mut self.collector,
            &mut self.arena,
            &mut self.decls,
            &mut self.diags,
            &mut self.sources,
        );
        f(&mut cx)
    }

    pub fn first_transaction(&self) -> Option<TransactionId> {
        self.history.first().copied()
    }

    pub fn last_transaction(&self) -> Option<TransactionId> {
        self.history.last().copied()
    }

    pub fn current_transaction(&self) -> Option<TransactionId> {
        self.collector.transaction()
    }

    /// Most recent transaction with a wrapper, the current one included.
    pub fn last_wrapper_transaction(&self) -> Option<TransactionId> {
        self.current_transaction()
            .into_iter()
            .chain(self.history.iter().rev().copied())
            .find(|id| self.arena.get(*id).is_some_and(|t| t.wrapper().is_some()))
    }

    /// Copy of the history, oldest first.
    pub fn all_transactions(&self) -> Vec<TransactionId> {
        self.history.clone()
    }

    pub fn take_events(&mut self) -> Vec<ParserEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn print_transaction_structure(&self, out: &mut impl Write) -> fmt::Result {
        for id in &self.history {
            self.arena.print_structure_brief(*id, out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Decl, VarDecl};
    use crate::frontend::FrontendContext;
    use crate::lir::{GlobalDef, SymbolLinkage};
    use crate::transaction::{DeclGroup, DelayCallInfo};

    /// Declares one variable per word. `!word` reports an error,
    /// `?word` a warning, `#name` defines a macro and `-name` undefines it.
    struct Words;

    impl Frontend for Words {
        fn parse(&mut self, request: &ParseRequest<'_>, cx: &mut FrontendContext<'_>) {
            for (i, word) in request.source.split_whitespace().enumerate() {
                let loc = request.location(i);
                if let Some(bad) = word.strip_prefix('!') {
                    cx.error(loc, format!("bad word {}", bad));
                } else if let Some(w) = word.strip_prefix('?') {
                    cx.warning(loc, format!("odd word {}", w));
                } else if let Some(m) = word.strip_prefix('#') {
                    cx.macro_defined(m, "1");
                } else if let Some(m) = word.strip_prefix('-') {
                    cx.macro_undefined(m);
                } else {
                    let id = cx.decls_mut().insert(Decl::var(word, VarDecl::default(), loc));
                    cx.decls_mut().make_visible(id);
                    cx.handle_top_level_decl(DeclGroup::from_elem(id, 1));
                }
            }
        }

        fn should_wrap(&self, _: &str) -> bool {
            false
        }
    }

    /// One global per declared variable.
    struct Globals {
        pending: Vec<String>,
    }

    impl CodeGenerator for Globals {
        fn handle_top_level_decl(
            &mut self,
            batch: &DelayCallInfo,
            decls: &DeclStore,
        ) -> Result<(), CodegenError> {
            for id in &batch.group {
                let decl = decls.get(*id).ok_or(CodegenError::StaleDeclaration(*id))?;
                if decl.name.starts_with("zfail") {
                    return Err(CodegenError::Unsupported {
                        name: decl.name.clone(),
                        message: "cannot generate code".to_string(),
                    });
                }
                self.pending.push(decl.linkage_name.clone());
            }
            Ok(())
        }

        fn handle_translation_unit(&mut self, name: &str) -> Option<CodeModule> {
            if self.pending.is_empty() {
                return None;
            }
            let mut m = CodeModule::new(name);
            m.globals = self
                .pending
                .drain(..)
                .map(|name| GlobalDef {
                    name,
                    linkage: SymbolLinkage::External,
                    init: 0,
                })
                .collect();
            Some(m)
        }

        fn discard(&mut self) {
            self.pending.clear();
        }
    }

    fn parser() -> IncrementalParser {
        IncrementalParser::new(Box::new(Words), Some(Box::new(Globals { pending: vec![] })))
    }

    fn visible(p: &IncrementalParser) -> Vec<String> {
        p.decls()
            .visible_declarations()
            .into_iter()
            .map(|(n, _)| n)
            .collect()
    }

    #[test]
    fn test_compile_commits_into_history() {
        let mut p = parser();
        let prt = p.compile("a b", None, CompilationOptions::default(), None);
        assert_eq!(prt.result, ParseResult::Success);
        let id = prt.transaction.unwrap();
        let t = p.arena().get(id).unwrap();
        assert!(t.is_committed());
        assert!(t.module().is_some());
        assert_eq!(p.all_transactions(), vec![id]);
        assert_eq!(visible(&p), vec!["a", "b"]);
    }

    #[test]
    fn test_failure_rolls_back_only_the_fragment() {
        let mut p = parser();
        let first = p.compile("a", None, CompilationOptions::default(), None);
        let bad = p.compile("b !c #M", None, CompilationOptions::default(), None);
        assert_eq!(bad.result, ParseResult::Failed);
        assert_eq!(bad.transaction, None);
        assert_eq!(visible(&p), vec!["a"]);
        assert!(p.decls().macro_definition("M").is_none());
        assert_eq!(p.all_transactions(), vec![first.transaction.unwrap()]);
        // Counters were reset, so the next fragment is clean.
        let next = p.compile("d", None, CompilationOptions::default(), None);
        assert_eq!(next.result, ParseResult::Success);
    }

    #[test]
    fn test_warnings_are_classified() {
        let mut p = parser();
        let prt = p.compile("?x y", None, CompilationOptions::default(), None);
        assert_eq!(prt.result, ParseResult::SuccessWithWarnings);
        assert!(prt.transaction.is_some());
    }

    #[test]
    fn test_empty_fragment_is_committed() {
        let mut p = parser();
        let prt = p.compile("   ", None, CompilationOptions::default(), None);
        let id = prt.transaction.unwrap();
        let t = p.arena().get(id).unwrap();
        assert!(t.is_committed());
        assert!(t.is_empty());
        assert!(t.module().is_none());
        assert_eq!(p.all_transactions(), vec![id]);
    }

    #[test]
    fn test_nested_transaction_commits_with_parent() {
        let mut p = parser();
        let outer = p.begin_transaction(CompilationOptions::default());
        p.parse_internal("a", None);
        let inner = p.begin_transaction(CompilationOptions::default());
        assert_eq!(p.arena().get(inner).unwrap().parent(), Some(outer));
        p.parse_internal("b", None);
        let inner_prt = p.end_transaction(inner).unwrap();
        assert_eq!(inner_prt.transaction, Some(inner));
        assert_eq!(p.current_transaction(), Some(outer));

        let mut prt = p.end_transaction(outer).unwrap();
        p.commit_transaction(&mut prt, None);
        assert!(p.arena().get(inner).unwrap().is_committed());
        assert_eq!(p.all_transactions(), vec![outer]);
    }

    #[test]
    fn test_nested_codegen_failure_fails_the_root() {
        let mut p = parser();
        let outer = p.begin_transaction(CompilationOptions::default());
        p.parse_internal("a", None);
        let inner = p.begin_transaction(CompilationOptions::default());
        p.parse_internal("zfail", None);
        p.end_transaction(inner).unwrap();

        let mut prt = p.end_transaction(outer).unwrap();
        assert_eq!(prt.result, ParseResult::Success);
        p.commit_transaction(&mut prt, None);
        assert_eq!(prt.result, ParseResult::Failed);
        assert_eq!(prt.transaction, None);
        assert!(p.all_transactions().is_empty());
        assert!(visible(&p).is_empty());
        assert!(!p.arena().contains(outer));

        let events = p.take_events();
        assert!(events.contains(&ParserEvent::RolledBack(outer)));
        assert!(!events.iter().any(|e| matches!(e, ParserEvent::Committed(_))));
        // The failure does not leak into the next fragment.
        let next = p.compile("b", None, CompilationOptions::default(), None);
        assert_eq!(next.result, ParseResult::Success);
    }

    #[test]
    fn test_nested_commit_is_reported_with_the_root() {
        let mut p = parser();
        let outer = p.begin_transaction(CompilationOptions::default());
        p.parse_internal("a", None);
        let inner = p.begin_transaction(CompilationOptions::default());
        p.parse_internal("b", None);
        let mut inner_prt = p.end_transaction(inner).unwrap();
        p.commit_transaction(&mut inner_prt, None);
        assert!(p.arena().get(inner).unwrap().is_committed());
        assert!(p.take_events().is_empty());

        let mut prt = p.end_transaction(outer).unwrap();
        p.commit_transaction(&mut prt, None);
        assert_eq!(
            p.take_events(),
            vec![ParserEvent::Committed(inner), ParserEvent::Committed(outer)]
        );
    }

    #[test]
    fn test_empty_nested_transaction_is_discarded() {
        let mut p = parser();
        let outer = p.begin_transaction(CompilationOptions::default());
        let inner = p.begin_transaction(CompilationOptions::default());
        let prt = p.end_transaction(inner).unwrap();
        assert_eq!(prt.transaction, None);
        assert!(!p.arena().contains(inner));
        assert!(p.arena().get(outer).unwrap().nested().is_empty());
    }

    #[test]
    fn test_error_in_nested_fails_the_root() {
        let mut p = parser();
        let outer = p.begin_transaction(CompilationOptions::default());
        p.parse_internal("a", None);
        let inner = p.begin_transaction(CompilationOptions::default());
        p.parse_internal("!b", None);
        p.end_transaction(inner).unwrap();
        let mut prt = p.end_transaction(outer).unwrap();
        assert_eq!(prt.result, ParseResult::Failed);
        p.commit_transaction(&mut prt, None);
        assert!(visible(&p).is_empty());
        assert!(p.arena().is_empty());
    }

    #[test]
    fn test_unload_restores_previous_state() {
        let mut p = parser();
        p.compile("a #M", None, CompilationOptions::default(), None);
        let second = p
            .compile("a2 -M", None, CompilationOptions::default(), None)
            .transaction
            .unwrap();
        assert!(p.decls().macro_definition("M").is_none());
        p.unload_transaction(second, None).unwrap();
        assert_eq!(visible(&p), vec!["a"]);
        assert!(p.decls().macro_definition("M").is_some());
        assert_eq!(p.all_transactions().len(), 1);
        let first = p.first_transaction().unwrap();
        assert_eq!(p.arena().get(first).unwrap().next(), None);
    }

    #[test]
    fn test_history_links_follow_commit_order() {
        let mut p = parser();
        let ids: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|s| {
                p.compile(s, None, CompilationOptions::default(), None)
                    .transaction
                    .unwrap()
            })
            .collect();
        assert_eq!(p.arena().get(ids[0]).unwrap().next(), Some(ids[1]));
        p.deregister_transaction(ids[1]);
        assert_eq!(p.arena().get(ids[0]).unwrap().next(), Some(ids[2]));
        assert_eq!(p.last_transaction(), Some(ids[2]));
    }

    #[test]
    fn test_parse_skips_codegen() {
        let mut p = parser();
        let prt = p.parse("a", CompilationOptions::default());
        let t = p.arena().get(prt.transaction.unwrap()).unwrap();
        assert!(t.is_committed());
        assert!(t.module().is_none());
    }

    #[test]
    fn test_emit_transaction_before_commit() {
        let mut p = parser();
        let id = p.begin_transaction(CompilationOptions::default());
        p.parse_internal("a", None);
        p.emit_transaction(id).unwrap();
        assert!(p.arena().get(id).unwrap().module().is_some());
        p.parse_internal("b", None);
        let mut prt = p.end_transaction(id).unwrap();
        p.commit_transaction(&mut prt, None);
        let module = p.arena().get(id).unwrap().module().unwrap();
        assert!(module.defines("a"));
        assert!(module.defines("b"));
    }

    #[test]
    fn test_structure_dump() {
        let mut p = parser();
        p.compile("a", None, CompilationOptions::default(), None);
        let mut out = String::new();
        p.print_transaction_structure(&mut out).unwrap();
        assert!(out.contains("Committed"));
    }
}
