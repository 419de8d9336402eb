//! Interfaces to the external compiler frontend and code generator
//!
//! The engine does not parse or type check anything itself. A `Frontend`
//! turns fragment text into declarations and reports them, one callback
//! per kind of event, through the `FrontendContext` it is handed. A
//! `CodeGenerator` turns the batches of a transaction into a `CodeModule`.

use crate::ast::{DeclId, DeclStore};
use crate::collector::{CollectorEnv, DeclCollector};
use crate::diag::DiagnosticsEngine;
use crate::error::{CodegenError, CollectorError};
use crate::lir::CodeModule;
use crate::source::{SourceLocation, SourceManager};
use crate::transaction::{
    CompilationOptions, ConsumerCallInfo, DeclGroup, DelayCallInfo, MacroDirective,
    MacroDirectiveInfo, TransactionArena, TransactionId,
};

/// One fragment to parse.
#[derive(Debug, Clone, Copy)]
pub struct ParseRequest<'s> {
    pub source: &'s str,
    /// Name of the wrapper function to synthesize around the fragment, if
    /// it is to be wrapped.
    pub wrapper: Option<&'s str>,
    /// Location of the first byte of `source`.
    pub start: SourceLocation,
}

impl ParseRequest<'_> {
    pub fn location(&self, offset: usize) -> SourceLocation {
        self.start.with_offset(offset as u32)
    }
}

pub trait Frontend {
    /// Parse one fragment against the cumulative session state. Problems
    /// are reported as diagnostics.
    fn parse(&mut self, request: &ParseRequest<'_>, cx: &mut FrontendContext<'_>);

    /// Whether `input` is statement-like and needs a wrapper function.
    fn should_wrap(&self, input: &str) -> bool;

    /// Produce declarations deferred until the end of the translation unit.
    /// Runs inside a nested transaction during commit.
    fn perform_pending_instantiations(&mut self, _cx: &mut FrontendContext<'_>) {}
}

pub trait CodeGenerator {
    /// Generate code for one batch, in transaction order.
    fn handle_top_level_decl(
        &mut self,
        batch: &DelayCallInfo,
        decls: &DeclStore,
    ) -> Result<(), CodegenError>;

    /// Hand over everything generated since the last call. `None` when no
    /// code was produced.
    fn handle_translation_unit(&mut self, module_name: &str) -> Option<CodeModule>;

    /// Throw away partially generated code after a failure.
    fn discard(&mut self) {}
}

/// The frontend's window onto the session while it parses.
pub struct FrontendContext<'a> {
    collector: &'a mut DeclCollector,
    arena: &'a mut TransactionArena,
    decls: &'a mut DeclStore,
    diags: &'a mut DiagnosticsEngine,
    sources: &'a mut SourceManager,
}

impl<'a> FrontendContext<'a> {
    pub(crate) fn new(
        collector: &'a mut DeclCollector,
        arena: &'a mut TransactionArena,
        decls: &'a mut DeclStore,
        diags: &'a mut DiagnosticsEngine,
        sources: &'a mut SourceManager,
    ) -> Self {
        FrontendContext {
            collector,
            arena,
            decls,
            diags,
            sources,
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

    pub fn error(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.diags.error(location, message);
    }

    pub fn warning(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.diags.warning(location, message);
    }

    pub fn has_error_occurred(&self) -> bool {
        self.diags.has_error_occurred()
    }

    pub fn transaction(&self) -> Option<TransactionId> {
        self.collector.transaction()
    }

    /// Options of the transaction being collected.
    pub fn options(&self) -> CompilationOptions {
        self.transaction()
            .and_then(|id| self.arena.get(id))
            .map(|t| *t.options())
            .unwrap_or_default()
    }

    pub fn next_unique_location(&mut self) -> SourceLocation {
        self.sources.next_unique_location()
    }

    pub fn handle_top_level_decl(&mut self, group: DeclGroup) -> bool {
        self.dispatch(group, ConsumerCallInfo::HandleTopLevelDecl)
    }

    pub fn handle_interesting_decl(&mut self, group: DeclGroup) -> bool {
        self.dispatch(group, ConsumerCallInfo::HandleInterestingDecl)
    }

    pub fn handle_tag_decl_definition(&mut self, decl: DeclId) -> bool {
        self.dispatch(
            DeclGroup::from_elem(decl, 1),
            ConsumerCallInfo::HandleTagDeclDefinition,
        )
    }

    pub fn handle_vtable(&mut self, decl: DeclId) -> bool {
        self.dispatch(DeclGroup::from_elem(decl, 1), ConsumerCallInfo::HandleVTable)
    }

    pub fn handle_implicit_function_instantiation(&mut self, decl: DeclId) -> bool {
        self.dispatch(
            DeclGroup::from_elem(decl, 1),
            ConsumerCallInfo::HandleImplicitFunctionInstantiation,
        )
    }

    pub fn handle_static_member_var_instantiation(&mut self, decl: DeclId) -> bool {
        self.dispatch(
            DeclGroup::from_elem(decl, 1),
            ConsumerCallInfo::HandleStaticMemberVarInstantiation,
        )
    }

    pub fn complete_tentative_definition(&mut self, decl: DeclId) -> bool {
        self.dispatch(
            DeclGroup::from_elem(decl, 1),
            ConsumerCallInfo::CompleteTentativeDefinition,
        )
    }

    /// `#define name body`
    pub fn macro_defined(&mut self, name: &str, body: &str) {
        self.decls.define_macro(name, body);
        self.record_macro(MacroDirectiveInfo {
            name: name.to_string(),
            directive: MacroDirective::Define {
                body: body.to_string(),
            },
        });
    }

    /// `#undef name`
    pub fn macro_undefined(&mut self, name: &str) {
        let previous = self.decls.undefine_macro(name).map(|m| m.body);
        self.record_macro(MacroDirectiveInfo {
            name: name.to_string(),
            directive: MacroDirective::Undefine { previous },
        });
    }

    fn dispatch(&mut self, group: DeclGroup, call: ConsumerCallInfo) -> bool {
        let mut env = CollectorEnv {
            arena: &mut *self.arena,
            decls: &mut *self.decls,
            diags: &mut *self.diags,
        };
        let result = self.collector.handle(group, call, &mut env);
        self.report(result)
    }

    fn record_macro(&mut self, info: MacroDirectiveInfo) {
        let mut env = CollectorEnv {
            arena: &mut *self.arena,
            decls: &mut *self.decls,
            diags: &mut *self.diags,
        };
        let result = self.collector.handle_macro(info, &mut env);
        self.report(result);
    }

    fn report(&mut self, result: Result<(), CollectorError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                self.diags.error(SourceLocation::INVALID, e.to_string());
                false
            }
        }
    }
}
