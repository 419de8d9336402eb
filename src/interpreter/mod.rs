//! The interpreter session
//!
//! `Interpreter` ties one incremental parser to one loader and exposes the
//! operations a prompt needs: process a line, declare, evaluate, execute,
//! and undo. Fragments that fail leave the session exactly as it was.
//!
//! The session is single-threaded. Its parts sit in `RefCell`s and no
//! borrow is held while generated code or a callback runs, so both may
//! call back into the session.

mod callbacks;
mod guards;
mod input;
mod value;

pub use callbacks::InterpreterCallbacks;
pub use guards::{DiagnosticConsumerGuard, PushTransaction};
pub use input::{InputValidator, ValidationResult};
pub use value::{CompilationResult, ExecutionResult, Value};

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::ast::UNIQUE_PREFIX;
use crate::diag::{Diagnostic, DiagnosticConsumer};
use crate::error::{EmitError, InterpreterError, LoadError, UnloadError};
use crate::frontend::{CodeGenerator, Frontend};
use crate::jit::{
    call_function, HostLookupPolicy, IncrementalJit, LoaderConfig, ResourceHandle,
    SymbolGenerator, MAX_CALL_ARGS,
};
use crate::minic::{MinicCodegen, MinicFrontend};
use crate::parser::{IncrementalParser, ParseResult, ParseResultTransaction, ParserEvent};
use crate::source::SourceLocation;
use crate::transaction::{
    CompilationOptions, InvocationOptions, RuntimeOptions, TransactionId, ValuePrinting,
};

pub struct Interpreter {
    parser: RefCell<IncrementalParser>,
    /// `None` when the session has no code generator.
    jit: Option<RefCell<IncrementalJit>>,
    opts: InvocationOptions,
    runtime: Cell<RuntimeOptions>,
    unique_counter: Cell<u64>,
    callbacks: RefCell<Option<Box<dyn InterpreterCallbacks>>>,
    input: RefCell<InputValidator>,
    host_lookup: HostLookupPolicy,
}

fn compilation_result(result: ParseResult) -> CompilationResult {
    match result {
        ParseResult::Failed => CompilationResult::Failure,
        ParseResult::Success | ParseResult::SuccessWithWarnings => CompilationResult::Success,
    }
}

impl Interpreter {
    /// Create a session. Without a code generator nothing is loaded or run
    /// and execution reports `NoCodeGen`.
    pub fn new(
        opts: InvocationOptions,
        frontend: Box<dyn Frontend>,
        codegen: Option<Box<dyn CodeGenerator>>,
    ) -> Result<Self, InterpreterError> {
        Self::build(opts, frontend, codegen, HostLookupPolicy::new(), None)
    }

    /// A session for the bundled minic language.
    pub fn with_minic(opts: InvocationOptions) -> Result<Self, InterpreterError> {
        Self::new(
            opts,
            Box::new(MinicFrontend::new()),
            Some(Box::new(MinicCodegen::new())),
        )
    }

    /// A session that resolves symbols in this one and shares its host
    /// lookup policy.
    pub fn new_child(
        &self,
        opts: InvocationOptions,
        frontend: Box<dyn Frontend>,
        codegen: Option<Box<dyn CodeGenerator>>,
    ) -> Result<Self, InterpreterError> {
        let generator = self.generator();
        Self::build(opts, frontend, codegen, self.host_lookup.clone(), generator)
    }

    pub fn new_minic_child(&self, opts: InvocationOptions) -> Result<Self, InterpreterError> {
        self.new_child(
            opts,
            Box::new(MinicFrontend::new()),
            Some(Box::new(MinicCodegen::new())),
        )
    }

    fn build(
        opts: InvocationOptions,
        frontend: Box<dyn Frontend>,
        codegen: Option<Box<dyn CodeGenerator>>,
        host_lookup: HostLookupPolicy,
        parent: Option<Rc<dyn SymbolGenerator>>,
    ) -> Result<Self, InterpreterError> {
        let jit = if codegen.is_some() {
            let config = LoaderConfig {
                weak_inline_threshold: opts.weak_inline_threshold,
                host_lookup: host_lookup.clone(),
                verbose: opts.verbose,
            };
            let mut jit = IncrementalJit::new(config)?;
            if let Some(parent) = parent {
                jit.add_generator(parent);
            }
            for path in &opts.libs_to_load {
                jit.load_library(path)
                    .map_err(|e| InterpreterError::Library {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
            }
            Some(RefCell::new(jit))
        } else {
            None
        };
        let mut parser = IncrementalParser::new(frontend, codegen);
        parser.set_transformers();
        debug!(codegen = jit.is_some(), "interpreter ready");
        Ok(Interpreter {
            parser: RefCell::new(parser),
            jit,
            runtime: Cell::new(RuntimeOptions {
                allow_redefinition: opts.allow_redefinition,
            }),
            opts,
            unique_counter: Cell::new(0),
            callbacks: RefCell::new(None),
            input: RefCell::new(InputValidator::new()),
            host_lookup,
        })
    }

    // === Options ===

    pub fn invocation_options(&self) -> &InvocationOptions {
        &self.opts
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        self.runtime.get()
    }

    pub fn set_runtime_options(&self, runtime: RuntimeOptions) {
        self.runtime.set(runtime);
    }

    pub fn host_lookup_policy(&self) -> &HostLookupPolicy {
        &self.host_lookup
    }

    pub(crate) fn default_compilation_options(&self) -> CompilationOptions {
        CompilationOptions {
            enable_shadowing: self.runtime.get().allow_redefinition,
            code_generation: self.jit.is_some(),
            opt_level: self.opts.opt_level,
            ..CompilationOptions::default()
        }
    }

    // === Entry points ===

    /// Handle one line of prompt input. Statement-like input is wrapped and
    /// run; declarations are declared. The value is printable unless the
    /// input ends with a semicolon.
    pub fn process(&self, line: &str) -> (CompilationResult, Value) {
        let text = {
            let mut input = self.input.borrow_mut();
            match input.validate(line) {
                ValidationResult::Complete => input.take_input(),
                ValidationResult::Incomplete => {
                    return (CompilationResult::MoreInputExpected, Value::Invalid)
                }
                ValidationResult::Mismatch => {
                    let mut parser = self.parser.borrow_mut();
                    parser
                        .diags_mut()
                        .error(SourceLocation::INVALID, "unbalanced brackets in input");
                    parser.diags_mut().reset();
                    return (CompilationResult::Failure, Value::Invalid);
                }
            }
        };
        let mut opts = self.default_compilation_options();
        opts.declaration_extraction = true;
        opts.ignore_prompt_diags = true;
        opts.value_printing = resolve_value_printing(ValuePrinting::Auto, &text);

        // Blank input still commits an empty transaction.
        if !text.trim().is_empty() && self.parser.borrow().should_wrap(&text) {
            self.evaluate_internal(&text, opts)
        } else {
            (self.declare_internal(&text, opts), Value::Invalid)
        }
    }

    /// Parse and load declarations without wrapping them.
    pub fn declare(&self, input: &str) -> CompilationResult {
        self.declare_internal(input, self.default_compilation_options())
    }

    /// Parse declarations into the history without generating code. Use
    /// `emit_all_decls` to load them later.
    pub fn parse(&self, input: &str) -> CompilationResult {
        let prt = self
            .parser
            .borrow_mut()
            .parse(input, self.default_compilation_options());
        self.dispatch_events();
        compilation_result(prt.result)
    }

    /// Evaluate an expression fragment and return its value.
    pub fn evaluate(&self, input: &str) -> (CompilationResult, Value) {
        let mut opts = self.default_compilation_options();
        opts.result_evaluation = true;
        opts.ignore_prompt_diags = true;
        self.evaluate_or_declare(input, opts)
    }

    /// Like `evaluate`, with value printing requested.
    pub fn echo(&self, input: &str) -> (CompilationResult, Value) {
        let mut opts = self.default_compilation_options();
        opts.value_printing = ValuePrinting::Enabled;
        opts.result_evaluation = true;
        self.evaluate_or_declare(input, opts)
    }

    /// Run a statement fragment for its effect only.
    pub fn execute(&self, input: &str) -> CompilationResult {
        let opts = self.default_compilation_options();
        if !self.parser.borrow().should_wrap(input) {
            return self.declare_internal(input, opts);
        }
        self.evaluate_internal(input, opts).0
    }

    fn evaluate_or_declare(&self, input: &str, opts: CompilationOptions) -> (CompilationResult, Value) {
        if self.parser.borrow().should_wrap(input) {
            self.evaluate_internal(input, opts)
        } else {
            (self.declare_internal(input, opts), Value::Invalid)
        }
    }

    fn declare_internal(&self, input: &str, opts: CompilationOptions) -> CompilationResult {
        let prt = self.compile_fragment(input, None, opts);
        let result = compilation_result(prt.result);
        let Some(id) = prt.transaction else {
            return result;
        };
        if self.is_top_level(id) && self.run_static_init_on_transaction(id).is_error() {
            return CompilationResult::Failure;
        }
        result
    }

    fn evaluate_internal(&self, input: &str, opts: CompilationOptions) -> (CompilationResult, Value) {
        let wrapper = self.create_unique_name();
        let prt = self.compile_fragment(input, Some(&wrapper), opts);
        let result = compilation_result(prt.result);
        let Some(id) = prt.transaction else {
            return (result, Value::Invalid);
        };
        let (exec, value) = self.execute_transaction(id);
        if exec.is_error() {
            return (CompilationResult::Failure, Value::Invalid);
        }
        (result, value)
    }

    fn compile_fragment(
        &self,
        input: &str,
        wrapper: Option<&str>,
        opts: CompilationOptions,
    ) -> ParseResultTransaction {
        let prt = {
            let mut parser = self.parser.borrow_mut();
            let mut jit = self.jit.as_ref().map(|j| j.borrow_mut());
            parser.compile(input, wrapper, opts, jit.as_deref_mut())
        };
        self.dispatch_events();
        prt
    }

    pub(crate) fn end_and_commit(&self, id: TransactionId) -> ParseResultTransaction {
        let mut parser = self.parser.borrow_mut();
        let mut prt = match parser.end_transaction(id) {
            Ok(prt) => prt,
            Err(e) => {
                warn!(transaction = %id, error = %e, "cannot end transaction");
                return ParseResultTransaction {
                    transaction: None,
                    result: ParseResult::Failed,
                };
            }
        };
        let mut jit = self.jit.as_ref().map(|j| j.borrow_mut());
        parser.commit_transaction(&mut prt, jit.as_deref_mut());
        prt
    }

    fn is_top_level(&self, id: TransactionId) -> bool {
        self.parser
            .borrow()
            .arena()
            .get(id)
            .is_some_and(|t| !t.is_nested())
    }

    // === Execution ===

    /// Run the static initializers of `id`, then its wrapper if it has one.
    /// A nested transaction runs together with its parent, so here it only
    /// reports success.
    pub fn execute_transaction(&self, id: TransactionId) -> (ExecutionResult, Value) {
        if self.jit.is_none() {
            return (ExecutionResult::NoCodeGen, Value::Invalid);
        }
        let (resource, wrapper) = {
            let parser = self.parser.borrow();
            let Some(t) = parser.arena().get(id) else {
                return (ExecutionResult::NoModule, Value::Invalid);
            };
            if t.is_nested() {
                return (ExecutionResult::Success, Value::Invalid);
            }
            let wrapper = t.wrapper().and_then(|w| parser.decls().get(w)).map(|d| {
                let returns_void = d.as_function().is_some_and(|f| f.returns_void);
                (d.linkage_name.clone(), returns_void)
            });
            (t.resource(), wrapper)
        };
        let Some(handle) = resource else {
            let exec = if wrapper.is_some() {
                ExecutionResult::NoModule
            } else {
                ExecutionResult::Success
            };
            return (exec, Value::Invalid);
        };

        let init = self.run_static_init(handle);
        if init != ExecutionResult::Success {
            return (init, Value::Invalid);
        }
        let Some((name, returns_void)) = wrapper else {
            return (ExecutionResult::Success, Value::Invalid);
        };
        let Some((address, _guard)) = self.with_jit(|jit| {
            let address = jit.get_symbol_address(&name, false)?;
            Some((address, jit.guard(handle)))
        }) else {
            return (ExecutionResult::FunctionNotCompiled, Value::Invalid);
        };
        trace!(wrapper = %name, "running wrapper");
        // SAFETY: wrappers take no parameters and the guard keeps the
        // module loaded for the duration of the call.
        match unsafe { call_function(address as *const u8, &[]) } {
            Ok(_) if returns_void => (ExecutionResult::Success, Value::Void),
            Ok(v) => (ExecutionResult::Success, Value::Int(v)),
            Err(e) => {
                warn!(error = %e, "cannot run wrapper");
                (ExecutionResult::CompilationError, Value::Invalid)
            }
        }
    }

    /// Run the ctors of the code loaded for `id`'s outermost transaction,
    /// once.
    pub fn run_static_init_on_transaction(&self, id: TransactionId) -> ExecutionResult {
        if self.jit.is_none() {
            return ExecutionResult::NoCodeGen;
        }
        let resource = {
            let parser = self.parser.borrow();
            let root = parser.arena().topmost_parent(id);
            parser.arena().get(root).and_then(|t| t.resource())
        };
        match resource {
            Some(handle) => self.run_static_init(handle),
            None => ExecutionResult::Success,
        }
    }

    fn run_static_init(&self, handle: ResourceHandle) -> ExecutionResult {
        let Some((ctors, _guard)) = self.with_jit_mut(|jit| {
            let ctors = jit.take_pending_ctors(handle);
            (ctors, jit.guard(handle))
        }) else {
            return ExecutionResult::NoCodeGen;
        };
        for (name, address) in &ctors {
            trace!(ctor = %name, "running ctor");
            // SAFETY: ctors take no parameters; the guard keeps them loaded.
            if let Err(e) = unsafe { call_function(*address as *const u8, &[]) } {
                warn!(ctor = %name, error = %e, "static initialization failed");
                return ExecutionResult::CompilationError;
            }
        }
        ExecutionResult::Success
    }

    /// Generate and load code for a transaction committed by `parse`.
    pub fn emit_all_decls(&self, id: TransactionId) -> ExecutionResult {
        if self.jit.is_none() {
            return ExecutionResult::NoCodeGen;
        }
        let outcome = {
            let mut parser = self.parser.borrow_mut();
            let mut jit = self.jit.as_ref().map(|j| j.borrow_mut());
            parser.emit_all_decls(id, jit.as_deref_mut())
        };
        match outcome {
            Ok(()) => self.run_static_init_on_transaction(id),
            Err(EmitError::Load(LoadError::UnresolvedSymbols(_))) => {
                ExecutionResult::UnresolvedSymbols
            }
            Err(EmitError::NotCommitted(_)) => ExecutionResult::NoModule,
            Err(_) => ExecutionResult::CompilationError,
        }
    }

    /// Call a loaded function by source name.
    pub fn run_function(&self, name: &str, args: &[i64]) -> (ExecutionResult, Value) {
        if self.jit.is_none() {
            return (ExecutionResult::NoCodeGen, Value::Invalid);
        }
        let found = {
            let parser = self.parser.borrow();
            let decls = parser.decls();
            decls
                .lookup(name)
                .and_then(|id| decls.get(id))
                .and_then(|d| {
                    let f = d.as_function()?;
                    Some((d.linkage_name.clone(), f.params.len(), f.returns_void))
                })
        };
        let Some((linkage, arity, returns_void)) = found else {
            return (ExecutionResult::UnknownFunction, Value::Invalid);
        };
        if args.len() != arity || args.len() > MAX_CALL_ARGS {
            return (ExecutionResult::CompilationError, Value::Invalid);
        }
        let Some((address, _guard)) = self.with_jit(|jit| {
            let address = jit.get_symbol_address(&linkage, false)?;
            let guard = jit.owner_of(&linkage).and_then(|h| jit.guard(h));
            Some((address, guard))
        }) else {
            return (ExecutionResult::FunctionNotCompiled, Value::Invalid);
        };
        // SAFETY: the arity matches the declaration and the owner's guard
        // keeps the code loaded.
        match unsafe { call_function(address as *const u8, args) } {
            Ok(_) if returns_void => (ExecutionResult::Success, Value::Void),
            Ok(v) => (ExecutionResult::Success, Value::Int(v)),
            Err(_) => (ExecutionResult::CompilationError, Value::Invalid),
        }
    }

    fn with_jit<R>(&self, f: impl FnOnce(&IncrementalJit) -> Option<R>) -> Option<R> {
        let jit = self.jit.as_ref()?.borrow();
        f(&jit)
    }

    fn with_jit_mut<R>(&self, f: impl FnOnce(&mut IncrementalJit) -> R) -> Option<R> {
        let mut jit = self.jit.as_ref()?.borrow_mut();
        Some(f(&mut jit))
    }

    // === Unloading ===

    /// Unload up to `n` of the most recent transactions, newest first.
    /// Stops at the first one that cannot be unloaded and returns how many
    /// were.
    pub fn unload(&self, n: usize) -> usize {
        let mut done = 0;
        while done < n {
            let Some(last) = self.last_transaction() else {
                break;
            };
            if let Err(e) = self.unload_transaction(last) {
                debug!(transaction = %last, error = %e, "stopping unload");
                break;
            }
            done += 1;
        }
        done
    }

    pub fn unload_transaction(&self, id: TransactionId) -> Result<(), UnloadError> {
        let result = {
            let mut parser = self.parser.borrow_mut();
            let mut jit = self.jit.as_ref().map(|j| j.borrow_mut());
            parser.unload_transaction(id, jit.as_deref_mut())
        };
        self.dispatch_events();
        result
    }

    // === Symbols ===

    /// Compile `code` and return the address of the function `name` it
    /// defines. With `if_unique`, an already loaded `name` is returned
    /// without compiling anything.
    pub fn compile_function(&self, name: &str, code: &str, if_unique: bool) -> Option<usize> {
        if if_unique {
            if let Some(address) = self.address_of_global(name) {
                return Some(address);
            }
        }
        if self.declare(code) != CompilationResult::Success {
            return None;
        }
        self.address_of_global(name)
    }

    /// Address of a loaded function or variable, by source name. Falls back
    /// to the raw symbol name, the host process included.
    pub fn address_of_global(&self, name: &str) -> Option<usize> {
        let linkage = {
            let parser = self.parser.borrow();
            let decls = parser.decls();
            decls
                .lookup(name)
                .and_then(|id| decls.get(id))
                .map(|d| d.linkage_name.clone())
        };
        self.with_jit(|jit| {
            linkage
                .as_deref()
                .and_then(|l| jit.get_symbol_address(l, false))
                .or_else(|| jit.get_symbol_address(name, true))
        })
    }

    /// Bind `name` to `address` for code loaded from now on.
    pub fn add_or_replace_definition(&self, name: &str, address: usize) -> Option<usize> {
        self.with_jit_mut(|jit| jit.add_or_replace_definition(name, address))
            .flatten()
    }

    pub fn add_generator(&self, generator: Rc<dyn SymbolGenerator>) {
        self.with_jit_mut(|jit| jit.add_generator(generator));
    }

    /// This session's symbols, for another session to resolve against.
    pub fn generator(&self) -> Option<Rc<dyn SymbolGenerator>> {
        self.with_jit(|jit| Some(jit.generator()))
    }

    pub fn load_library(&self, path: &Path) -> Result<(), InterpreterError> {
        let Some(jit) = &self.jit else {
            return Ok(());
        };
        jit.borrow_mut()
            .load_library(path)
            .map_err(|e| InterpreterError::Library {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Declare the contents of a source file.
    pub fn load_file(&self, path: &Path) -> Result<CompilationResult, InterpreterError> {
        let text = std::fs::read_to_string(path).map_err(|source| InterpreterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.declare(&text))
    }

    pub fn create_unique_name(&self) -> String {
        let n = self.unique_counter.get() + 1;
        self.unique_counter.set(n);
        format!("{}_{}", UNIQUE_PREFIX, n)
    }

    pub fn is_unique_name(&self, name: &str) -> bool {
        name.starts_with(UNIQUE_PREFIX)
    }

    pub fn macro_value(&self, name: &str) -> Option<String> {
        self.parser
            .borrow()
            .decls()
            .macro_definition(name)
            .map(|m| m.body.clone())
    }

    // === Transactions and diagnostics ===

    pub fn push_transaction(&self) -> PushTransaction<'_> {
        PushTransaction::new(self)
    }

    pub fn replace_diagnostic_consumer(
        &self,
        consumer: Box<dyn DiagnosticConsumer>,
    ) -> DiagnosticConsumerGuard<'_> {
        DiagnosticConsumerGuard::new(self, consumer)
    }

    /// Everything reported since the last call.
    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        self.parser.borrow_mut().diags_mut().take_pending()
    }

    pub fn set_callbacks(&self, callbacks: Option<Box<dyn InterpreterCallbacks>>) {
        *self.callbacks.borrow_mut() = callbacks;
    }

    /// Deliver parser events to the callbacks, with no borrow held.
    pub(crate) fn dispatch_events(&self) {
        let events = self.parser.borrow_mut().take_events();
        if events.is_empty() {
            return;
        }
        let Some(mut callbacks) = self.callbacks.borrow_mut().take() else {
            return;
        };
        for event in events {
            match event {
                ParserEvent::Committed(id) => callbacks.transaction_committed(id),
                ParserEvent::RolledBack(id) => callbacks.transaction_rolled_back(id),
                ParserEvent::Unloaded(id) => callbacks.transaction_unloaded(id),
            }
        }
        let mut slot = self.callbacks.borrow_mut();
        if slot.is_none() {
            *slot = Some(callbacks);
        }
    }

    pub fn first_transaction(&self) -> Option<TransactionId> {
        self.parser.borrow().first_transaction()
    }

    pub fn last_transaction(&self) -> Option<TransactionId> {
        self.parser.borrow().last_transaction()
    }

    pub fn current_transaction(&self) -> Option<TransactionId> {
        self.parser.borrow().current_transaction()
    }

    pub fn parser(&self) -> Ref<'_, IncrementalParser> {
        self.parser.borrow()
    }

    pub fn jit(&self) -> Option<Ref<'_, IncrementalJit>> {
        self.jit.as_ref().map(|j| j.borrow())
    }

    pub fn print_transaction_structure(&self, out: &mut impl fmt::Write) -> fmt::Result {
        self.parser.borrow().print_transaction_structure(out)
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("codegen", &self.jit.is_some())
            .field("runtime", &self.runtime.get())
            .finish()
    }
}

/// `Auto` prints unless the input ends with a semicolon.
fn resolve_value_printing(printing: ValuePrinting, input: &str) -> ValuePrinting {
    match printing {
        ValuePrinting::Auto if input.trim_end().ends_with(';') => ValuePrinting::Disabled,
        ValuePrinting::Auto => ValuePrinting::Enabled,
        other => other,
    }
}
