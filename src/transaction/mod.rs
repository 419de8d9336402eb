//! Transactions
//!
//! A transaction is the atomic record of everything the frontend produced
//! for one fragment: declaration batches in arrival order, macro directives,
//! nested child transactions, and, once generated and loaded, the code
//! module and the loader's resource handle.
//!
//! ## State machine
//!
//! ```text
//! Collecting -> Completed -> Committed
//!      |            |-----> RolledBack
//!      |            `-----> RolledBackWithErrors
//!      `------------------> RolledBack / RolledBackWithErrors (abandoned)
//! ```
//!
//! Transactions refer to each other by `TransactionId`; the tree itself
//! lives in the `TransactionArena`.

mod arena;
mod options;

pub use arena::TransactionArena;
pub use options::{CompilationOptions, InvocationOptions, RuntimeOptions, ValuePrinting};

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use smallvec::SmallVec;

use crate::ast::{is_wrapper, DeclId, DeclStore};
use crate::error::TransactionError;
use crate::jit::ResourceHandle;
use crate::lir::CodeModule;
use crate::source::FileId;

static NEXT_TRANSACTION_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique transaction identity. Never reused, even when the
/// transaction object itself is recycled through the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(u32);

impl TransactionId {
    pub(crate) fn next() -> Self {
        TransactionId(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Collecting,
    Completed,
    RolledBack,
    RolledBackWithErrors,
    Committed,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            State::RolledBack | State::RolledBackWithErrors | State::Committed
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Collecting => "Collecting",
            State::Completed => "Completed",
            State::RolledBack => "RolledBack",
            State::RolledBackWithErrors => "RolledBackWithErrors",
            State::Committed => "Committed",
        };
        f.write_str(name)
    }
}

/// Worst diagnostic level seen while the transaction tree was collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum IssuedDiags {
    #[default]
    None,
    Warnings,
    Errors,
}

/// Which frontend callback produced a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerCallInfo {
    None,
    HandleTopLevelDecl,
    HandleInterestingDecl,
    HandleTagDeclDefinition,
    HandleVTable,
    HandleImplicitFunctionInstantiation,
    HandleStaticMemberVarInstantiation,
    CompleteTentativeDefinition,
}

impl fmt::Display for ConsumerCallInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerCallInfo::None => "None",
            ConsumerCallInfo::HandleTopLevelDecl => "HandleTopLevelDecl",
            ConsumerCallInfo::HandleInterestingDecl => "HandleInterestingDecl",
            ConsumerCallInfo::HandleTagDeclDefinition => "HandleTagDeclDefinition",
            ConsumerCallInfo::HandleVTable => "HandleVTable",
            ConsumerCallInfo::HandleImplicitFunctionInstantiation => {
                "HandleImplicitFunctionInstantiation"
            }
            ConsumerCallInfo::HandleStaticMemberVarInstantiation => {
                "HandleStaticMemberVarInstantiation"
            }
            ConsumerCallInfo::CompleteTentativeDefinition => "CompleteTentativeDefinition",
        };
        f.write_str(name)
    }
}

/// Sibling declarations reported together. Almost always a single one.
pub type DeclGroup = SmallVec<[DeclId; 4]>;

/// One batch: a declaration group plus the callback that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayCallInfo {
    pub group: DeclGroup,
    pub call: ConsumerCallInfo,
}

impl DelayCallInfo {
    pub fn new(group: DeclGroup, call: ConsumerCallInfo) -> Self {
        DelayCallInfo { group, call }
    }

    pub fn single(decl: DeclId, call: ConsumerCallInfo) -> Self {
        let mut group = DeclGroup::new();
        group.push(decl);
        DelayCallInfo { group, call }
    }

    pub fn is_single_decl(&self) -> bool {
        self.group.len() == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroDirective {
    Define { body: String },
    /// Records the definition the `#undef` removed so it can be reinstated.
    Undefine { previous: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDirectiveInfo {
    pub name: String,
    pub directive: MacroDirective,
}

pub struct Transaction {
    id: TransactionId,
    state: State,
    issued_diags: IssuedDiags,
    opts: CompilationOptions,
    decl_queue: Vec<DelayCallInfo>,
    deserialized_decl_queue: Vec<DelayCallInfo>,
    macro_queue: Vec<MacroDirectiveInfo>,
    nested: Vec<TransactionId>,
    parent: Option<TransactionId>,
    next: Option<TransactionId>,
    wrapper: Option<DeclId>,
    module: Option<CodeModule>,
    resource: Option<ResourceHandle>,
    shadow_namespace: Option<String>,
    buffer: Option<FileId>,
    /// Number of batches of `decl_queue` already handed to codegen.
    emitted: usize,
    unloading: bool,
}

impl Transaction {
    pub(crate) fn new(opts: CompilationOptions) -> Self {
        Transaction {
            id: TransactionId::next(),
            state: State::Collecting,
            issued_diags: IssuedDiags::None,
            opts,
            decl_queue: Vec::new(),
            deserialized_decl_queue: Vec::new(),
            macro_queue: Vec::new(),
            nested: Vec::new(),
            parent: None,
            next: None,
            wrapper: None,
            module: None,
            resource: None,
            shadow_namespace: None,
            buffer: None,
            emitted: 0,
            unloading: false,
        }
    }

    /// Recycle a pooled transaction: fresh id, empty queues, keep capacity.
    pub(crate) fn reset(&mut self, opts: CompilationOptions) {
        self.id = TransactionId::next();
        self.state = State::Collecting;
        self.issued_diags = IssuedDiags::None;
        self.opts = opts;
        self.decl_queue.clear();
        self.deserialized_decl_queue.clear();
        self.macro_queue.clear();
        self.nested.clear();
        self.parent = None;
        self.next = None;
        self.wrapper = None;
        self.module = None;
        self.resource = None;
        self.shadow_namespace = None;
        self.buffer = None;
        self.emitted = 0;
        self.unloading = false;
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Advance the state machine. Only the documented edges are accepted.
    pub fn set_state(&mut self, to: State) -> Result<(), TransactionError> {
        let allowed = match (self.state, to) {
            (State::Collecting, State::Completed) => true,
            (State::Collecting | State::Completed, State::RolledBack) => true,
            (State::Collecting | State::Completed, State::RolledBackWithErrors) => true,
            (State::Completed, State::Committed) => true,
            _ => false,
        };
        if !allowed {
            return Err(TransactionError::InvalidTransition {
                id: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.state != State::Collecting
    }

    pub fn is_committed(&self) -> bool {
        self.state == State::Committed
    }

    /// Diagnostic level recorded on this node. The authoritative value for
    /// a tree is the root's; see `TransactionArena::issued_diags`.
    pub(crate) fn local_issued_diags(&self) -> IssuedDiags {
        self.issued_diags
    }

    pub(crate) fn set_local_issued_diags(&mut self, diags: IssuedDiags) {
        self.issued_diags = diags;
    }

    pub fn options(&self) -> &CompilationOptions {
        &self.opts
    }

    pub fn set_options(&mut self, opts: CompilationOptions) -> Result<(), TransactionError> {
        if self.state != State::Collecting {
            return Err(TransactionError::OptionsFrozen(self.id));
        }
        self.opts = opts;
        Ok(())
    }

    /// Append a batch while collecting.
    pub fn append(&mut self, batch: DelayCallInfo, decls: &DeclStore) -> Result<(), TransactionError> {
        if self.state != State::Collecting {
            return Err(TransactionError::NotCollecting {
                id: self.id,
                state: self.state,
            });
        }
        self.force_append(batch, decls)
    }

    /// Append even after completion. Callers retrofitting declarations this
    /// way are responsible for getting them generated.
    pub fn force_append(&mut self, batch: DelayCallInfo, decls: &DeclStore) -> Result<(), TransactionError> {
        if self.state.is_terminal() {
            return Err(TransactionError::NotCollecting {
                id: self.id,
                state: self.state,
            });
        }
        if batch.group.is_empty() {
            return Err(TransactionError::EmptyGroup);
        }
        if self.wrapper.is_none() && batch.is_single_decl() {
            let decl = batch.group[0];
            if decls.get(decl).is_some_and(is_wrapper) {
                self.wrapper = Some(decl);
            }
        }
        let deserialized = batch
            .group
            .iter()
            .all(|id| decls.get(*id).is_some_and(|d| d.from_ast_file));
        if deserialized {
            self.deserialized_decl_queue.push(batch);
        } else {
            self.decl_queue.push(batch);
        }
        Ok(())
    }

    pub fn append_macro(&mut self, info: MacroDirectiveInfo) -> Result<(), TransactionError> {
        if self.state != State::Collecting {
            return Err(TransactionError::NotCollecting {
                id: self.id,
                state: self.state,
            });
        }
        self.macro_queue.push(info);
        Ok(())
    }

    pub fn decls(&self) -> &[DelayCallInfo] {
        &self.decl_queue
    }

    pub fn deserialized_decls(&self) -> &[DelayCallInfo] {
        &self.deserialized_decl_queue
    }

    pub fn macros(&self) -> &[MacroDirectiveInfo] {
        &self.macro_queue
    }

    pub fn first_decl(&self) -> Option<&DeclGroup> {
        self.decl_queue.first().map(|b| &b.group)
    }

    /// The final batch. Only meaningful once collecting has ended.
    pub fn last_decl(&self) -> Result<Option<&DeclGroup>, TransactionError> {
        if !self.is_completed() {
            return Err(TransactionError::NotCompleted { id: self.id });
        }
        Ok(self.decl_queue.last().map(|b| &b.group))
    }

    /// The batch most recently appended so far, whatever the state.
    pub fn current_last_decl(&self) -> Option<&DeclGroup> {
        self.decl_queue.last().map(|b| &b.group)
    }

    pub fn contains_named_decl(&self, name: &str, decls: &DeclStore) -> Option<DeclId> {
        self.decl_queue
            .iter()
            .flat_map(|b| b.group.iter())
            .copied()
            .find(|id| decls.get(*id).is_some_and(|d| d.name == name))
    }

    /// Remove the batch at `index`.
    pub fn erase(&mut self, index: usize) -> Option<DelayCallInfo> {
        if index >= self.decl_queue.len() {
            return None;
        }
        if index < self.emitted {
            self.emitted -= 1;
        }
        Some(self.decl_queue.remove(index))
    }

    /// Drop all batches and macros. Nested transactions are untouched.
    pub fn clear(&mut self) {
        self.decl_queue.clear();
        self.deserialized_decl_queue.clear();
        self.macro_queue.clear();
        self.emitted = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.decl_queue.is_empty()
            && self.deserialized_decl_queue.is_empty()
            && self.macro_queue.is_empty()
            && self.nested.is_empty()
    }

    pub fn nested(&self) -> &[TransactionId] {
        &self.nested
    }

    pub fn last_nested(&self) -> Option<TransactionId> {
        self.nested.last().copied()
    }

    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    pub fn parent(&self) -> Option<TransactionId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<TransactionId>) {
        self.parent = parent;
    }

    pub(crate) fn push_nested(&mut self, child: TransactionId) {
        self.nested.push(child);
    }

    pub(crate) fn remove_nested(&mut self, child: TransactionId) -> bool {
        let before = self.nested.len();
        self.nested.retain(|c| *c != child);
        self.nested.len() != before
    }

    /// Successor in session history.
    pub fn next(&self) -> Option<TransactionId> {
        self.next
    }

    pub(crate) fn set_next(&mut self, next: Option<TransactionId>) {
        self.next = next;
    }

    pub fn wrapper(&self) -> Option<DeclId> {
        self.wrapper
    }

    pub fn module(&self) -> Option<&CodeModule> {
        self.module.as_ref()
    }

    pub(crate) fn take_module(&mut self) -> Option<CodeModule> {
        self.module.take()
    }

    /// Store a generated module, merging into one produced earlier.
    pub(crate) fn add_module(&mut self, module: CodeModule) {
        match &mut self.module {
            Some(existing) => existing.merge(module),
            None => self.module = Some(module),
        }
    }

    pub fn resource(&self) -> Option<ResourceHandle> {
        self.resource
    }

    pub(crate) fn set_resource(&mut self, handle: Option<ResourceHandle>) {
        self.resource = handle;
    }

    pub fn shadow_namespace(&self) -> Option<&str> {
        self.shadow_namespace.as_deref()
    }

    pub(crate) fn set_shadow_namespace(&mut self, ns: String) {
        self.shadow_namespace = Some(ns);
    }

    pub fn buffer(&self) -> Option<FileId> {
        self.buffer
    }

    pub(crate) fn set_buffer(&mut self, fid: FileId) {
        self.buffer = Some(fid);
    }

    pub(crate) fn emitted(&self) -> usize {
        self.emitted
    }

    pub(crate) fn mark_emitted(&mut self, upto: usize) {
        self.emitted = upto.min(self.decl_queue.len());
    }

    pub fn is_unloading(&self) -> bool {
        self.unloading
    }

    pub(crate) fn set_unloading(&mut self, unloading: bool) {
        self.unloading = unloading;
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("decls", &self.decl_queue.len())
            .field("deserialized", &self.deserialized_decl_queue.len())
            .field("macros", &self.macro_queue.len())
            .field("nested", &self.nested)
            .field("parent", &self.parent)
            .finish()
    }
}
