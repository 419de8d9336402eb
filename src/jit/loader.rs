//! The incremental loader
//!
//! `IncrementalJit` owns the boundary between generated code and the
//! running process. Each loaded module gets a `ResourceHandle`; the handle's
//! tracker remembers exactly which session symbols it installed, which other
//! handles it imports from, its private weak copies, and its ctors, so that
//! removing it undoes precisely its own effect.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::{Rc, Weak};

use cranelift_codegen::isa::OwnedTargetIsa;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::error::LoadError;
use crate::lir::{CodeModule, Import, SymbolLinkage};
use crate::transaction::TransactionId;

use super::code::{call_function, LoadedCode};
use super::compiler::{build_isa, ModuleCompiler};
use super::host::HostSymbols;
use super::policy::{reuse_existing_weak_symbols, HostLookupPolicy, LoaderConfig};
use super::{JitError, ResourceHandle};

/// Highest optimization level with its own ISA.
const MAX_OPT_LEVEL: u8 = 3;

/// A source of symbol addresses outside this loader, typically another
/// session's loader.
pub trait SymbolGenerator {
    fn lookup(&self, name: &str) -> Option<usize>;

    /// Resolve `name` for code that will call into it. The pin keeps the
    /// defining module loaded until it is dropped.
    fn import(&self, name: &str) -> Option<(usize, Option<ImportPin>)> {
        self.lookup(name).map(|address| (address, None))
    }
}

/// Counts one importing module in another session. While any pin on a
/// handle is alive, that handle cannot be removed.
#[derive(Debug)]
pub struct ImportPin(Rc<Cell<u32>>);

impl ImportPin {
    fn new(users: Rc<Cell<u32>>) -> Self {
        users.set(users.get() + 1);
        ImportPin(users)
    }
}

impl Drop for ImportPin {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

#[derive(Debug, Clone, Copy)]
struct SymbolEntry {
    address: usize,
    /// `None` for definitions injected with `add_or_replace_definition`.
    owner: Option<ResourceHandle>,
}

#[derive(Default)]
struct SymbolTable {
    entries: FxHashMap<String, SymbolEntry>,
    /// Per handle, how many modules of other sessions import from it.
    external_users: FxHashMap<ResourceHandle, Rc<Cell<u32>>>,
}

impl SymbolTable {
    fn external_users(&self, handle: ResourceHandle) -> u32 {
        self.external_users.get(&handle).map_or(0, |c| c.get())
    }
}

/// Read-only view of a loader's symbols for other sessions.
struct SessionSymbols(Weak<RefCell<SymbolTable>>);

impl SymbolGenerator for SessionSymbols {
    fn lookup(&self, name: &str) -> Option<usize> {
        let table = self.0.upgrade()?;
        let table = table.try_borrow().ok()?;
        table.entries.get(name).map(|e| e.address)
    }

    fn import(&self, name: &str) -> Option<(usize, Option<ImportPin>)> {
        let table = self.0.upgrade()?;
        let table = table.try_borrow().ok()?;
        let entry = table.entries.get(name)?;
        let pin = entry
            .owner
            .and_then(|h| table.external_users.get(&h))
            .map(|users| ImportPin::new(users.clone()));
        Some((entry.address, pin))
    }
}

struct Tracker {
    transaction: TransactionId,
    code: Option<LoadedCode>,
    /// Session symbols this handle installed.
    defined: Vec<String>,
    /// Private copies of weak functions owned by another handle.
    standby: Vec<(String, usize)>,
    imports_from: FxHashSet<ResourceHandle>,
    /// Handles in other sessions this one imports from.
    pins: Vec<ImportPin>,
    ctors: Vec<(String, usize)>,
    ctors_ran: bool,
    active: Rc<Cell<u32>>,
}

/// Where an import was found.
enum Resolved {
    /// This session's table; `owner` is `None` for injected definitions.
    Local {
        address: usize,
        owner: Option<ResourceHandle>,
    },
    /// Another session or the host process.
    External {
        address: usize,
        pin: Option<ImportPin>,
    },
}

/// Marks a handle's code as executing. Removal fails while one is alive.
#[derive(Debug)]
pub struct ExecutionGuard(Rc<Cell<u32>>);

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

pub struct IncrementalJit {
    config: LoaderConfig,
    symbols: Rc<RefCell<SymbolTable>>,
    trackers: FxHashMap<ResourceHandle, Tracker>,
    load_order: Vec<ResourceHandle>,
    isas: Vec<Option<OwnedTargetIsa>>,
    host: HostSymbols,
    generators: Vec<Rc<dyn SymbolGenerator>>,
    forbidden: FxHashSet<String>,
    next_handle: u64,
}

impl IncrementalJit {
    /// Create a loader. Fails when the native target cannot be configured.
    pub fn new(config: LoaderConfig) -> Result<Self, JitError> {
        let mut jit = IncrementalJit {
            config,
            symbols: Rc::new(RefCell::new(SymbolTable::default())),
            trackers: FxHashMap::default(),
            load_order: Vec::new(),
            isas: vec![None; MAX_OPT_LEVEL as usize + 1],
            host: HostSymbols::new(),
            generators: Vec::new(),
            forbidden: FxHashSet::default(),
            next_handle: 1,
        };
        jit.isa(1)?;
        Ok(jit)
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn host_lookup(&self) -> &HostLookupPolicy {
        &self.config.host_lookup
    }

    fn isa(&mut self, opt_level: u8) -> Result<OwnedTargetIsa, JitError> {
        let level = opt_level.min(MAX_OPT_LEVEL);
        let slot = &mut self.isas[level as usize];
        if let Some(isa) = slot {
            return Ok(isa.clone());
        }
        let isa = build_isa(level)?;
        *slot = Some(isa.clone());
        Ok(isa)
    }

    /// Compile and link `module`, returning the handle that owns it.
    pub fn add_module(
        &mut self,
        transaction: TransactionId,
        mut module: CodeModule,
        opt_level: u8,
    ) -> Result<ResourceHandle, LoadError> {
        let standby_names = {
            let table = self.symbols.borrow();
            reuse_existing_weak_symbols(
                &mut module,
                |name| table.entries.contains_key(name),
                self.config.weak_inline_threshold,
            )
        };
        {
            let table = self.symbols.borrow();
            let strong = module
                .functions
                .iter()
                .map(|f| (f.name.as_str(), f.linkage))
                .chain(module.globals.iter().map(|g| (g.name.as_str(), g.linkage)));
            for (name, linkage) in strong {
                if linkage == SymbolLinkage::External && table.entries.contains_key(name) {
                    return Err(LoadError::DuplicateDefinition(name.to_string()));
                }
            }
        }

        let mut resolved: Vec<(Import, usize)> = Vec::new();
        let mut unresolved = Vec::new();
        let mut imports_from = FxHashSet::default();
        let mut pins = Vec::new();
        for import in module.imports() {
            match self.resolve(&import.name) {
                Some(Resolved::Local { address, owner }) => {
                    imports_from.extend(owner);
                    resolved.push((import, address));
                }
                Some(Resolved::External { address, pin }) => {
                    pins.extend(pin);
                    resolved.push((import, address));
                }
                None => unresolved.push(import.name),
            }
        }
        if !unresolved.is_empty() {
            return Err(LoadError::UnresolvedSymbols(unresolved));
        }

        let isa = self.isa(opt_level)?;
        let compiled = ModuleCompiler::new(isa, &resolved)?.compile(&module)?;

        let mut ctors = Vec::with_capacity(module.ctors.len());
        for name in &module.ctors {
            match compiled.address_of(name) {
                Some(address) => ctors.push((name.clone(), address)),
                None => {
                    unsafe { compiled.code.release() };
                    return Err(JitError::InvalidLir(format!("ctor {} is not defined", name)).into());
                }
            }
        }
        let standby = standby_names
            .into_iter()
            .filter_map(|name| compiled.address_of(&name).map(|a| (name, a)))
            .collect();

        let handle = ResourceHandle(self.next_handle);
        self.next_handle += 1;
        let mut defined = Vec::new();
        {
            let mut table = self.symbols.borrow_mut();
            table
                .external_users
                .insert(handle, Rc::new(Cell::new(0)));
            for sym in compiled
                .defined
                .iter()
                .filter(|d| d.linkage != SymbolLinkage::Internal)
            {
                table.entries.insert(
                    sym.name.clone(),
                    SymbolEntry {
                        address: sym.address,
                        owner: Some(handle),
                    },
                );
                defined.push(sym.name.clone());
            }
        }

        debug!(
            transaction = %transaction,
            handle = %handle,
            module = %module.name,
            symbols = defined.len(),
            imports = resolved.len(),
            "module added"
        );
        if self.config.verbose {
            debug!(instructions = module.instruction_count(), "module size");
        }
        self.trackers.insert(
            handle,
            Tracker {
                transaction,
                code: Some(compiled.code),
                defined,
                standby,
                imports_from,
                pins,
                ctors,
                ctors_ran: false,
                active: Rc::new(Cell::new(0)),
            },
        );
        self.load_order.push(handle);
        Ok(handle)
    }

    fn resolve(&self, name: &str) -> Option<Resolved> {
        if let Some(entry) = self.symbols.borrow().entries.get(name) {
            return Some(Resolved::Local {
                address: entry.address,
                owner: entry.owner,
            });
        }
        if let Some((address, pin)) = self.generators.iter().find_map(|g| g.import(name)) {
            return Some(Resolved::External { address, pin });
        }
        self.host_address(name)
            .map(|address| Resolved::External { address, pin: None })
    }

    fn host_address(&self, name: &str) -> Option<usize> {
        if self.config.host_lookup.skip_host_lookup() || self.forbidden.contains(name) {
            return None;
        }
        self.host.lookup(name)
    }

    /// Address of `name`: loaded code first, then other sessions, then, if
    /// asked, the host process.
    pub fn get_symbol_address(&self, name: &str, include_host: bool) -> Option<usize> {
        if let Some(entry) = self.symbols.borrow().entries.get(name) {
            return Some(entry.address);
        }
        if let Some(address) = self.generators.iter().find_map(|g| g.lookup(name)) {
            return Some(address);
        }
        if include_host {
            return self.host_address(name);
        }
        None
    }

    /// Whether the session already defines `name`, here or in a generator.
    pub fn does_symbol_already_exist(&self, name: &str) -> bool {
        self.symbols.borrow().entries.contains_key(name)
            || self.generators.iter().any(|g| g.lookup(name).is_some())
    }

    /// Handle whose definition of `name` is live.
    pub fn owner_of(&self, name: &str) -> Option<ResourceHandle> {
        self.symbols.borrow().entries.get(name).and_then(|e| e.owner)
    }

    pub fn remove_module(&mut self, handle: ResourceHandle) -> Result<(), LoadError> {
        self.remove_modules(&[handle])
    }

    /// Remove several handles at once. Either all of them are removed or,
    /// if any is still in use, none.
    pub fn remove_modules(&mut self, handles: &[ResourceHandle]) -> Result<(), LoadError> {
        let set: FxHashSet<ResourceHandle> = handles.iter().copied().collect();
        for h in handles {
            let Some(t) = self.trackers.get(h) else {
                continue;
            };
            if t.active.get() > 0 {
                return Err(LoadError::InUse {
                    transaction: t.transaction,
                    reason: "its code is executing".to_string(),
                });
            }
            if let Some((_, user)) = self
                .trackers
                .iter()
                .find(|(oh, o)| !set.contains(oh) && o.imports_from.contains(h))
            {
                return Err(LoadError::InUse {
                    transaction: t.transaction,
                    reason: format!("transaction {} uses its symbols", user.transaction),
                });
            }
            let users = self.symbols.borrow().external_users(*h);
            if users > 0 {
                return Err(LoadError::InUse {
                    transaction: t.transaction,
                    reason: format!("{} module(s) of another session use its symbols", users),
                });
            }
        }

        for h in handles {
            let Some(t) = self.trackers.remove(h) else {
                continue;
            };
            self.load_order.retain(|x| x != h);
            {
                let mut table = self.symbols.borrow_mut();
                table.external_users.remove(h);
                for name in &t.defined {
                    if table.entries.get(name).is_some_and(|e| e.owner == Some(*h)) {
                        table.entries.remove(name);
                    }
                }
            }
            for name in &t.defined {
                self.promote_standby(name);
            }
            if let Some(code) = t.code {
                // Nothing executes it and no live handle imports from it.
                unsafe { code.release() };
            }
            debug!(transaction = %t.transaction, handle = %h, "module removed");
        }
        Ok(())
    }

    /// Make the oldest private copy of `name` the session definition.
    fn promote_standby(&mut self, name: &str) {
        if self.symbols.borrow().entries.contains_key(name) {
            return;
        }
        for h in &self.load_order {
            let Some(t) = self.trackers.get_mut(h) else {
                continue;
            };
            if let Some(pos) = t.standby.iter().position(|(n, _)| n == name) {
                let (name, address) = t.standby.remove(pos);
                trace!(symbol = %name, handle = %h, "promoted standby definition");
                self.symbols.borrow_mut().entries.insert(
                    name.clone(),
                    SymbolEntry {
                        address,
                        owner: Some(*h),
                    },
                );
                t.defined.push(name);
                return;
            }
        }
    }

    /// Bind `name` to a known address, replacing any current definition.
    /// Returns the previous address.
    pub fn add_or_replace_definition(&mut self, name: &str, address: usize) -> Option<usize> {
        self.symbols
            .borrow_mut()
            .entries
            .insert(
                name.to_string(),
                SymbolEntry {
                    address,
                    owner: None,
                },
            )
            .map(|e| e.address)
    }

    /// Ctors of `handle` that have not run yet. They are considered run
    /// from this point on.
    pub fn take_pending_ctors(&mut self, handle: ResourceHandle) -> Vec<(String, usize)> {
        match self.trackers.get_mut(&handle) {
            Some(t) if !t.ctors_ran => {
                t.ctors_ran = true;
                t.ctors.clone()
            }
            _ => Vec::new(),
        }
    }

    /// Run the pending ctors of `handle`, returning how many ran.
    ///
    /// Only for callers that do not share the loader with the code being
    /// run; sessions take the ctors and call them without holding the
    /// loader.
    pub fn run_ctors(&mut self, handle: ResourceHandle) -> Result<usize, JitError> {
        let ctors = self.take_pending_ctors(handle);
        let _guard = self.guard(handle);
        for (name, address) in &ctors {
            trace!(ctor = %name, "running ctor");
            unsafe { call_function(*address as *const u8, &[]) }?;
        }
        Ok(ctors.len())
    }

    pub fn guard(&self, handle: ResourceHandle) -> Option<ExecutionGuard> {
        let t = self.trackers.get(&handle)?;
        t.active.set(t.active.get() + 1);
        Some(ExecutionGuard(t.active.clone()))
    }

    pub fn add_generator(&mut self, generator: Rc<dyn SymbolGenerator>) {
        self.generators.push(generator);
    }

    /// This loader's symbols as a generator for another session.
    pub fn generator(&self) -> Rc<dyn SymbolGenerator> {
        Rc::new(SessionSymbols(Rc::downgrade(&self.symbols)))
    }

    pub fn load_library(&mut self, path: &Path) -> Result<(), libloading::Error> {
        self.host.load_library(path)
    }

    /// Never resolve `name` from the host process.
    pub fn forbid_host_symbol(&mut self, name: &str) {
        self.forbidden.insert(name.to_string());
    }

    pub fn is_loaded(&self, handle: ResourceHandle) -> bool {
        self.trackers.contains_key(&handle)
    }

    pub fn num_loaded(&self) -> usize {
        self.trackers.len()
    }

    pub fn transaction_of(&self, handle: ResourceHandle) -> Option<TransactionId> {
        self.trackers.get(&handle).map(|t| t.transaction)
    }

    /// Session symbols currently owned by `handle`, sorted.
    pub fn defined_symbols(&self, handle: ResourceHandle) -> Vec<String> {
        let mut names = self
            .trackers
            .get(&handle)
            .map(|t| t.defined.clone())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl std::fmt::Debug for IncrementalJit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalJit")
            .field("loaded", &self.load_order)
            .field("symbols", &self.symbols.borrow().entries.len())
            .finish()
    }
}
