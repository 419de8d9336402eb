//! Loader configuration and the weak definition reuse policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::lir::{CodeModule, SymbolLinkage};

/// Shared switch that disables symbol lookup in the host process.
///
/// Cloning shares the switch, so a parent session and its children can be
/// toggled together without rebuilding their loaders.
#[derive(Debug, Clone, Default)]
pub struct HostLookupPolicy(Arc<AtomicBool>);

impl HostLookupPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_host_lookup(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set_skip_host_lookup(&self, skip: bool) {
        self.0.store(skip, Ordering::Relaxed);
    }

    /// Whether both policies are the same shared switch.
    pub fn is_shared_with(&self, other: &HostLookupPolicy) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// A duplicate weak function with fewer instructions than this keeps a
    /// private copy of its body instead of becoming an import.
    pub weak_inline_threshold: usize,
    pub host_lookup: HostLookupPolicy,
    pub verbose: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            weak_inline_threshold: 50,
            host_lookup: HostLookupPolicy::new(),
            verbose: false,
        }
    }
}

/// Strip weak definitions the session already has.
///
/// Weak globals always become imports. Weak functions become imports unless
/// they are below `threshold`, in which case they are kept as private copies.
/// Returns the names of those private copies.
pub(crate) fn reuse_existing_weak_symbols(
    module: &mut CodeModule,
    exists: impl Fn(&str) -> bool,
    threshold: usize,
) -> Vec<String> {
    module.globals.retain(|g| {
        let reuse = g.linkage == SymbolLinkage::Weak && exists(&g.name);
        if reuse {
            warn!(symbol = %g.name, "weak global already defined, reusing it");
        }
        !reuse
    });

    let mut standby = Vec::new();
    module.functions.retain_mut(|f| {
        if f.linkage != SymbolLinkage::Weak || !exists(&f.name) {
            return true;
        }
        if f.instruction_count() >= threshold {
            warn!(symbol = %f.name, "weak function already defined, reusing it");
            return false;
        }
        f.linkage = SymbolLinkage::Internal;
        standby.push(f.name.clone());
        true
    });
    standby
}
