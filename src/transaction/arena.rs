use std::fmt::{self, Write};

use rustc_hash::FxHashMap;

use super::{CompilationOptions, IssuedDiags, Transaction, TransactionId};
use crate::error::TransactionError;

/// Released transactions kept around for reuse.
const POOL_CAPACITY: usize = 8;

/// Owner of every live transaction, plus a small recycling pool.
///
/// Parent and child links are ids into this arena, so a child has exactly
/// one parent and the nesting forms a tree.
pub struct TransactionArena {
    live: FxHashMap<TransactionId, Transaction>,
    pool: Vec<Transaction>,
}

impl TransactionArena {
    pub fn new() -> Self {
        TransactionArena {
            live: FxHashMap::default(),
            pool: Vec::with_capacity(POOL_CAPACITY),
        }
    }

    /// Take a transaction from the pool, or allocate one, in `Collecting`.
    pub fn create(&mut self, opts: CompilationOptions) -> TransactionId {
        let t = match self.pool.pop() {
            Some(mut t) => {
                t.reset(opts);
                t
            }
            None => Transaction::new(opts),
        };
        let id = t.id();
        self.live.insert(id, t);
        id
    }

    pub fn get(&self, id: TransactionId) -> Option<&Transaction> {
        self.live.get(&id)
    }

    pub fn get_mut(&mut self, id: TransactionId) -> Option<&mut Transaction> {
        self.live.get_mut(&id)
    }

    pub(crate) fn require(&self, id: TransactionId) -> Result<&Transaction, TransactionError> {
        self.live.get(&id).ok_or(TransactionError::Unknown(id))
    }

    pub(crate) fn require_mut(
        &mut self,
        id: TransactionId,
    ) -> Result<&mut Transaction, TransactionError> {
        self.live.get_mut(&id).ok_or(TransactionError::Unknown(id))
    }

    pub fn contains(&self, id: TransactionId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn pooled(&self) -> usize {
        self.pool.len()
    }

    /// Make `child` the last nested transaction of `parent`.
    pub fn add_nested(
        &mut self,
        parent: TransactionId,
        child: TransactionId,
    ) -> Result<(), TransactionError> {
        self.require(parent)?;
        if let Some(existing) = self.require(child)?.parent() {
            return Err(TransactionError::AlreadyNested { child, parent: existing });
        }
        if child == parent || self.ancestors(parent).contains(&child) {
            return Err(TransactionError::Cycle { child, parent });
        }
        self.require_mut(child)?.set_parent(Some(parent));
        self.require_mut(parent)?.push_nested(child);
        Ok(())
    }

    /// Detach `child` from `parent`. The child becomes a root.
    pub fn remove_nested(
        &mut self,
        parent: TransactionId,
        child: TransactionId,
    ) -> Result<(), TransactionError> {
        if self.require_mut(parent)?.remove_nested(child) {
            self.require_mut(child)?.set_parent(None);
        }
        Ok(())
    }

    fn ancestors(&self, id: TransactionId) -> Vec<TransactionId> {
        let mut out = Vec::new();
        let mut cur = self.get(id).and_then(|t| t.parent());
        while let Some(p) = cur {
            out.push(p);
            cur = self.get(p).and_then(|t| t.parent());
        }
        out
    }

    /// Root of the tree `id` belongs to.
    pub fn topmost_parent(&self, id: TransactionId) -> TransactionId {
        self.ancestors(id).last().copied().unwrap_or(id)
    }

    /// Diagnostic level of the tree, held by its root.
    pub fn issued_diags(&self, id: TransactionId) -> IssuedDiags {
        let root = self.topmost_parent(id);
        self.get(root)
            .map(|t| t.local_issued_diags())
            .unwrap_or_default()
    }

    /// Record a diagnostic level for the tree. Levels only escalate.
    pub fn set_issued_diags(&mut self, id: TransactionId, diags: IssuedDiags) {
        let root = self.topmost_parent(id);
        if let Some(t) = self.get_mut(root) {
            if diags > t.local_issued_diags() {
                t.set_local_issued_diags(diags);
            }
        }
    }

    /// All transactions below `id`, depth first, parents before children.
    pub fn descendants(&self, id: TransactionId) -> Vec<TransactionId> {
        let mut out = Vec::new();
        let mut stack: Vec<TransactionId> = match self.get(id) {
            Some(t) => t.nested().iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(cur) = stack.pop() {
            out.push(cur);
            if let Some(t) = self.get(cur) {
                stack.extend(t.nested().iter().rev().copied());
            }
        }
        out
    }

    /// Destroy a transaction and its whole subtree, recycling the objects.
    ///
    /// Every transaction in the subtree must be terminal; otherwise nothing
    /// is released and the offending child is reported.
    pub fn release(&mut self, id: TransactionId) -> Result<(), TransactionError> {
        let t = self.require(id)?;
        if !t.state().is_terminal() {
            return Err(TransactionError::NonTerminalChild {
                parent: t.parent().unwrap_or(id),
                child: id,
            });
        }
        let subtree = self.descendants(id);
        for child in &subtree {
            let ct = self.require(*child)?;
            if !ct.state().is_terminal() {
                return Err(TransactionError::NonTerminalChild {
                    parent: ct.parent().unwrap_or(id),
                    child: *child,
                });
            }
        }
        if let Some(parent) = self.require(id)?.parent() {
            self.remove_nested(parent, id)?;
        }
        for tid in std::iter::once(id).chain(subtree) {
            if let Some(t) = self.live.remove(&tid) {
                if self.pool.len() < POOL_CAPACITY {
                    self.pool.push(t);
                }
            }
        }
        Ok(())
    }

    /// Indented dump of the tree rooted at `id`.
    pub fn print_structure(&self, id: TransactionId, out: &mut impl Write) -> fmt::Result {
        self.print_node(id, 0, false, out)
    }

    /// Like `print_structure`, without per-batch detail.
    pub fn print_structure_brief(&self, id: TransactionId, out: &mut impl Write) -> fmt::Result {
        self.print_node(id, 0, true, out)
    }

    fn print_node(
        &self,
        id: TransactionId,
        depth: usize,
        brief: bool,
        out: &mut impl Write,
    ) -> fmt::Result {
        let indent = "  ".repeat(depth);
        let Some(t) = self.get(id) else {
            return writeln!(out, "{}<released {}>", indent, id);
        };
        write!(
            out,
            "{}{} {} batches={} macros={}",
            indent,
            id,
            t.state(),
            t.decls().len() + t.deserialized_decls().len(),
            t.macros().len()
        )?;
        if let Some(ns) = t.shadow_namespace() {
            write!(out, " shadow={}", ns)?;
        }
        writeln!(out)?;
        if !brief {
            for batch in t.decls() {
                writeln!(out, "{}  - {} x{}", indent, batch.call, batch.group.len())?;
            }
        }
        for child in t.nested() {
            self.print_node(*child, depth + 1, brief, out)?;
        }
        Ok(())
    }
}

impl Default for TransactionArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::State;

    fn opts() -> CompilationOptions {
        CompilationOptions::default()
    }

    #[test]
    fn test_nesting_is_a_tree() {
        let mut arena = TransactionArena::new();
        let root = arena.create(opts());
        let child = arena.create(opts());
        let grandchild = arena.create(opts());
        arena.add_nested(root, child).unwrap();
        arena.add_nested(child, grandchild).unwrap();

        assert_eq!(arena.topmost_parent(grandchild), root);
        assert_eq!(arena.descendants(root), vec![child, grandchild]);
        assert!(matches!(
            arena.add_nested(grandchild, root),
            Err(TransactionError::Cycle { .. })
        ));
        assert!(matches!(
            arena.add_nested(root, grandchild),
            Err(TransactionError::AlreadyNested { .. })
        ));
        assert!(matches!(
            arena.add_nested(root, root),
            Err(TransactionError::Cycle { .. })
        ));
    }

    #[test]
    fn test_diags_roll_up_to_root() {
        let mut arena = TransactionArena::new();
        let root = arena.create(opts());
        let child = arena.create(opts());
        arena.add_nested(root, child).unwrap();
        arena.set_issued_diags(child, IssuedDiags::Errors);
        assert_eq!(arena.issued_diags(root), IssuedDiags::Errors);
        arena.set_issued_diags(root, IssuedDiags::Warnings);
        assert_eq!(arena.issued_diags(child), IssuedDiags::Errors);
    }

    #[test]
    fn test_release_requires_terminal_children() {
        let mut arena = TransactionArena::new();
        let root = arena.create(opts());
        let child = arena.create(opts());
        arena.add_nested(root, child).unwrap();
        arena.get_mut(root).unwrap().set_state(State::Completed).unwrap();
        arena.get_mut(root).unwrap().set_state(State::Committed).unwrap();

        let err = arena.release(root).unwrap_err();
        assert_eq!(err, TransactionError::NonTerminalChild { parent: root, child });
        assert!(arena.contains(root) && arena.contains(child));

        arena.get_mut(child).unwrap().set_state(State::RolledBack).unwrap();
        arena.release(root).unwrap();
        assert!(arena.is_empty());
        assert_eq!(arena.pooled(), 2);
    }

    #[test]
    fn test_pool_reuse_keeps_ids_fresh() {
        let mut arena = TransactionArena::new();
        let a = arena.create(opts());
        arena.get_mut(a).unwrap().set_state(State::RolledBack).unwrap();
        arena.release(a).unwrap();
        let b = arena.create(opts());
        assert_ne!(a, b);
        assert_eq!(arena.pooled(), 0);
        assert_eq!(arena.get(b).unwrap().state(), State::Collecting);
        assert!(arena.get(b).unwrap().is_empty());
    }

    #[test]
    fn test_release_nested_detaches_from_parent() {
        let mut arena = TransactionArena::new();
        let root = arena.create(opts());
        let child = arena.create(opts());
        arena.add_nested(root, child).unwrap();
        arena.get_mut(child).unwrap().set_state(State::RolledBack).unwrap();
        arena.release(child).unwrap();
        assert!(arena.get(root).unwrap().nested().is_empty());
    }

    #[test]
    fn test_print_structure() {
        let mut arena = TransactionArena::new();
        let root = arena.create(opts());
        let child = arena.create(opts());
        arena.add_nested(root, child).unwrap();
        let mut out = String::new();
        arena.print_structure_brief(root, &mut out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(&format!("{} Collecting", root)));
        assert!(lines[1].starts_with(&format!("  {} Collecting", child)));
    }
}
