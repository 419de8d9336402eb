use rustc_hash::FxHashMap;

use super::{Decl, DeclId};

struct Slot {
    generation: u32,
    decl: Option<Decl>,
}

/// A macro body as recorded by `#define`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDefinition {
    pub body: String,
}

/// Session-wide declaration arena plus the name and macro tables.
pub struct DeclStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    lookup: FxHashMap<String, Vec<DeclId>>,
    macros: FxHashMap<String, Vec<MacroDefinition>>,
    live: usize,
}

impl DeclStore {
    pub fn new() -> Self {
        DeclStore {
            slots: Vec::new(),
            free: Vec::new(),
            lookup: FxHashMap::default(),
            macros: FxHashMap::default(),
            live: 0,
        }
    }

    /// Store a declaration. It is not visible to lookup until
    /// `make_visible` is called.
    pub fn insert(&mut self, decl: Decl) -> DeclId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.decl = Some(decl);
            return DeclId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            decl: Some(decl),
        });
        DeclId {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, id: DeclId) -> Option<&Decl> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.decl.as_ref())
    }

    pub fn get_mut(&mut self, id: DeclId) -> Option<&mut Decl> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.decl.as_mut())
    }

    pub fn contains(&self, id: DeclId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Push `id` on top of its name's lookup stack.
    pub fn make_visible(&mut self, id: DeclId) {
        let Some(name) = self.get(id).map(|d| d.name.clone()) else {
            return;
        };
        let stack = self.lookup.entry(name).or_default();
        if !stack.contains(&id) {
            stack.push(id);
        }
    }

    /// Remove `id` from lookup without destroying it.
    pub fn hide(&mut self, id: DeclId) {
        let Some(name) = self.get(id).map(|d| d.name.clone()) else {
            return;
        };
        if let Some(stack) = self.lookup.get_mut(&name) {
            stack.retain(|d| *d != id);
            if stack.is_empty() {
                self.lookup.remove(&name);
            }
        }
    }

    pub fn is_visible(&self, id: DeclId) -> bool {
        self.get(id)
            .and_then(|d| self.lookup.get(&d.name))
            .is_some_and(|stack| stack.contains(&id))
    }

    /// The most recent visible declaration of `name`.
    pub fn lookup(&self, name: &str) -> Option<DeclId> {
        self.lookup.get(name).and_then(|stack| stack.last().copied())
    }

    /// The declaration of the same name directly underneath `id` on the
    /// lookup stack.
    pub fn previous_declaration(&self, id: DeclId) -> Option<DeclId> {
        let decl = self.get(id)?;
        let stack = self.lookup.get(&decl.name)?;
        let pos = stack.iter().position(|d| *d == id)?;
        pos.checked_sub(1).map(|p| stack[p])
    }

    /// Hide and destroy a declaration. Outstanding ids for it go stale.
    pub fn forget(&mut self, id: DeclId) -> Option<Decl> {
        if !self.contains(id) {
            return None;
        }
        self.hide(id);
        let slot = &mut self.slots[id.index as usize];
        let decl = slot.decl.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        decl
    }

    /// `(name, linkage name)` of every visible declaration, sorted.
    pub fn visible_declarations(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .lookup
            .values()
            .flatten()
            .filter_map(|id| self.get(*id))
            .map(|d| (d.name.clone(), d.linkage_name.clone()))
            .collect();
        out.sort();
        out
    }

    pub fn define_macro(&mut self, name: &str, body: &str) {
        self.macros
            .entry(name.to_string())
            .or_default()
            .push(MacroDefinition {
                body: body.to_string(),
            });
    }

    /// Remove the active definition of `name`, returning it.
    pub fn undefine_macro(&mut self, name: &str) -> Option<MacroDefinition> {
        let stack = self.macros.get_mut(name)?;
        let def = stack.pop();
        if stack.is_empty() {
            self.macros.remove(name);
        }
        def
    }

    /// Reinstate a definition removed by `undefine_macro`.
    pub fn restore_macro(&mut self, name: &str, def: MacroDefinition) {
        self.macros.entry(name.to_string()).or_default().push(def);
    }

    pub fn macro_definition(&self, name: &str) -> Option<&MacroDefinition> {
        self.macros.get(name).and_then(|stack| stack.last())
    }
}

impl Default for DeclStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FunctionDecl, VarDecl};
    use crate::source::SourceLocation;

    fn var(name: &str) -> Decl {
        Decl::var(name, VarDecl::default(), SourceLocation::INVALID)
    }

    #[test]
    fn test_stale_id_after_forget() {
        let mut store = DeclStore::new();
        let a = store.insert(var("a"));
        store.make_visible(a);
        assert_eq!(store.lookup("a"), Some(a));
        assert!(store.forget(a).is_some());
        assert!(store.get(a).is_none());
        assert_eq!(store.lookup("a"), None);

        // The slot is reused, the old id stays dead.
        let b = store.insert(var("b"));
        assert_eq!(b.index(), a.index());
        assert!(store.get(a).is_none());
        assert_eq!(store.get(b).map(|d| d.name.as_str()), Some("b"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_shadowing_restores_previous() {
        let mut store = DeclStore::new();
        let f1 = store.insert(Decl::function(
            "f",
            FunctionDecl::default(),
            SourceLocation::INVALID,
        ));
        store.make_visible(f1);
        let f2 = store.insert(Decl::function(
            "f",
            FunctionDecl::default(),
            SourceLocation::INVALID,
        ));
        store.make_visible(f2);
        assert_eq!(store.lookup("f"), Some(f2));
        assert_eq!(store.previous_declaration(f2), Some(f1));
        assert_eq!(store.previous_declaration(f1), None);

        store.forget(f2);
        assert_eq!(store.lookup("f"), Some(f1));
    }

    #[test]
    fn test_forget_from_middle_of_stack() {
        let mut store = DeclStore::new();
        let ids: Vec<_> = (0..3)
            .map(|_| {
                let id = store.insert(var("x"));
                store.make_visible(id);
                id
            })
            .collect();
        store.forget(ids[1]);
        assert_eq!(store.lookup("x"), Some(ids[2]));
        assert_eq!(store.previous_declaration(ids[2]), Some(ids[0]));
    }

    #[test]
    fn test_macro_stack() {
        let mut store = DeclStore::new();
        store.define_macro("N", "1");
        store.define_macro("N", "2");
        assert_eq!(store.macro_definition("N").map(|m| m.body.as_str()), Some("2"));
        let removed = store.undefine_macro("N").unwrap();
        assert_eq!(store.macro_definition("N").map(|m| m.body.as_str()), Some("1"));
        store.restore_macro("N", removed);
        assert_eq!(store.macro_definition("N").map(|m| m.body.as_str()), Some("2"));
        store.undefine_macro("N");
        store.undefine_macro("N");
        assert!(store.macro_definition("N").is_none());
        assert!(store.undefine_macro("N").is_none());
    }
}
