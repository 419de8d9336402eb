use std::collections::BTreeMap;

use super::types::{FunctionDef, GlobalDef, LirInstr, SymbolLinkage};

/// One generated code unit, the output of codegen for a transaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodeModule {
    pub name: String,
    pub functions: Vec<FunctionDef>,
    pub globals: Vec<GlobalDef>,
    /// Functions to run once, in order, after the module is linked.
    pub ctors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Function { num_params: u32 },
    Data,
}

/// A symbol the module references but does not define.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub name: String,
    pub kind: ImportKind,
}

impl CodeModule {
    pub fn new(name: impl Into<String>) -> Self {
        CodeModule {
            name: name.into(),
            ..CodeModule::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.globals.is_empty()
    }

    pub fn defines(&self, name: &str) -> bool {
        self.function(name).is_some() || self.global(name).is_some()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalDef> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Names this module makes visible to other modules.
    pub fn exported_symbols(&self) -> impl Iterator<Item = &str> {
        let functions = self
            .functions
            .iter()
            .filter(|f| f.linkage != SymbolLinkage::Internal)
            .map(|f| f.name.as_str());
        let globals = self
            .globals
            .iter()
            .filter(|g| g.linkage != SymbolLinkage::Internal)
            .map(|g| g.name.as_str());
        functions.chain(globals)
    }

    /// Referenced but undefined symbols, sorted by name. A function's
    /// parameter count comes from its first call site.
    pub fn imports(&self) -> Vec<Import> {
        let mut found: BTreeMap<&str, ImportKind> = BTreeMap::new();
        for func in &self.functions {
            for block in &func.blocks {
                for instr in &block.instructions {
                    let (name, kind) = match instr {
                        LirInstr::Call { callee, args, .. } => (
                            callee.as_str(),
                            ImportKind::Function {
                                num_params: args.len() as u32,
                            },
                        ),
                        LirInstr::LoadGlobal { symbol, .. }
                        | LirInstr::StoreGlobal { symbol, .. } => {
                            (symbol.as_str(), ImportKind::Data)
                        }
                        _ => continue,
                    };
                    if !self.defines(name) {
                        found.entry(name).or_insert(kind);
                    }
                }
            }
        }
        found
            .into_iter()
            .map(|(name, kind)| Import {
                name: name.to_string(),
                kind,
            })
            .collect()
    }

    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(FunctionDef::instruction_count).sum()
    }

    /// Append everything from `other`. Symbols already present here win.
    pub fn merge(&mut self, other: CodeModule) {
        for f in other.functions {
            if !self.defines(&f.name) {
                self.functions.push(f);
            }
        }
        for g in other.globals {
            if !self.defines(&g.name) {
                self.globals.push(g);
            }
        }
        for c in other.ctors {
            if !self.ctors.contains(&c) {
                self.ctors.push(c);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{BasicBlock, Label, Reg, Terminator};

    fn caller(name: &str, callee: &str, global: &str) -> FunctionDef {
        let mut f = FunctionDef::new(name, SymbolLinkage::External, 0);
        f.num_regs = 3;
        f.blocks.push(BasicBlock {
            label: Label(0),
            instructions: vec![
                LirInstr::Const {
                    dst: Reg(0),
                    value: 1,
                },
                LirInstr::Call {
                    dst: Reg(1),
                    callee: callee.into(),
                    args: vec![Reg(0)],
                },
                LirInstr::StoreGlobal {
                    symbol: global.into(),
                    src: Reg(1),
                },
            ],
            terminator: Terminator::Return(Reg(1)),
        });
        f
    }

    #[test]
    fn test_imports_exclude_local_definitions() {
        let mut m = CodeModule::new("m");
        m.functions.push(caller("a", "b", "g"));
        assert_eq!(
            m.imports(),
            vec![
                Import {
                    name: "b".into(),
                    kind: ImportKind::Function { num_params: 1 }
                },
                Import {
                    name: "g".into(),
                    kind: ImportKind::Data
                },
            ]
        );
        m.functions.push(caller("b", "a", "g"));
        m.globals.push(GlobalDef {
            name: "g".into(),
            linkage: SymbolLinkage::External,
            init: 0,
        });
        assert!(m.imports().is_empty());
    }

    #[test]
    fn test_instruction_count_includes_terminators() {
        let f = caller("a", "b", "g");
        assert_eq!(f.instruction_count(), 4);
        let mut m = CodeModule::new("m");
        m.functions.push(f);
        assert_eq!(m.instruction_count(), 4);
    }

    #[test]
    fn test_merge_keeps_first_definition() {
        let mut a = CodeModule::new("a");
        a.functions.push(caller("f", "x", "g"));
        let mut b = CodeModule::new("b");
        b.functions.push(caller("f", "y", "g"));
        b.functions.push(caller("h", "f", "g"));
        b.ctors.push("h".into());
        a.merge(b);
        assert_eq!(a.functions.len(), 2);
        assert_eq!(a.ctors, vec!["h".to_string()]);
        assert!(a.imports().iter().any(|i| i.name == "x"));
        assert!(!a.imports().iter().any(|i| i.name == "y"));
    }

    #[test]
    fn test_exported_symbols_skip_internal() {
        let mut m = CodeModule::new("m");
        m.functions.push(caller("pub_fn", "x", "g"));
        let mut private = caller("priv_fn", "x", "g");
        private.linkage = SymbolLinkage::Internal;
        m.functions.push(private);
        let exported: Vec<&str> = m.exported_symbols().collect();
        assert_eq!(exported, vec!["pub_fn"]);
    }
}
