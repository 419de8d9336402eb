//! Lowering of minic declarations to LIR.
//!
//! Every value is an i64. Globals become data cells; a global whose
//! initializer is not a constant gets an internal init function that runs
//! as a ctor once the module is loaded. Inline functions are weak, and a
//! module re-emits the inline functions it calls, so each module carries
//! its own copy for the loader to deduplicate.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::ast::{AssignTarget, BinaryOp, Decl, DeclId, DeclStore, Expr, Stmt, UnaryOp};
use crate::error::CodegenError;
use crate::frontend::CodeGenerator;
use crate::lir::{
    BasicBlock, BinOp, CmpOp, CodeModule, FunctionDef, GlobalDef, Label, LirInstr, Reg,
    SymbolLinkage, Terminator, UnaryOp as LirUnaryOp,
};
use crate::transaction::{ConsumerCallInfo, DelayCallInfo};

/// Code generator for minic declarations.
#[derive(Debug, Default)]
pub struct MinicCodegen {
    module: CodeModule,
    next_init: u64,
}

impl MinicCodegen {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_function(&mut self, def: FunctionDef) {
        match self.module.functions.iter_mut().find(|f| f.name == def.name) {
            Some(existing) => *existing = def,
            None => self.module.functions.push(def),
        }
    }

    fn function(&mut self, id: DeclId, decl: &Decl, decls: &DeclStore) -> Result<(), CodegenError> {
        let Some(function) = decl.as_function() else {
            return Ok(());
        };
        let Some(body) = &function.body else {
            return Ok(());
        };
        let linkage = if function.is_inline {
            SymbolLinkage::Weak
        } else {
            SymbolLinkage::External
        };
        let mut inline_calls = Vec::new();
        let mut lowerer = FunctionLowerer::new(
            &decl.linkage_name,
            linkage,
            function.params.len() as u32,
            decls,
            &mut inline_calls,
        );
        let def = lowerer.lower_body(&function.params, body, function.result)?;
        trace!(function = %decl.linkage_name, instructions = def.instruction_count(), "lowered");
        self.add_function(def);
        self.emit_inline_copies(Some(id), inline_calls, decls)
    }

    /// Give the module its own weak copy of each inline function it calls.
    fn emit_inline_copies(
        &mut self,
        caller: Option<DeclId>,
        mut pending: Vec<DeclId>,
        decls: &DeclStore,
    ) -> Result<(), CodegenError> {
        let mut seen: FxHashSet<DeclId> = caller.into_iter().collect();
        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            let decl = decls.get(id).ok_or(CodegenError::StaleDeclaration(id))?;
            let Some(function) = decl.as_function() else {
                continue;
            };
            let Some(body) = &function.body else {
                continue;
            };
            if self.module.defines(&decl.linkage_name) {
                continue;
            }
            let mut calls = Vec::new();
            let mut lowerer = FunctionLowerer::new(
                &decl.linkage_name,
                SymbolLinkage::Weak,
                function.params.len() as u32,
                decls,
                &mut calls,
            );
            let def = lowerer.lower_body(&function.params, body, function.result)?;
            self.module.functions.push(def);
            pending.extend(calls);
        }
        Ok(())
    }

    fn global(&mut self, decl: &Decl, call: ConsumerCallInfo, decls: &DeclStore) -> Result<(), CodegenError> {
        let Some(var) = decl.as_var() else {
            return Ok(());
        };
        if var.is_extern {
            return Ok(());
        }
        // Storage for a tentative definition appears when it is completed.
        if var.is_tentative && call != ConsumerCallInfo::CompleteTentativeDefinition {
            return Ok(());
        }
        if self.module.global(&decl.linkage_name).is_some() {
            return Ok(());
        }
        let init = var.init.as_ref();
        let constant = match init {
            None => Some(0),
            Some(e) => const_value(e),
        };
        self.module.globals.push(GlobalDef {
            name: decl.linkage_name.clone(),
            linkage: SymbolLinkage::External,
            init: constant.unwrap_or(0),
        });
        if let (None, Some(init)) = (constant, init) {
            self.next_init += 1;
            let name = format!("__kiln_init_{}", self.next_init);
            let mut calls = Vec::new();
            let mut lowerer =
                FunctionLowerer::new(&name, SymbolLinkage::Internal, 0, decls, &mut calls);
            let def = lowerer.lower_initializer(&decl.linkage_name, init)?;
            self.module.functions.push(def);
            self.module.ctors.push(name);
            self.emit_inline_copies(None, calls, decls)?;
        }
        Ok(())
    }
}

impl CodeGenerator for MinicCodegen {
    fn handle_top_level_decl(
        &mut self,
        batch: &DelayCallInfo,
        decls: &DeclStore,
    ) -> Result<(), CodegenError> {
        for id in &batch.group {
            let decl = decls.get(*id).ok_or(CodegenError::StaleDeclaration(*id))?;
            if decl.is_invalid {
                continue;
            }
            if decl.as_function().is_some() {
                self.function(*id, decl, decls)?;
            } else {
                self.global(decl, batch.call, decls)?;
            }
        }
        Ok(())
    }

    fn handle_translation_unit(&mut self, module_name: &str) -> Option<CodeModule> {
        let module = std::mem::take(&mut self.module);
        if module.is_empty() && module.ctors.is_empty() {
            return None;
        }
        Some(CodeModule {
            name: module_name.to_string(),
            ..module
        })
    }

    fn discard(&mut self) {
        self.module = CodeModule::default();
    }
}

/// Fold an initializer made of constants only.
fn const_value(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Int(n) => Some(*n),
        Expr::Unary { op, operand } => {
            let v = const_value(operand)?;
            Some(match op {
                UnaryOp::Neg => v.wrapping_neg(),
                UnaryOp::Not => (v == 0) as i64,
            })
        }
        Expr::Binary { op, lhs, rhs } => {
            let (a, b) = (const_value(lhs)?, const_value(rhs)?);
            Some(match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                // Same as generated code: division by zero yields 0.
                BinaryOp::Div if b == 0 => 0,
                BinaryOp::Rem if b == 0 => 0,
                BinaryOp::Div => a.wrapping_div(b),
                BinaryOp::Rem => a.wrapping_rem(b),
                BinaryOp::Lt => (a < b) as i64,
                BinaryOp::Le => (a <= b) as i64,
                BinaryOp::Gt => (a > b) as i64,
                BinaryOp::Ge => (a >= b) as i64,
                BinaryOp::Eq => (a == b) as i64,
                BinaryOp::Ne => (a != b) as i64,
            })
        }
        _ => None,
    }
}

/// Builds one LIR function. Locals live in slots, temporaries in
/// registers; blocks are appended as they are terminated.
struct FunctionLowerer<'a> {
    func: FunctionDef,
    decls: &'a DeclStore,
    inline_calls: &'a mut Vec<DeclId>,
    /// Label and instructions of the open block, if any.
    current: Option<(Label, Vec<LirInstr>)>,
    next_reg: u32,
    next_label: u32,
    scopes: Vec<FxHashMap<String, u32>>,
}

impl<'a> FunctionLowerer<'a> {
    fn new(
        name: &str,
        linkage: SymbolLinkage,
        num_params: u32,
        decls: &'a DeclStore,
        inline_calls: &'a mut Vec<DeclId>,
    ) -> Self {
        FunctionLowerer {
            func: FunctionDef::new(name, linkage, num_params),
            decls,
            inline_calls,
            current: Some((Label(0), Vec::new())),
            next_reg: 0,
            next_label: 1,
            scopes: vec![FxHashMap::default()],
        }
    }

    fn lower_body(
        &mut self,
        params: &[String],
        body: &[Stmt],
        result: Option<usize>,
    ) -> Result<FunctionDef, CodegenError> {
        for (index, name) in params.iter().enumerate() {
            let slot = self.declare_local(name);
            let dst = self.reg();
            self.emit(LirInstr::LoadParam {
                dst,
                index: index as u32,
            });
            self.emit(LirInstr::StoreLocal { slot, src: dst });
        }
        let result_slot = result.map(|_| self.new_slot());
        for (index, stmt) in body.iter().enumerate() {
            let capture = if result == Some(index) { result_slot } else { None };
            self.lower_stmt(stmt, capture)?;
        }
        if self.current.is_some() {
            let value = match result_slot {
                Some(slot) => {
                    let dst = self.reg();
                    self.emit(LirInstr::LoadLocal { dst, slot });
                    dst
                }
                None => self.constant(0),
            };
            self.terminate(Terminator::Return(value));
        }
        Ok(self.finish())
    }

    /// `target = init; return 0;`
    fn lower_initializer(&mut self, target: &str, init: &Expr) -> Result<FunctionDef, CodegenError> {
        let src = self.lower_expr(init)?;
        self.emit(LirInstr::StoreGlobal {
            symbol: target.to_string(),
            src,
        });
        let zero = self.constant(0);
        self.terminate(Terminator::Return(zero));
        Ok(self.finish())
    }

    fn finish(&mut self) -> FunctionDef {
        self.func.num_regs = self.next_reg;
        self.func.entry = Label(0);
        std::mem::replace(
            &mut self.func,
            FunctionDef::new("", SymbolLinkage::Internal, 0),
        )
    }

    fn reg(&mut self) -> Reg {
        let r = Reg(self.next_reg);
        self.next_reg += 1;
        r
    }

    fn label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    fn new_slot(&mut self) -> u32 {
        let slot = self.func.num_locals;
        self.func.num_locals += 1;
        slot
    }

    fn declare_local(&mut self, name: &str) -> u32 {
        let slot = self.new_slot();
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), slot);
        }
        slot
    }

    fn local(&self, name: &str) -> Result<u32, CodegenError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name).copied())
            .ok_or_else(|| CodegenError::Unsupported {
                name: name.to_string(),
                message: "unknown local variable".to_string(),
            })
    }

    fn emit(&mut self, instr: LirInstr) {
        if self.current.is_none() {
            // Code after a return: give it an unreachable block of its own.
            let label = self.label();
            self.current = Some((label, Vec::new()));
        }
        if let Some((_, instructions)) = &mut self.current {
            instructions.push(instr);
        }
    }

    fn terminate(&mut self, terminator: Terminator) {
        let (label, instructions) = match self.current.take() {
            Some(open) => open,
            None => (self.label(), Vec::new()),
        };
        self.func.blocks.push(BasicBlock {
            label,
            instructions,
            terminator,
        });
    }

    fn start_block(&mut self, label: Label) {
        self.current = Some((label, Vec::new()));
    }

    fn constant(&mut self, value: i64) -> Reg {
        let dst = self.reg();
        self.emit(LirInstr::Const { dst, value });
        dst
    }

    fn decl(&self, id: DeclId) -> Result<&'a Decl, CodegenError> {
        self.decls.get(id).ok_or(CodegenError::StaleDeclaration(id))
    }

    // === Statements ===

    fn lower_stmt(&mut self, stmt: &Stmt, capture: Option<u32>) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Null => {}
            Stmt::Expr(e) => {
                let value = self.lower_expr(e)?;
                if let Some(slot) = capture {
                    self.emit(LirInstr::StoreLocal { slot, src: value });
                }
            }
            Stmt::Local { name, init } => {
                let value = match init {
                    Some(e) => self.lower_expr(e)?,
                    None => self.constant(0),
                };
                let slot = self.declare_local(name);
                self.emit(LirInstr::StoreLocal { slot, src: value });
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(e) => self.lower_expr(e)?,
                    None => self.constant(0),
                };
                self.terminate(Terminator::Return(value));
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.lower_expr(cond)?;
                let then_label = self.label();
                let merge = self.label();
                let else_label = if else_branch.is_some() {
                    self.label()
                } else {
                    merge
                };
                self.terminate(Terminator::Branch {
                    cond,
                    then_label,
                    else_label,
                });
                self.start_block(then_label);
                self.lower_scoped(then_branch)?;
                if self.current.is_some() {
                    self.terminate(Terminator::Jump(merge));
                }
                if let Some(else_branch) = else_branch {
                    self.start_block(else_label);
                    self.lower_scoped(else_branch)?;
                    if self.current.is_some() {
                        self.terminate(Terminator::Jump(merge));
                    }
                }
                self.start_block(merge);
            }
            Stmt::While { cond, body } => {
                let header = self.label();
                let body_label = self.label();
                let exit = self.label();
                self.terminate(Terminator::Jump(header));
                self.start_block(header);
                let cond = self.lower_expr(cond)?;
                self.terminate(Terminator::Branch {
                    cond,
                    then_label: body_label,
                    else_label: exit,
                });
                self.start_block(body_label);
                self.lower_scoped(body)?;
                if self.current.is_some() {
                    self.terminate(Terminator::Jump(header));
                }
                self.start_block(exit);
            }
            Stmt::Block(stmts) => {
                self.scopes.push(FxHashMap::default());
                for s in stmts {
                    self.lower_stmt(s, None)?;
                }
                self.scopes.pop();
            }
        }
        Ok(())
    }

    fn lower_scoped(&mut self, stmt: &Stmt) -> Result<(), CodegenError> {
        self.scopes.push(FxHashMap::default());
        let result = self.lower_stmt(stmt, None);
        self.scopes.pop();
        result
    }

    // === Expressions ===

    fn lower_expr(&mut self, expr: &Expr) -> Result<Reg, CodegenError> {
        match expr {
            Expr::Int(n) => Ok(self.constant(*n)),
            Expr::Local(name) => {
                let slot = self.local(name)?;
                let dst = self.reg();
                self.emit(LirInstr::LoadLocal { dst, slot });
                Ok(dst)
            }
            Expr::DeclRef(id) => {
                let decl = self.decl(*id)?;
                if decl.as_var().is_none() {
                    return Err(CodegenError::Unsupported {
                        name: decl.name.clone(),
                        message: "function used as a value".to_string(),
                    });
                }
                let dst = self.reg();
                self.emit(LirInstr::LoadGlobal {
                    dst,
                    symbol: decl.linkage_name.clone(),
                });
                Ok(dst)
            }
            Expr::Call { callee, args } => {
                let decl = self.decl(*callee)?;
                let inline = decl
                    .as_function()
                    .is_some_and(|f| f.is_inline && f.body.is_some());
                if inline {
                    self.inline_calls.push(*callee);
                }
                let mut regs = Vec::with_capacity(args.len());
                for arg in args {
                    regs.push(self.lower_expr(arg)?);
                }
                let dst = self.reg();
                self.emit(LirInstr::Call {
                    dst,
                    callee: decl.linkage_name.clone(),
                    args: regs,
                });
                Ok(dst)
            }
            Expr::Unary { op, operand } => {
                let src = self.lower_expr(operand)?;
                let dst = self.reg();
                let op = match op {
                    UnaryOp::Neg => LirUnaryOp::Neg,
                    UnaryOp::Not => LirUnaryOp::Not,
                };
                self.emit(LirInstr::UnaryOp { dst, op, src });
                Ok(dst)
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                let dst = self.reg();
                let instr = match arith_op(*op) {
                    Some(op) => LirInstr::BinOp { dst, op, lhs, rhs },
                    None => LirInstr::Compare {
                        dst,
                        op: compare_op(*op),
                        lhs,
                        rhs,
                    },
                };
                self.emit(instr);
                Ok(dst)
            }
            Expr::Assign { target, value } => {
                let src = self.lower_expr(value)?;
                match target {
                    AssignTarget::Local(name) => {
                        let slot = self.local(name)?;
                        self.emit(LirInstr::StoreLocal { slot, src });
                    }
                    AssignTarget::Global(id) => {
                        let symbol = self.decl(*id)?.linkage_name.clone();
                        self.emit(LirInstr::StoreGlobal { symbol, src });
                    }
                }
                Ok(src)
            }
        }
    }
}

fn arith_op(op: BinaryOp) -> Option<BinOp> {
    Some(match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Rem => BinOp::Rem,
        _ => return None,
    })
}

fn compare_op(op: BinaryOp) -> CmpOp {
    match op {
        BinaryOp::Lt => CmpOp::Lt,
        BinaryOp::Le => CmpOp::Le,
        BinaryOp::Gt => CmpOp::Gt,
        BinaryOp::Ge => CmpOp::Ge,
        BinaryOp::Ne => CmpOp::Ne,
        _ => CmpOp::Eq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minic::MinicFrontend;
    use crate::parser::{IncrementalParser, ParseResult};
    use crate::transaction::CompilationOptions;

    /// Parse `input` without codegen, then lower every batch of it.
    fn lower(prelude: &[&str], input: &str) -> Option<CodeModule> {
        let mut p = IncrementalParser::new(Box::new(MinicFrontend), None);
        p.set_transformers();
        for text in prelude {
            assert_eq!(p.parse(text, CompilationOptions::default()).result, ParseResult::Success);
        }
        let prt = p.parse(input, CompilationOptions::default());
        assert_eq!(prt.result, ParseResult::Success);
        let t = p.arena().get(prt.transaction?)?;
        let mut codegen = MinicCodegen::new();
        for batch in t.decls() {
            codegen.handle_top_level_decl(batch, p.decls()).ok()?;
        }
        codegen.handle_translation_unit("m")
    }

    #[test]
    fn test_constant_global_needs_no_ctor() {
        let m = lower(&[], "int g = 2 * 3 - 1;").unwrap();
        assert_eq!(m.global("g").unwrap().init, 5);
        assert!(m.ctors.is_empty());
    }

    #[test]
    fn test_dynamic_initializer_becomes_ctor() {
        let m = lower(&["int base = 4;"], "int g = base + 1;").unwrap();
        assert_eq!(m.global("g").unwrap().init, 0);
        assert_eq!(m.ctors.len(), 1);
        let init = m.function(&m.ctors[0]).unwrap();
        assert_eq!(init.linkage, SymbolLinkage::Internal);
        assert_eq!(m.imports().len(), 1);
    }

    #[test]
    fn test_prototypes_and_externs_emit_nothing() {
        assert!(lower(&[], "int f(int a); extern int g;").is_none());
    }

    #[test]
    fn test_inline_callee_is_copied_weak() {
        let m = lower(
            &["inline int sq(int x) { return x * x; }"],
            "int f(int a) { return sq(a) + 1; }",
        )
        .unwrap();
        assert_eq!(m.function("f").unwrap().linkage, SymbolLinkage::External);
        assert_eq!(m.function("sq").unwrap().linkage, SymbolLinkage::Weak);
        assert!(m.imports().is_empty());
    }

    #[test]
    fn test_control_flow_blocks_are_terminated() {
        let m = lower(
            &[],
            "int f(int n) { int s = 0; while (n > 0) { if (n % 2) s = s + n; else ; n = n - 1; } return s; }",
        )
        .unwrap();
        let f = m.function("f").unwrap();
        assert_eq!(f.num_params, 1);
        // Entry, loop header, body, then, else, merge, exit.
        assert_eq!(f.blocks.len(), 7);
        assert!(f.num_locals >= 2);
    }
}
