//! LIR to Cranelift IR translation
//!
//! This module contains `FunctionTranslator`, which translates one LIR
//! function's instructions and terminators to Cranelift IR.

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::types::I64;
use cranelift_codegen::ir::{Block, FuncRef, GlobalValue, InstBuilder, MemFlags, Value};
use cranelift_frontend::{FunctionBuilder, Variable};
use cranelift_jit::JITModule;
use cranelift_module::Module;
use rustc_hash::FxHashMap;

use crate::lir::{BinOp, CmpOp, FunctionDef, Label, LirInstr, Reg, Terminator, UnaryOp};

use super::compiler::ModuleSymbols;
use super::JitError;

/// Helper to create a Variable from a register/slot index
#[inline]
fn var(n: u32) -> Variable {
    Variable::from_u32(n)
}

/// Translator for a single function
///
/// Variable layout: `[registers..., local slots..., parameters...]`.
pub(crate) struct FunctionTranslator<'a> {
    module: &'a mut JITModule,
    symbols: &'a ModuleSymbols,
    lir: &'a FunctionDef,
    func_refs: FxHashMap<String, FuncRef>,
    data_refs: FxHashMap<String, GlobalValue>,
    local_base: u32,
    param_base: u32,
}

impl<'a> FunctionTranslator<'a> {
    pub(crate) fn new(
        module: &'a mut JITModule,
        symbols: &'a ModuleSymbols,
        lir: &'a FunctionDef,
    ) -> Self {
        FunctionTranslator {
            module,
            symbols,
            lir,
            func_refs: FxHashMap::default(),
            data_refs: FxHashMap::default(),
            local_base: lir.num_regs,
            param_base: lir.num_regs + lir.num_locals,
        }
    }

    pub(crate) fn translate(&mut self, builder: &mut FunctionBuilder) -> Result<(), JitError> {
        let lir = self.lir;
        for i in 0..self.param_base + lir.num_params {
            builder.declare_var(var(i), I64);
        }

        let entry_block = builder.create_block();
        let mut block_map: FxHashMap<Label, Block> = FxHashMap::default();
        for bb in &lir.blocks {
            block_map.insert(bb.label, builder.create_block());
        }

        // Entry block: every register and slot starts at zero, then the
        // incoming parameters are copied into their variables.
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        let params = builder.block_params(entry_block).to_vec();
        let zero = builder.ins().iconst(I64, 0);
        for i in 0..self.param_base {
            builder.def_var(var(i), zero);
        }
        for (i, p) in params.into_iter().enumerate() {
            builder.def_var(var(self.param_base + i as u32), p);
        }
        let first = lookup_block(&block_map, lir.entry, &lir.name)?;
        builder.ins().jump(first, &[]);

        for bb in &lir.blocks {
            let cl_block = lookup_block(&block_map, bb.label, &lir.name)?;
            builder.switch_to_block(cl_block);
            for instr in &bb.instructions {
                self.translate_instr(builder, instr)?;
            }
            self.translate_terminator(builder, &bb.terminator, &block_map)?;
        }

        builder.seal_all_blocks();
        Ok(())
    }

    fn reg(&self, r: Reg) -> Result<Variable, JitError> {
        if r.0 >= self.lir.num_regs {
            return Err(JitError::InvalidLir(format!(
                "{}: register r{} out of range",
                self.lir.name, r.0
            )));
        }
        Ok(var(r.0))
    }

    fn slot(&self, slot: u32) -> Result<Variable, JitError> {
        if slot >= self.lir.num_locals {
            return Err(JitError::InvalidLir(format!(
                "{}: local slot {} out of range",
                self.lir.name, slot
            )));
        }
        Ok(var(self.local_base + slot))
    }

    /// Translate a single LIR instruction
    fn translate_instr(
        &mut self,
        builder: &mut FunctionBuilder,
        instr: &LirInstr,
    ) -> Result<(), JitError> {
        match instr {
            LirInstr::Const { dst, value } => {
                let val = builder.ins().iconst(I64, *value);
                builder.def_var(self.reg(*dst)?, val);
            }

            LirInstr::LoadParam { dst, index } => {
                if *index >= self.lir.num_params {
                    return Err(JitError::InvalidLir(format!(
                        "{}: parameter {} out of range",
                        self.lir.name, index
                    )));
                }
                let val = builder.use_var(var(self.param_base + index));
                builder.def_var(self.reg(*dst)?, val);
            }

            LirInstr::LoadLocal { dst, slot } => {
                let val = builder.use_var(self.slot(*slot)?);
                builder.def_var(self.reg(*dst)?, val);
            }

            LirInstr::StoreLocal { slot, src } => {
                let val = builder.use_var(self.reg(*src)?);
                builder.def_var(self.slot(*slot)?, val);
            }

            LirInstr::LoadGlobal { dst, symbol } => {
                let addr = self.global_addr(builder, symbol)?;
                let val = builder.ins().load(I64, MemFlags::trusted(), addr, 0);
                builder.def_var(self.reg(*dst)?, val);
            }

            LirInstr::StoreGlobal { symbol, src } => {
                let val = builder.use_var(self.reg(*src)?);
                let addr = self.global_addr(builder, symbol)?;
                builder.ins().store(MemFlags::trusted(), val, addr, 0);
            }

            LirInstr::Call { dst, callee, args } => {
                let func_ref = self.func_ref(builder, callee)?;
                let mut vals = Vec::with_capacity(args.len());
                for a in args {
                    vals.push(builder.use_var(self.reg(*a)?));
                }
                let inst = builder.ins().call(func_ref, &vals);
                let result = builder.inst_results(inst).first().copied().ok_or_else(|| {
                    JitError::InvalidLir(format!("{}: call to {} has no result", self.lir.name, callee))
                })?;
                builder.def_var(self.reg(*dst)?, result);
            }

            LirInstr::BinOp { dst, op, lhs, rhs } => {
                let lhs_val = builder.use_var(self.reg(*lhs)?);
                let rhs_val = builder.use_var(self.reg(*rhs)?);
                let result = translate_binop(builder, *op, lhs_val, rhs_val);
                builder.def_var(self.reg(*dst)?, result);
            }

            LirInstr::UnaryOp { dst, op, src } => {
                let src_val = builder.use_var(self.reg(*src)?);
                let result = match op {
                    UnaryOp::Neg => builder.ins().ineg(src_val),
                    UnaryOp::Not => {
                        let is_zero = builder.ins().icmp_imm(IntCC::Equal, src_val, 0);
                        builder.ins().uextend(I64, is_zero)
                    }
                };
                builder.def_var(self.reg(*dst)?, result);
            }

            LirInstr::Compare { dst, op, lhs, rhs } => {
                let lhs_val = builder.use_var(self.reg(*lhs)?);
                let rhs_val = builder.use_var(self.reg(*rhs)?);
                let cc = match op {
                    CmpOp::Eq => IntCC::Equal,
                    CmpOp::Ne => IntCC::NotEqual,
                    CmpOp::Lt => IntCC::SignedLessThan,
                    CmpOp::Le => IntCC::SignedLessThanOrEqual,
                    CmpOp::Gt => IntCC::SignedGreaterThan,
                    CmpOp::Ge => IntCC::SignedGreaterThanOrEqual,
                };
                let flag = builder.ins().icmp(cc, lhs_val, rhs_val);
                let result = builder.ins().uextend(I64, flag);
                builder.def_var(self.reg(*dst)?, result);
            }
        }
        Ok(())
    }

    fn translate_terminator(
        &mut self,
        builder: &mut FunctionBuilder,
        term: &Terminator,
        block_map: &FxHashMap<Label, Block>,
    ) -> Result<(), JitError> {
        match term {
            Terminator::Return(r) => {
                let val = builder.use_var(self.reg(*r)?);
                builder.ins().return_(&[val]);
            }
            Terminator::Jump(label) => {
                let target = lookup_block(block_map, *label, &self.lir.name)?;
                builder.ins().jump(target, &[]);
            }
            Terminator::Branch {
                cond,
                then_label,
                else_label,
            } => {
                let c = builder.use_var(self.reg(*cond)?);
                let then_block = lookup_block(block_map, *then_label, &self.lir.name)?;
                let else_block = lookup_block(block_map, *else_label, &self.lir.name)?;
                builder.ins().brif(c, then_block, &[], else_block, &[]);
            }
        }
        Ok(())
    }

    fn func_ref(&mut self, builder: &mut FunctionBuilder, name: &str) -> Result<FuncRef, JitError> {
        if let Some(r) = self.func_refs.get(name) {
            return Ok(*r);
        }
        let id = self.symbols.functions.get(name).ok_or_else(|| {
            JitError::InvalidLir(format!("{}: call to undeclared function {}", self.lir.name, name))
        })?;
        let r = self.module.declare_func_in_func(*id, builder.func);
        self.func_refs.insert(name.to_string(), r);
        Ok(r)
    }

    fn global_addr(&mut self, builder: &mut FunctionBuilder, name: &str) -> Result<Value, JitError> {
        let gv = match self.data_refs.get(name) {
            Some(gv) => *gv,
            None => {
                let id = self.symbols.data.get(name).ok_or_else(|| {
                    JitError::InvalidLir(format!(
                        "{}: reference to undeclared global {}",
                        self.lir.name, name
                    ))
                })?;
                let gv = self.module.declare_data_in_func(*id, builder.func);
                self.data_refs.insert(name.to_string(), gv);
                gv
            }
        };
        Ok(builder.ins().symbol_value(I64, gv))
    }
}

fn lookup_block(
    block_map: &FxHashMap<Label, Block>,
    label: Label,
    func: &str,
) -> Result<Block, JitError> {
    block_map
        .get(&label)
        .copied()
        .ok_or_else(|| JitError::InvalidLir(format!("{}: unknown block L{}", func, label.0)))
}

fn translate_binop(builder: &mut FunctionBuilder, op: BinOp, lhs: Value, rhs: Value) -> Value {
    match op {
        BinOp::Add => builder.ins().iadd(lhs, rhs),
        BinOp::Sub => builder.ins().isub(lhs, rhs),
        BinOp::Mul => builder.ins().imul(lhs, rhs),
        BinOp::Div | BinOp::Rem => {
            // Neither case may trap: x / 0 yields 0, and i64::MIN / -1
            // wraps like i64::wrapping_div. Dividing by 1 instead gives
            // exactly the wrapped quotient and remainder for the latter.
            let is_zero = builder.ins().icmp_imm(IntCC::Equal, rhs, 0);
            let lhs_min = builder.ins().icmp_imm(IntCC::Equal, lhs, i64::MIN);
            let rhs_neg_one = builder.ins().icmp_imm(IntCC::Equal, rhs, -1);
            let overflows = builder.ins().band(lhs_min, rhs_neg_one);
            let substitute = builder.ins().bor(is_zero, overflows);
            let one = builder.ins().iconst(I64, 1);
            let zero = builder.ins().iconst(I64, 0);
            let divisor = builder.ins().select(substitute, one, rhs);
            let q = if op == BinOp::Div {
                builder.ins().sdiv(lhs, divisor)
            } else {
                builder.ins().srem(lhs, divisor)
            };
            builder.ins().select(is_zero, zero, q)
        }
    }
}
