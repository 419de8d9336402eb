//! Module compiler: CodeModule -> Cranelift IR -> native code
//!
//! One `ModuleCompiler` builds one `JITModule`. Imports are bound to the
//! absolute addresses the loader resolved before compilation started.

use cranelift_codegen::ir::types::I64;
use cranelift_codegen::ir::{AbiParam, Signature, UserFuncName};
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module};
use rustc_hash::FxHashMap;

use crate::lir::{CodeModule, Import, ImportKind, SymbolLinkage};

use super::code::LoadedCode;
use super::translate::FunctionTranslator;
use super::JitError;

/// Build a native ISA for `opt_level` (0..=3).
pub(crate) fn build_isa(opt_level: u8) -> Result<OwnedTargetIsa, JitError> {
    let level = match opt_level {
        0 => "none",
        1 | 2 => "speed",
        _ => "speed_and_size",
    };
    let mut flag_builder = settings::builder();
    flag_builder
        .set("use_colocated_libcalls", "false")
        .map_err(|e| JitError::Isa(e.to_string()))?;
    flag_builder
        .set("is_pic", "false")
        .map_err(|e| JitError::Isa(e.to_string()))?;
    flag_builder
        .set("opt_level", level)
        .map_err(|e| JitError::Isa(e.to_string()))?;

    let isa_builder = cranelift_native::builder().map_err(|e| JitError::Isa(e.to_string()))?;
    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| JitError::Isa(e.to_string()))
}

/// Declared ids of every symbol a module can reference.
#[derive(Default)]
pub(crate) struct ModuleSymbols {
    pub(crate) functions: FxHashMap<String, FuncId>,
    pub(crate) data: FxHashMap<String, DataId>,
}

/// A symbol defined by a compiled module, with its final address.
#[derive(Debug, Clone)]
pub(crate) struct DefinedSymbol {
    pub(crate) name: String,
    pub(crate) address: usize,
    pub(crate) linkage: SymbolLinkage,
}

pub(crate) struct CompiledModule {
    pub(crate) code: LoadedCode,
    pub(crate) defined: Vec<DefinedSymbol>,
}

impl CompiledModule {
    pub(crate) fn address_of(&self, name: &str) -> Option<usize> {
        self.defined
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.address)
    }
}

pub(crate) struct ModuleCompiler {
    module: JITModule,
    symbols: ModuleSymbols,
}

impl ModuleCompiler {
    /// Create a compiler whose imports are bound to `imports`' addresses.
    pub(crate) fn new(isa: OwnedTargetIsa, imports: &[(Import, usize)]) -> Result<Self, JitError> {
        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        for (import, address) in imports {
            builder.symbol(import.name.as_str(), *address as *const u8);
        }
        let mut module = JITModule::new(builder);

        let mut symbols = ModuleSymbols::default();
        for (import, _) in imports {
            match import.kind {
                ImportKind::Function { num_params } => {
                    let sig = make_signature(&module, num_params);
                    let id = module
                        .declare_function(&import.name, Linkage::Import, &sig)
                        .map_err(|e| JitError::CompilationFailed(e.to_string()))?;
                    symbols.functions.insert(import.name.clone(), id);
                }
                ImportKind::Data => {
                    let id = module
                        .declare_data(&import.name, Linkage::Import, true, false)
                        .map_err(|e| JitError::CompilationFailed(e.to_string()))?;
                    symbols.data.insert(import.name.clone(), id);
                }
            }
        }
        Ok(ModuleCompiler { module, symbols })
    }

    /// Compile and finalize every definition of `code`.
    pub(crate) fn compile(mut self, code: &CodeModule) -> Result<CompiledModule, JitError> {
        // Declare everything first so functions can reference each other.
        let mut func_ids = Vec::with_capacity(code.functions.len());
        for f in &code.functions {
            let sig = make_signature(&self.module, f.num_params);
            let id = self
                .module
                .declare_function(&f.name, linkage(f.linkage), &sig)
                .map_err(|e| JitError::CompilationFailed(e.to_string()))?;
            self.symbols.functions.insert(f.name.clone(), id);
            func_ids.push(id);
        }
        let mut data_ids = Vec::with_capacity(code.globals.len());
        for g in &code.globals {
            let id = self
                .module
                .declare_data(&g.name, linkage(g.linkage), true, false)
                .map_err(|e| JitError::CompilationFailed(e.to_string()))?;
            let mut desc = DataDescription::new();
            desc.define(g.init.to_le_bytes().to_vec().into_boxed_slice());
            desc.set_align(8);
            self.module
                .define_data(id, &desc)
                .map_err(|e| JitError::CompilationFailed(e.to_string()))?;
            self.symbols.data.insert(g.name.clone(), id);
            data_ids.push(id);
        }

        let mut builder_ctx = FunctionBuilderContext::new();
        for (f, id) in code.functions.iter().zip(&func_ids) {
            let mut ctx = self.module.make_context();
            ctx.func.signature = make_signature(&self.module, f.num_params);
            ctx.func.name = UserFuncName::user(0, id.as_u32());
            {
                let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
                let mut translator = FunctionTranslator::new(&mut self.module, &self.symbols, f);
                translator.translate(&mut builder)?;
                builder.finalize();
            }
            self.module
                .define_function(*id, &mut ctx)
                .map_err(|e| JitError::CompilationFailed(format!("{}: {}", f.name, e)))?;
            self.module.clear_context(&mut ctx);
        }

        self.module
            .finalize_definitions()
            .map_err(|e| JitError::CompilationFailed(e.to_string()))?;

        let mut defined = Vec::with_capacity(func_ids.len() + data_ids.len());
        for (f, id) in code.functions.iter().zip(&func_ids) {
            defined.push(DefinedSymbol {
                name: f.name.clone(),
                address: self.module.get_finalized_function(*id) as usize,
                linkage: f.linkage,
            });
        }
        for (g, id) in code.globals.iter().zip(&data_ids) {
            let (ptr, _) = self.module.get_finalized_data(*id);
            defined.push(DefinedSymbol {
                name: g.name.clone(),
                address: ptr as usize,
                linkage: g.linkage,
            });
        }

        Ok(CompiledModule {
            code: LoadedCode::new(self.module),
            defined,
        })
    }
}

fn make_signature(module: &JITModule, num_params: u32) -> Signature {
    let mut sig = module.make_signature();
    for _ in 0..num_params {
        sig.params.push(AbiParam::new(I64));
    }
    sig.returns.push(AbiParam::new(I64));
    sig
}

fn linkage(l: SymbolLinkage) -> Linkage {
    match l {
        SymbolLinkage::External | SymbolLinkage::Weak => Linkage::Export,
        SymbolLinkage::Internal => Linkage::Local,
    }
}
