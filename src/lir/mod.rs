//! Low-level Intermediate Representation (LIR)
//!
//! LIR is the code generator's output and the loader's input: functions
//! of register-based basic blocks over i64 values, plus global i64 cells.
//! Symbols are referenced by linkage name, so anything a module uses but
//! does not define is an import the loader has to resolve.
//!
//! Pipeline:
//! ```text
//! Decl batches → CodeGenerator → CodeModule → Loader → machine code
//! ```

mod module;
mod types;

pub use module::{CodeModule, Import, ImportKind};
pub use types::{
    BasicBlock, BinOp, CmpOp, FunctionDef, GlobalDef, Label, LirInstr, Reg, SymbolLinkage,
    Terminator, UnaryOp,
};
