//! LIR type definitions

/// Virtual register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(pub u32);

impl Reg {
    pub fn new(id: u32) -> Self {
        Reg(id)
    }
}

/// Basic block label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

impl Label {
    pub fn new(id: u32) -> Self {
        Label(id)
    }
}

/// How a symbol is exported from its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolLinkage {
    /// Strong, session-visible definition.
    External,
    /// May be defined by several modules; the first one loaded wins.
    Weak,
    /// Visible only inside its own module.
    Internal,
}

/// A LIR function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    /// Linkage name
    pub name: String,
    pub linkage: SymbolLinkage,
    /// Number of i64 parameters. Every function returns one i64.
    pub num_params: u32,
    /// Number of registers used
    pub num_regs: u32,
    /// Number of local slots needed
    pub num_locals: u32,
    /// Basic blocks
    pub blocks: Vec<BasicBlock>,
    /// Entry block label
    pub entry: Label,
}

impl FunctionDef {
    pub fn new(name: impl Into<String>, linkage: SymbolLinkage, num_params: u32) -> Self {
        FunctionDef {
            name: name.into(),
            linkage,
            num_params,
            num_regs: 0,
            num_locals: 0,
            blocks: Vec::new(),
            entry: Label(0),
        }
    }

    /// Instructions plus terminators, the size measure used by the weak
    /// definition reuse policy.
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len() + 1).sum()
    }
}

/// A basic block - sequence of instructions ending in a terminator
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub label: Label,
    pub instructions: Vec<LirInstr>,
    pub terminator: Terminator,
}

/// A global i64 cell
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDef {
    pub name: String,
    pub linkage: SymbolLinkage,
    pub init: i64,
}

/// LIR instruction
#[derive(Debug, Clone, PartialEq)]
pub enum LirInstr {
    // === Constants ===
    /// Load a constant into a register
    Const { dst: Reg, value: i64 },

    // === Variables ===
    /// Read an incoming parameter
    LoadParam { dst: Reg, index: u32 },
    /// Load from local slot
    LoadLocal { dst: Reg, slot: u32 },
    /// Store to local slot
    StoreLocal { slot: u32, src: Reg },
    /// Load a global cell by linkage name
    LoadGlobal { dst: Reg, symbol: String },
    /// Store a global cell by linkage name
    StoreGlobal { symbol: String, src: Reg },

    // === Function Calls ===
    /// Direct call by linkage name
    Call {
        dst: Reg,
        callee: String,
        args: Vec<Reg>,
    },

    // === Primitive Operations ===
    /// Binary arithmetic
    BinOp {
        dst: Reg,
        op: BinOp,
        lhs: Reg,
        rhs: Reg,
    },
    /// Unary operations
    UnaryOp { dst: Reg, op: UnaryOp, src: Reg },
    /// Comparison, producing 0 or 1
    Compare {
        dst: Reg,
        op: CmpOp,
        lhs: Reg,
        rhs: Reg,
    },
}

/// Binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Unary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Comparison operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Block terminator - how control leaves a block
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Return from function
    Return(Reg),
    /// Unconditional jump
    Jump(Label),
    /// Conditional branch
    Branch {
        cond: Reg,
        then_label: Label,
        else_label: Label,
    },
}
