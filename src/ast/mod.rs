//! Declarations and the session-wide declaration store
//!
//! Declarations live in a generational arena. A `DeclId` carries the
//! generation of its slot, so an id that outlives a rollback or an unload
//! resolves to nothing instead of to whatever reused the slot.
//!
//! Name lookup is a stack per name: shadowing pushes, forgetting removes the
//! exact entry wherever it sits, so the declaration underneath becomes
//! visible again.

mod analyze;
mod store;

pub use analyze::{get_or_create_last_expr, is_wrapper, UNIQUE_PREFIX};
pub use store::{DeclStore, MacroDefinition};

use crate::source::SourceLocation;

/// Generation-checked handle to a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId {
    index: u32,
    generation: u32,
}

impl DeclId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    /// Source-level name, the key for lookup.
    pub name: String,
    /// Name the code generator emits. Differs from `name` once shadowed.
    pub linkage_name: String,
    pub kind: DeclKind,
    pub location: SourceLocation,
    /// Declaration deserialized from a precompiled artifact; never
    /// transformed and never re-emitted.
    pub from_ast_file: bool,
    pub is_invalid: bool,
}

impl Decl {
    pub fn function(name: impl Into<String>, function: FunctionDecl, location: SourceLocation) -> Self {
        let name = name.into();
        Decl {
            linkage_name: name.clone(),
            name,
            kind: DeclKind::Function(function),
            location,
            from_ast_file: false,
            is_invalid: false,
        }
    }

    pub fn var(name: impl Into<String>, var: VarDecl, location: SourceLocation) -> Self {
        let name = name.into();
        Decl {
            linkage_name: name.clone(),
            name,
            kind: DeclKind::Var(var),
            location,
            from_ast_file: false,
            is_invalid: false,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionDecl> {
        match &self.kind {
            DeclKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut FunctionDecl> {
        match &mut self.kind {
            DeclKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&VarDecl> {
        match &self.kind {
            DeclKind::Var(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this declaration provides storage or a body, as opposed to
    /// merely announcing one.
    pub fn is_definition(&self) -> bool {
        match &self.kind {
            DeclKind::Function(f) => f.body.is_some(),
            DeclKind::Var(v) => !v.is_extern,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    Function(FunctionDecl),
    Var(VarDecl),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionDecl {
    pub params: Vec<String>,
    pub returns_void: bool,
    /// `None` for a prototype.
    pub body: Option<Vec<Stmt>>,
    /// Inline definitions get weak linkage.
    pub is_inline: bool,
    /// Index into `body` of the statement whose value the function returns.
    /// Set on wrappers whose last expression is extracted as the result.
    pub result: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VarDecl {
    pub init: Option<Expr>,
    pub is_extern: bool,
    /// Declared without an initializer; storage is materialized when the
    /// frontend completes the tentative definition.
    pub is_tentative: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Null,
    Expr(Expr),
    Local { name: String, init: Option<Expr> },
    Return(Option<Expr>),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While { cond: Expr, body: Box<Stmt> },
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Local(String),
    DeclRef(DeclId),
    Call { callee: DeclId, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign { target: AssignTarget, value: Box<Expr> },
}

impl Expr {
    /// Conservative: calls and assignments count as side effects.
    pub fn has_side_effects(&self) -> bool {
        match self {
            Expr::Int(_) | Expr::Local(_) | Expr::DeclRef(_) => false,
            Expr::Call { .. } | Expr::Assign { .. } => true,
            Expr::Unary { operand, .. } => operand.has_side_effects(),
            Expr::Binary { lhs, rhs, .. } => lhs.has_side_effects() || rhs.has_side_effects(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Local(String),
    Global(DeclId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}
