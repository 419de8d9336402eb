use std::fmt;

/// Outcome of handing a fragment to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationResult {
    Success,
    Failure,
    /// The input is incomplete, for example an unclosed brace. Nothing was
    /// compiled; the text is kept until the rest arrives.
    MoreInputExpected,
}

/// Outcome of running generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    Success,
    /// The session has no code generator.
    NoCodeGen,
    FunctionNotCompiled,
    UnresolvedSymbols,
    CompilationError,
    UnknownFunction,
    /// The transaction produced no code to run.
    NoModule,
}

impl ExecutionResult {
    pub fn is_error(self) -> bool {
        !matches!(
            self,
            ExecutionResult::Success | ExecutionResult::NoCodeGen
        )
    }
}

/// Result of an evaluated fragment. Every minic value is a 64-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Value {
    /// Nothing was evaluated.
    #[default]
    Invalid,
    Void,
    Int(i64),
}

impl Value {
    pub fn is_valid(self) -> bool {
        self != Value::Invalid
    }

    pub fn as_i64(self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Invalid => write!(f, "<invalid>"),
            Value::Void => write!(f, "(void)"),
            Value::Int(n) => write!(f, "(long) {}", n),
        }
    }
}
