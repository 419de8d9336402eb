use super::{Decl, DeclKind, Expr, FunctionDecl, Stmt};

/// Prefix of every engine-generated name. Wrapper functions carry it, and
/// so do the names handed out by `Interpreter::create_unique_name`.
pub const UNIQUE_PREFIX: &str = "__kiln_unique";

/// Whether `decl` is a synthesized wrapper around prompt input.
pub fn is_wrapper(decl: &Decl) -> bool {
    matches!(decl.kind, DeclKind::Function(_)) && decl.name.starts_with(UNIQUE_PREFIX)
}

/// Locate the last expression statement of a function body, skipping
/// trailing null statements.
///
/// When the last meaningful statement is a local declaration and
/// `omit_decl_stmts` is false, a reference to that local is appended right
/// after it and becomes the result. Returns the index of the expression
/// statement in the body.
pub fn get_or_create_last_expr(function: &mut FunctionDecl, omit_decl_stmts: bool) -> Option<usize> {
    let body = function.body.as_mut()?;
    let last = body.iter().rposition(|s| !matches!(s, Stmt::Null))?;
    match &body[last] {
        Stmt::Expr(_) => Some(last),
        Stmt::Local { name, .. } if !omit_decl_stmts => {
            let reference = Stmt::Expr(Expr::Local(name.clone()));
            body.insert(last + 1, reference);
            Some(last + 1)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VarDecl;
    use crate::source::SourceLocation;

    fn body(stmts: Vec<Stmt>) -> FunctionDecl {
        FunctionDecl {
            body: Some(stmts),
            ..FunctionDecl::default()
        }
    }

    #[test]
    fn test_is_wrapper() {
        let wrapper = Decl::function(
            format!("{}_3", UNIQUE_PREFIX),
            FunctionDecl::default(),
            SourceLocation::INVALID,
        );
        let plain = Decl::function("f", FunctionDecl::default(), SourceLocation::INVALID);
        let var = Decl::var(
            format!("{}_4", UNIQUE_PREFIX),
            VarDecl::default(),
            SourceLocation::INVALID,
        );
        assert!(is_wrapper(&wrapper));
        assert!(!is_wrapper(&plain));
        assert!(!is_wrapper(&var));
    }

    #[test]
    fn test_last_expr_skips_null_statements() {
        let mut f = body(vec![
            Stmt::Expr(Expr::Int(1)),
            Stmt::Expr(Expr::Int(2)),
            Stmt::Null,
            Stmt::Null,
        ]);
        assert_eq!(get_or_create_last_expr(&mut f, true), Some(1));
    }

    #[test]
    fn test_last_decl_gets_reference() {
        let mut f = body(vec![Stmt::Local {
            name: "x".into(),
            init: Some(Expr::Int(5)),
        }]);
        assert_eq!(get_or_create_last_expr(&mut f, true), None);
        assert_eq!(get_or_create_last_expr(&mut f, false), Some(1));
        let stmts = f.body.as_ref().unwrap();
        assert_eq!(stmts[1], Stmt::Expr(Expr::Local("x".into())));
    }

    #[test]
    fn test_no_expression() {
        let mut f = body(vec![Stmt::Null, Stmt::Return(None)]);
        assert_eq!(get_or_create_last_expr(&mut f, false), None);
        let mut empty = body(vec![]);
        assert_eq!(get_or_create_last_expr(&mut empty, false), None);
        let mut proto = FunctionDecl::default();
        assert_eq!(get_or_create_last_expr(&mut proto, false), None);
    }
}
