use super::{TransformContext, TransformResult, Transformer};
use crate::ast::{get_or_create_last_expr, DeclId, Expr, Stmt};

/// Makes a wrapper return the value of its last expression.
pub struct ValueExtractionSynthesizer;

impl Transformer for ValueExtractionSynthesizer {
    fn name(&self) -> &'static str {
        "ValueExtractionSynthesizer"
    }

    fn transform(&mut self, decl: DeclId, cx: &mut TransformContext<'_>) -> TransformResult {
        if !cx.options().wants_result() {
            return TransformResult::Unchanged;
        }
        let Some(mut function) = cx
            .decls()
            .get(decl)
            .and_then(|d| d.as_function())
            .cloned()
        else {
            return TransformResult::Unchanged;
        };
        let Some(index) = get_or_create_last_expr(&mut function, false) else {
            return TransformResult::Unchanged;
        };
        // A call to a void function has no value to hand back.
        let is_void_call = match function.body.as_ref().and_then(|b| b.get(index)) {
            Some(Stmt::Expr(Expr::Call { callee, .. })) => cx
                .decls()
                .get(*callee)
                .and_then(|d| d.as_function())
                .is_some_and(|f| f.returns_void),
            _ => false,
        };
        if !is_void_call {
            function.result = Some(index);
            function.returns_void = false;
        }
        if let Some(f) = cx.decls_mut().get_mut(decl).and_then(|d| d.as_function_mut()) {
            *f = function;
        }
        TransformResult::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Decl, DeclStore, FunctionDecl, UNIQUE_PREFIX};
    use crate::diag::DiagnosticsEngine;
    use crate::source::SourceLocation;
    use crate::transaction::{CompilationOptions, Transaction, ValuePrinting};

    fn run(store: &mut DeclStore, decl: DeclId, opts: CompilationOptions) {
        let mut t = Transaction::new(opts);
        let mut diags = DiagnosticsEngine::new();
        let mut emitted = Vec::new();
        let mut cx = TransformContext::new(store, &mut diags, &mut t, &mut emitted);
        ValueExtractionSynthesizer.transform(decl, &mut cx);
    }

    fn wrapper(store: &mut DeclStore, body: Vec<Stmt>) -> DeclId {
        store.insert(Decl::function(
            format!("{}_9", UNIQUE_PREFIX),
            FunctionDecl {
                body: Some(body),
                returns_void: true,
                ..FunctionDecl::default()
            },
            SourceLocation::INVALID,
        ))
    }

    #[test]
    fn test_result_marks_last_expression() {
        let mut store = DeclStore::new();
        let w = wrapper(&mut store, vec![Stmt::Expr(Expr::Int(3)), Stmt::Null]);
        let opts = CompilationOptions {
            value_printing: ValuePrinting::Enabled,
            ..CompilationOptions::default()
        };
        run(&mut store, w, opts);
        let f = store.get(w).unwrap().as_function().unwrap();
        assert_eq!(f.result, Some(0));
        assert!(!f.returns_void);
    }

    #[test]
    fn test_untouched_without_result_request() {
        let mut store = DeclStore::new();
        let w = wrapper(&mut store, vec![Stmt::Expr(Expr::Int(3))]);
        run(&mut store, w, CompilationOptions::default());
        assert_eq!(store.get(w).unwrap().as_function().unwrap().result, None);
    }

    #[test]
    fn test_void_call_has_no_result() {
        let mut store = DeclStore::new();
        let callee = store.insert(Decl::function(
            "log",
            FunctionDecl {
                returns_void: true,
                ..FunctionDecl::default()
            },
            SourceLocation::INVALID,
        ));
        let w = wrapper(
            &mut store,
            vec![Stmt::Expr(Expr::Call {
                callee,
                args: vec![],
            })],
        );
        let opts = CompilationOptions {
            result_evaluation: true,
            ..CompilationOptions::default()
        };
        run(&mut store, w, opts);
        assert_eq!(store.get(w).unwrap().as_function().unwrap().result, None);
    }
}
