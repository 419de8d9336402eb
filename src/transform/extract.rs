use super::shadow::shadow_namespace;
use super::{TransformContext, TransformResult, Transformer};
use crate::ast::{AssignTarget, Decl, DeclId, Expr, Stmt, VarDecl};

/// Turns top-level locals of a wrapper into session globals.
///
/// `int x = 5;` typed at the prompt becomes a global `x` plus the
/// assignment `x = 5` in the wrapper, so later fragments can use `x`.
/// References to the local later in the wrapper are rewritten to the
/// global.
pub struct DeclExtractor;

impl Transformer for DeclExtractor {
    fn name(&self) -> &'static str {
        "DeclExtractor"
    }

    fn transform(&mut self, decl: DeclId, cx: &mut TransformContext<'_>) -> TransformResult {
        if !cx.options().declaration_extraction {
            return TransformResult::Unchanged;
        }
        let Some((mut body, location)) = cx.decls_mut().get_mut(decl).and_then(|d| {
            let location = d.location;
            d.as_function_mut()
                .and_then(|f| f.body.take())
                .map(|b| (b, location))
        }) else {
            return TransformResult::Unchanged;
        };

        let mut result = TransformResult::Unchanged;
        for i in 0..body.len() {
            let Stmt::Local { name, init } = &mut body[i] else {
                continue;
            };
            let name = name.clone();
            let init = init.take();

            let clashes = cx
                .decls()
                .lookup(&name)
                .and_then(|id| cx.decls().get(id))
                .is_some_and(|d| d.is_definition());
            let mut global = Decl::var(name.as_str(), VarDecl::default(), location);
            if clashes {
                if !cx.options().enable_shadowing {
                    cx.diags()
                        .error(location, format!("redefinition of '{}'", name));
                    result = TransformResult::Invalid;
                    break;
                }
                let ns = shadow_namespace(cx.transaction().id());
                global.linkage_name = format!("{}::{}", ns, name);
                cx.set_shadow_namespace(ns);
            }

            let id = cx.decls_mut().insert(global);
            cx.decls_mut().make_visible(id);
            cx.emit(id);

            body[i] = match init {
                Some(value) => Stmt::Expr(Expr::Assign {
                    target: AssignTarget::Global(id),
                    value: Box::new(value),
                }),
                None => Stmt::Null,
            };
            rewrite_block(&mut body[i + 1..], &name, id);
        }

        if let Some(f) = cx.decls_mut().get_mut(decl).and_then(|d| d.as_function_mut()) {
            f.body = Some(body);
        }
        result
    }
}

/// Rewrite uses of local `name` to `global` until a redeclaration hides it.
fn rewrite_block(stmts: &mut [Stmt], name: &str, global: DeclId) {
    for stmt in stmts {
        if rewrite_stmt(stmt, name, global) {
            return;
        }
    }
}

/// Returns true when `stmt` redeclares `name` in the enclosing scope.
fn rewrite_stmt(stmt: &mut Stmt, name: &str, global: DeclId) -> bool {
    match stmt {
        Stmt::Null | Stmt::Return(None) => false,
        Stmt::Expr(e) | Stmt::Return(Some(e)) => {
            rewrite_expr(e, name, global);
            false
        }
        Stmt::Local { name: local, init } => {
            if let Some(e) = init {
                rewrite_expr(e, name, global);
            }
            local == name
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            rewrite_expr(cond, name, global);
            rewrite_stmt(then_branch, name, global);
            if let Some(e) = else_branch {
                rewrite_stmt(e, name, global);
            }
            false
        }
        Stmt::While { cond, body } => {
            rewrite_expr(cond, name, global);
            rewrite_stmt(body, name, global);
            false
        }
        Stmt::Block(inner) => {
            rewrite_block(inner, name, global);
            false
        }
    }
}

fn rewrite_expr(expr: &mut Expr, name: &str, global: DeclId) {
    match expr {
        Expr::Local(n) if n == name => *expr = Expr::DeclRef(global),
        Expr::Int(_) | Expr::Local(_) | Expr::DeclRef(_) => {}
        Expr::Call { args, .. } => {
            for a in args {
                rewrite_expr(a, name, global);
            }
        }
        Expr::Unary { operand, .. } => rewrite_expr(operand, name, global),
        Expr::Binary { lhs, rhs, .. } => {
            rewrite_expr(lhs, name, global);
            rewrite_expr(rhs, name, global);
        }
        Expr::Assign { target, value } => {
            rewrite_expr(value, name, global);
            if matches!(target, AssignTarget::Local(n) if n == name) {
                *target = AssignTarget::Global(global);
            }
        }
    }
}
