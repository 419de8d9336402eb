use tracing::debug;

use super::{TransformContext, TransformResult, Transformer};
use crate::ast::{is_wrapper, DeclId, DeclStore};
use crate::transaction::TransactionId;

/// Namespace that holds a transaction's shadowing definitions.
pub fn shadow_namespace(id: TransactionId) -> String {
    format!("__kiln_N5{}", id.as_u32())
}

/// Whether any declaration of `decl`'s name below it, or visible instead of
/// it, already provides a definition.
pub(crate) fn shadows_definition(decls: &DeclStore, decl: DeclId) -> bool {
    let Some(name) = decls.get(decl).map(|d| d.name.as_str()) else {
        return false;
    };
    let mut cur = if decls.is_visible(decl) {
        decls.previous_declaration(decl)
    } else {
        decls.lookup(name)
    };
    while let Some(id) = cur {
        if decls.get(id).is_some_and(|d| d.is_definition()) {
            return true;
        }
        cur = decls.previous_declaration(id);
    }
    false
}

/// Moves redefinitions into a transaction-unique namespace.
///
/// Code loaded for the older definition keeps working under its original
/// linkage name; lookups and code generated from now on see the new one.
pub struct DefinitionShadower;

impl Transformer for DefinitionShadower {
    fn name(&self) -> &'static str {
        "DefinitionShadower"
    }

    fn transform(&mut self, decl: DeclId, cx: &mut TransformContext<'_>) -> TransformResult {
        if !cx.options().enable_shadowing {
            return TransformResult::Unchanged;
        }
        let Some(d) = cx.decls().get(decl) else {
            return TransformResult::Invalid;
        };
        if is_wrapper(d) || !d.is_definition() || !shadows_definition(cx.decls(), decl) {
            return TransformResult::Unchanged;
        }
        let ns = shadow_namespace(cx.transaction().id());
        if let Some(d) = cx.decls_mut().get_mut(decl) {
            d.linkage_name = format!("{}::{}", ns, d.name);
            debug!(name = %d.name, linkage = %d.linkage_name, "shadowing previous definition");
        }
        cx.set_shadow_namespace(ns);
        TransformResult::Unchanged
    }
}
