//! Declaration collector
//!
//! Single intake point between the frontend and the current transaction.
//! Every frontend callback ends up in `DeclCollector::handle` with the tag
//! of the callback that produced the batch, so arrival order across
//! callbacks is preserved in one queue.
//!
//! Top-level declarations pass through the transformer chains first,
//! unless they were deserialized from a precompiled artifact. Declarations
//! a transformer emits are queued and appended after the current batch
//! without being transformed again, so a transformer can never recurse
//! into itself.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::ast::{is_wrapper, DeclId, DeclStore};
use crate::diag::DiagnosticsEngine;
use crate::error::CollectorError;
use crate::transaction::{
    ConsumerCallInfo, DeclGroup, DelayCallInfo, MacroDirectiveInfo, TransactionArena,
    TransactionId,
};
use crate::transform::{TransformContext, TransformResult, Transformer};

/// Downstream receiver of finalized batches, in arrival order.
pub trait DeclSink {
    fn handle_batch(&mut self, transaction: TransactionId, batch: &DelayCallInfo, decls: &DeclStore);
}

/// Session state the collector writes into.
pub(crate) struct CollectorEnv<'a> {
    pub arena: &'a mut TransactionArena,
    pub decls: &'a mut DeclStore,
    pub diags: &'a mut DiagnosticsEngine,
}

struct Pending {
    group: DeclGroup,
    call: ConsumerCallInfo,
    transform: bool,
}

pub struct DeclCollector {
    transaction_transformers: Vec<Box<dyn Transformer>>,
    wrapper_transformers: Vec<Box<dyn Transformer>>,
    current: Option<TransactionId>,
    downstream: Option<Box<dyn DeclSink>>,
}

impl DeclCollector {
    pub fn new() -> Self {
        DeclCollector {
            transaction_transformers: Vec::new(),
            wrapper_transformers: Vec::new(),
            current: None,
            downstream: None,
        }
    }

    /// Install the transformer chains, replacing any previous ones.
    pub fn setup(
        &mut self,
        transaction_transformers: Vec<Box<dyn Transformer>>,
        wrapper_transformers: Vec<Box<dyn Transformer>>,
    ) {
        debug!(
            transaction = transaction_transformers.len(),
            wrapper = wrapper_transformers.len(),
            "installing transformers"
        );
        self.transaction_transformers = transaction_transformers;
        self.wrapper_transformers = wrapper_transformers;
    }

    /// Chain a consumer that sees every batch after it was appended.
    pub fn set_downstream(&mut self, sink: Option<Box<dyn DeclSink>>) {
        self.downstream = sink;
    }

    pub fn transaction(&self) -> Option<TransactionId> {
        self.current
    }

    pub fn set_transaction(&mut self, id: Option<TransactionId>) {
        self.current = id;
    }

    pub(crate) fn handle(
        &mut self,
        group: DeclGroup,
        call: ConsumerCallInfo,
        env: &mut CollectorEnv<'_>,
    ) -> Result<(), CollectorError> {
        let cur = self.current.ok_or(CollectorError::NoTransaction)?;
        let mut queue = VecDeque::new();
        queue.push_back(Pending {
            group,
            call,
            transform: call == ConsumerCallInfo::HandleTopLevelDecl,
        });

        while let Some(item) = queue.pop_front() {
            let from_cache = item
                .group
                .iter()
                .all(|id| env.decls.get(*id).is_some_and(|d| d.from_ast_file));
            let group = if item.transform && !from_cache {
                let mut emitted = Vec::new();
                let group = self.transform_group(item.group, cur, env, &mut emitted)?;
                queue.extend(emitted.into_iter().map(|id| Pending {
                    group: DeclGroup::from_elem(id, 1),
                    call: ConsumerCallInfo::HandleTopLevelDecl,
                    transform: false,
                }));
                group
            } else {
                item.group
            };
            if group.is_empty() {
                continue;
            }

            let batch = DelayCallInfo::new(group, item.call);
            trace!(
                transaction = %cur,
                call = %batch.call,
                decls = batch.group.len(),
                "collected batch"
            );
            env.arena.require_mut(cur)?.append(batch.clone(), env.decls)?;
            if let Some(sink) = &mut self.downstream {
                sink.handle_batch(cur, &batch, env.decls);
            }
        }
        Ok(())
    }

    pub(crate) fn handle_macro(
        &mut self,
        info: MacroDirectiveInfo,
        env: &mut CollectorEnv<'_>,
    ) -> Result<(), CollectorError> {
        let cur = self.current.ok_or(CollectorError::NoTransaction)?;
        trace!(transaction = %cur, name = %info.name, "collected macro directive");
        env.arena.require_mut(cur)?.append_macro(info)?;
        Ok(())
    }

    fn transform_group(
        &mut self,
        group: DeclGroup,
        cur: TransactionId,
        env: &mut CollectorEnv<'_>,
        emitted: &mut Vec<DeclId>,
    ) -> Result<DeclGroup, CollectorError> {
        let mut out = DeclGroup::new();
        for decl in group {
            let tx = env.arena.require_mut(cur)?;
            let mut cx = TransformContext::new(&mut *env.decls, &mut *env.diags, tx, &mut *emitted);
            let Some(decl) = run_chain(&mut self.transaction_transformers, decl, &mut cx) else {
                continue;
            };
            let wrapped = cx.decls().get(decl).is_some_and(is_wrapper);
            let decl = if wrapped {
                run_chain(&mut self.wrapper_transformers, decl, &mut cx)
            } else {
                Some(decl)
            };
            out.extend(decl);
        }
        Ok(out)
    }
}

impl Default for DeclCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one chain. `None` means the declaration was dropped and forgotten.
fn run_chain(
    chain: &mut [Box<dyn Transformer>],
    decl: DeclId,
    cx: &mut TransformContext<'_>,
) -> Option<DeclId> {
    let mut current = decl;
    for transformer in chain.iter_mut() {
        match transformer.transform(current, cx) {
            TransformResult::Unchanged => {}
            TransformResult::Replaced(new) => {
                if new != current {
                    cx.decls_mut().forget(current);
                }
                current = new;
            }
            TransformResult::Suppressed => {
                debug!(transformer = transformer.name(), "declaration suppressed");
                cx.decls_mut().forget(current);
                return None;
            }
            TransformResult::Invalid => {
                let name = cx
                    .decls()
                    .get(current)
                    .map(|d| d.name.clone())
                    .unwrap_or_default();
                warn!(
                    transformer = transformer.name(),
                    decl = %name,
                    "transformer rejected declaration"
                );
                cx.decls_mut().forget(current);
                return None;
            }
        }
    }
    Some(current)
}
