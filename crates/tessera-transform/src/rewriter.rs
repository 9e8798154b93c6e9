//! Callback-table rewriting.
//!
//! A [`Rewriter`] is a pass assembled from closures keyed by node kind
//! instead of a type implementing [`ExprMutator`]. Nodes are rebuilt
//! post-order and normalized; the callback registered for the rebuilt
//! node's kind, if any, then gets the node and the builder, and its result is
//! normalized again.

use std::fmt;

use rustc_hash::FxHashMap;
use tessera_ir::{Expr, ExprTag};

use crate::block_builder::BlockBuilder;
use crate::error::Result;
use crate::mutator::{ExprMutator, MutatorContext};

/// A rewrite callback. It may emit bindings through the builder.
pub type RewriteFn = Box<dyn FnMut(&mut BlockBuilder, Expr) -> Result<Expr>>;

/// A pass made of rewrite callbacks keyed by [`ExprTag`].
pub struct Rewriter {
    ctx: MutatorContext,
    rules: FxHashMap<ExprTag, RewriteFn>,
}

impl fmt::Debug for Rewriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rewriter")
            .field("ctx", &self.ctx)
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Rewriter {
    pub fn new(builder: BlockBuilder) -> Self {
        Self {
            ctx: MutatorContext::new(builder),
            rules: FxHashMap::default(),
        }
    }

    /// Register `rule` for nodes of kind `tag`, replacing any earlier one.
    pub fn on<F>(mut self, tag: ExprTag, rule: F) -> Self
    where
        F: FnMut(&mut BlockBuilder, Expr) -> Result<Expr> + 'static,
    {
        self.rules.insert(tag, Box::new(rule));
        self
    }

    pub fn has_rule(&self, tag: ExprTag) -> bool {
        self.rules.contains_key(&tag)
    }

    pub fn into_builder(self) -> BlockBuilder {
        self.ctx.into_builder()
    }
}

impl ExprMutator for Rewriter {
    fn context(&mut self) -> &mut MutatorContext {
        &mut self.ctx
    }

    fn visit_expr(&mut self, expr: &Expr) -> Result<Expr> {
        let rebuilt = self.visit_expr_post_order(expr)?;
        match self.rules.get_mut(&rebuilt.tag()) {
            Some(rule) => {
                let rewritten = rule(&mut self.ctx.builder, rebuilt)?;
                self.ctx.builder.normalize(rewritten)
            }
            None => Ok(rebuilt),
        }
    }
}
