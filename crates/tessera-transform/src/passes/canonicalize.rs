//! Binding canonicalization.
//!
//! Chains of trivial bindings such as `y = x; z = y` are collapsed so that
//! uses of `z` refer to `x` directly. Variables are grouped with a union-find
//! over identities. The anchor of a group is a variable bound to something
//! other than a variable, or a parameter. A variable bound to another
//! variable joins that variable's group when doing so keeps annotations
//! intact:
//!
//! - both shapes are absent, or both are present and provably equal
//! - both types are structurally equal
//! - a non-dataflow variable never ends up referring to a dataflow variable
//!
//! Bindings themselves are kept; dead bindings are removed separately.

use rustc_hash::FxHashMap;
use tessera_ir::{Binding, Expr, Function, MatchShape, Module, SeqExpr, Var, VarBinding, VarId, VarRef};
use tracing::{debug, instrument, trace};

use crate::block_builder::BlockBuilder;
use crate::config::TransformConfig;
use crate::error::{Result, TransformError};
use crate::mutator::{
    emit_preserving, walk_function, walk_match_shape, walk_seq_expr, walk_var_ref, ExprMutator,
    MutatorContext,
};

/// Union-find over variable identities. Every member maps to its parent;
/// anchors map to themselves.
#[derive(Debug, Default)]
struct VarUnifier {
    parent: FxHashMap<VarId, Var>,
}

impl VarUnifier {
    fn contains(&self, id: VarId) -> bool {
        self.parent.contains_key(&id)
    }

    fn insert(&mut self, var: &Var, parent: &Var) -> Result<()> {
        if self.parent.contains_key(&var.id) {
            return Err(TransformError::IdentityConflict {
                name: var.name_hint.clone(),
                id: var.id,
            });
        }
        self.parent.insert(var.id, parent.clone());
        Ok(())
    }

    fn insert_anchor(&mut self, var: &Var) -> Result<()> {
        self.insert(var, var)
    }

    /// The anchor of `var`'s group, compressing the path to it.
    fn find(&mut self, var: &Var) -> Var {
        let mut path = Vec::new();
        let mut current = var.clone();
        while let Some(parent) = self.parent.get(&current.id) {
            if parent.id == current.id {
                break;
            }
            path.push(current.id);
            current = parent.clone();
        }
        for id in path {
            self.parent.insert(id, current.clone());
        }
        current
    }
}

/// Replaces references to trivially rebound variables with the variable
/// they were bound to.
pub struct CanonicalizeBindings {
    ctx: MutatorContext,
    unifier: VarUnifier,
}

impl CanonicalizeBindings {
    pub fn new(builder: BlockBuilder) -> Self {
        Self {
            ctx: MutatorContext::new(builder),
            unifier: VarUnifier::default(),
        }
    }

    pub fn into_builder(self) -> BlockBuilder {
        self.ctx.into_builder()
    }

    /// Place `var`, bound to `value`, in the union-find.
    fn update_def(&mut self, var: &Var, value: &Expr) -> Result<()> {
        if let Some(value_var) = value.as_var() {
            if self.can_unify(var, &value_var) {
                trace!(var = %var.name_hint, with = %value_var.name_hint, "unified");
                return self.unifier.insert(var, &value_var);
            }
        }
        self.unifier.insert_anchor(var)
    }

    fn can_unify(&mut self, var: &Var, value_var: &Var) -> bool {
        let anchor = self.unifier.find(value_var);
        if !var.is_dataflow && anchor.is_dataflow {
            return false;
        }
        !self.annotations_differ(var, &anchor)
    }

    fn annotations_differ(&self, lhs: &Var, rhs: &Var) -> bool {
        let shapes_differ = match (lhs.shape(), rhs.shape()) {
            (None, None) => false,
            (Some(a), Some(b)) => !self.ctx.builder.shapes_provably_equal(a, b),
            _ => true,
        };
        shapes_differ || lhs.checked_type != rhs.checked_type
    }
}

impl ExprMutator for CanonicalizeBindings {
    fn context(&mut self) -> &mut MutatorContext {
        &mut self.ctx
    }

    fn visit_function(&mut self, expr: &Expr, func: &Function) -> Result<Expr> {
        // global functions start over; identities do not cross them
        if self.ctx.builder.depth() == 0 {
            self.unifier = VarUnifier::default();
        }
        for param in &func.params {
            self.unifier.insert_anchor(param)?;
        }
        walk_function(self, expr, func)
    }

    fn visit_seq_expr(&mut self, expr: &Expr, seq: &SeqExpr) -> Result<Expr> {
        for block in &seq.blocks {
            for binding in &block.bindings {
                match binding {
                    Binding::Var(b) => self.update_def(&b.var, &b.value)?,
                    Binding::MatchShape(m) => {
                        if let Some(var) = &m.var {
                            self.update_def(var, &m.value)?;
                        }
                    }
                }
            }
        }
        walk_seq_expr(self, expr, seq)
    }

    fn visit_var_ref(&mut self, expr: &Expr, var: &VarRef) -> Result<Expr> {
        if self.unifier.contains(var.id) {
            if let Some(referenced) = expr.as_var() {
                let anchor = self.unifier.find(&referenced);
                if anchor.id != var.id {
                    return Ok(match self.ctx.remap.lookup(anchor.id) {
                        Some(remapped) => remapped.to_expr(),
                        None => anchor.to_expr(),
                    });
                }
            }
        }
        walk_var_ref(self, expr, var)
    }

    /// The variable keeps its type; only substitutions inside its shape
    /// annotation change it.
    fn visit_var_binding(&mut self, binding: &VarBinding) -> Result<()> {
        let new_value = self.visit_expr(&binding.value)?;
        let new_var = self.visit_var_def(&binding.var)?;
        if new_var == binding.var && new_value == binding.value {
            emit_preserving(self, binding.clone())?;
            return Ok(());
        }
        let final_var =
            new_var.with_shape_and_type(new_var.shape().cloned(), binding.var.checked_type.clone());
        self.ctx.remap.record_if_changed(&binding.var, &final_var);
        emit_preserving(self, VarBinding::new(final_var, new_value))?;
        Ok(())
    }

    /// A match whose variable joined its value's group checks nothing the
    /// annotations do not already guarantee; it becomes a plain binding.
    fn visit_match_shape(&mut self, binding: &MatchShape) -> Result<()> {
        if let Some(var) = &binding.var {
            if self.unifier.find(var).id != var.id {
                let new_value = self.visit_expr(&binding.value)?;
                let new_var = self.visit_var_def(var)?;
                emit_preserving(self, VarBinding::new(new_var, new_value))?;
                return Ok(());
            }
        }
        walk_match_shape(self, binding)
    }
}

/// Canonicalize the bindings of every function in `module`.
#[instrument(skip_all, fields(functions = module.len()))]
pub fn canonicalize_bindings(module: &Module) -> Result<Module> {
    canonicalize_bindings_with(module, TransformConfig::default())
}

pub fn canonicalize_bindings_with(module: &Module, config: TransformConfig) -> Result<Module> {
    let builder = BlockBuilder::with_module(module.clone()).with_config(config);
    let result = CanonicalizeBindings::new(builder).transform_module()?;
    debug!(version = result.version(), "canonicalized bindings");
    Ok(result)
}
