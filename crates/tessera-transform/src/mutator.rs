//! Mutating traversal.
//!
//! [`ExprMutator`] rebuilds a program bottom-up through a [`BlockBuilder`].
//! Every node kind has a `visit_*` method whose default delegates to the
//! matching public `walk_*` function, so a pass overrides the kinds it cares
//! about and keeps the default traversal for the rest. Overrides can call
//! the `walk_*` function to fall back to the default behavior.
//!
//! Every visited expression is normalized before it is returned, so a pass
//! may return nested expressions and still produce A-normal form.
//!
//! # Variable definitions
//!
//! When visiting a binding changes the annotations of its variable, the
//! variable keeps its identity and the new version is recorded in the
//! context's [`VarRemap`]. Later references to the identity resolve to the
//! new version; references emitted before the change are left alone.

use smol_str::SmolStr;
use tessera_ir::{
    well_formed, Binding, BindingBlock, Call, Expr, ExprKind, Function, If, MatchShape, Module,
    PrimExpr, SeqExpr, Var, VarBinding, VarRef,
};
use tracing::{debug, instrument};

use crate::block_builder::BlockBuilder;
use crate::error::{Result, StructuralError, TransformError};
use crate::remap::VarRemap;

/// Where a traversal is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalPhase {
    #[default]
    NotStarted,
    /// Between global functions of a module.
    InModule,
    /// Inside a function or expression.
    InScope,
    Finished,
}

/// State owned by one traversal run.
#[derive(Debug)]
pub struct MutatorContext {
    pub builder: BlockBuilder,
    pub remap: VarRemap,
    phase: TraversalPhase,
    current_global: Option<SmolStr>,
}

impl MutatorContext {
    pub fn new(builder: BlockBuilder) -> Self {
        Self {
            builder,
            remap: VarRemap::new(),
            phase: TraversalPhase::NotStarted,
            current_global: None,
        }
    }

    pub fn phase(&self) -> TraversalPhase {
        self.phase
    }

    /// The global function being transformed by `transform_module`.
    pub fn current_global(&self) -> Option<&SmolStr> {
        self.current_global.as_ref()
    }

    pub fn into_builder(self) -> BlockBuilder {
        self.builder
    }
}

pub trait ExprMutator: Sized {
    fn context(&mut self) -> &mut MutatorContext;

    fn builder(&mut self) -> &mut BlockBuilder {
        &mut self.context().builder
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Transform a function with a fresh remap table.
    fn transform_function(&mut self, func: &Function) -> Result<Function> {
        let outer = self.context().phase;
        self.context().phase = TraversalPhase::InScope;
        self.context().remap.clear();
        let result = self.visit_expr(&Expr::function(func.clone()));
        self.context().phase = leave_scope(outer);
        let expr = result?;
        match expr.kind {
            ExprKind::Function(func) => Ok(*func),
            _ => Err(StructuralError::ExpectedFunction {
                found: expr.to_string(),
            }
            .into()),
        }
    }

    /// Transform an expression in a scope of its own with a fresh remap
    /// table.
    fn transform_expr(&mut self, expr: &Expr) -> Result<Expr> {
        let outer = self.context().phase;
        self.context().phase = TraversalPhase::InScope;
        self.context().remap.clear();
        let result = self.visit_with_new_scope(expr);
        self.context().phase = leave_scope(outer);
        result
    }

    /// Transform every function the builder's module holds when the run
    /// starts, in module order, and return the updated module.
    ///
    /// Functions added while the run is in progress are visible to lookups
    /// right away and are part of the result, but this run does not visit
    /// them.
    #[instrument(skip_all)]
    fn transform_module(&mut self) -> Result<Module> {
        let names = self.builder().get_module().names();
        self.context().phase = TraversalPhase::InModule;
        for name in names {
            // removed by an earlier function's visit
            let Some(func) = self.builder().lookup_function(&name).cloned() else {
                continue;
            };
            self.context().current_global = Some(name.clone());
            debug!(function = %name, "transforming global function");
            let result = self.transform_function(&func);
            self.context().current_global = None;
            let new_func = result?;
            if new_func != func {
                self.builder().update_function(&name, new_func)?;
            }
        }
        self.context().phase = TraversalPhase::Finished;
        let module = self.builder().get_module();
        if self.builder().config().check_well_formed {
            let errors = well_formed(&module);
            if !errors.is_empty() {
                return Err(TransformError::Malformed { errors });
            }
        }
        Ok(module)
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Dispatch on the node kind, then normalize the result.
    fn visit_expr(&mut self, expr: &Expr) -> Result<Expr> {
        let rebuilt = dispatch_expr(self, expr)?;
        self.builder().normalize(rebuilt)
    }

    /// Rebuild `expr` from its visited children with the default traversal,
    /// then normalize it. The node itself is not dispatched.
    fn visit_expr_post_order(&mut self, expr: &Expr) -> Result<Expr> {
        let rebuilt = walk_expr(self, expr)?;
        self.builder().normalize(rebuilt)
    }

    fn visit_constant(&mut self, expr: &Expr) -> Result<Expr> {
        Ok(expr.clone())
    }

    fn visit_var_ref(&mut self, expr: &Expr, var: &VarRef) -> Result<Expr> {
        walk_var_ref(self, expr, var)
    }

    fn visit_global_var(&mut self, expr: &Expr, _name: &SmolStr) -> Result<Expr> {
        Ok(expr.clone())
    }

    fn visit_op(&mut self, expr: &Expr, _name: &SmolStr) -> Result<Expr> {
        Ok(expr.clone())
    }

    fn visit_extern_func(&mut self, expr: &Expr, _name: &SmolStr) -> Result<Expr> {
        Ok(expr.clone())
    }

    fn visit_shape_expr(&mut self, expr: &Expr, values: &[PrimExpr]) -> Result<Expr> {
        walk_shape_expr(self, expr, values)
    }

    fn visit_prim_expr(&mut self, value: &PrimExpr) -> Result<PrimExpr> {
        Ok(value.clone())
    }

    fn visit_runtime_dep_shape(&mut self, expr: &Expr) -> Result<Expr> {
        Ok(expr.clone())
    }

    fn visit_tuple(&mut self, expr: &Expr, fields: &[Expr]) -> Result<Expr> {
        walk_tuple(self, expr, fields)
    }

    fn visit_tuple_get_item(&mut self, expr: &Expr, tuple: &Expr, index: usize) -> Result<Expr> {
        walk_tuple_get_item(self, expr, tuple, index)
    }

    fn visit_call(&mut self, expr: &Expr, call: &Call) -> Result<Expr> {
        walk_call(self, expr, call)
    }

    fn visit_if(&mut self, expr: &Expr, branch: &If) -> Result<Expr> {
        walk_if(self, expr, branch)
    }

    fn visit_function(&mut self, expr: &Expr, func: &Function) -> Result<Expr> {
        walk_function(self, expr, func)
    }

    fn visit_seq_expr(&mut self, expr: &Expr, seq: &SeqExpr) -> Result<Expr> {
        walk_seq_expr(self, expr, seq)
    }

    // ========================================================================
    // Bindings
    // ========================================================================

    fn visit_binding_block(&mut self, block: &BindingBlock) -> Result<BindingBlock> {
        walk_binding_block(self, block)
    }

    fn visit_binding(&mut self, binding: &Binding) -> Result<()> {
        walk_binding(self, binding)
    }

    fn visit_var_binding(&mut self, binding: &VarBinding) -> Result<()> {
        walk_var_binding(self, binding)
    }

    fn visit_match_shape(&mut self, binding: &MatchShape) -> Result<()> {
        walk_match_shape(self, binding)
    }

    /// Visit a variable at its definition. Returns the original variable
    /// unless its shape annotation changed.
    fn visit_var_def(&mut self, var: &Var) -> Result<Var> {
        walk_var_def(self, var)
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    /// Visit `expr` in a block of its own; hoisted bindings and the result
    /// become a sequence.
    fn visit_with_new_scope(&mut self, expr: &Expr) -> Result<Expr> {
        walk_with_new_scope(self, expr)
    }

    /// Run `f` inside a new block of the builder. The block is closed on
    /// every exit path.
    fn with_block<T, F>(&mut self, is_dataflow: bool, f: F) -> Result<(T, BindingBlock)>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let depth = self.builder().open_scope(is_dataflow)?;
        let result = f(self);
        self.builder().close_scope(depth, result)
    }
}

fn leave_scope(outer: TraversalPhase) -> TraversalPhase {
    match outer {
        TraversalPhase::InModule | TraversalPhase::InScope => outer,
        TraversalPhase::NotStarted | TraversalPhase::Finished => TraversalPhase::Finished,
    }
}

/// `kind` with `expr`'s metadata and span. The normalizer recomputes the
/// metadata and falls back to these values.
fn rebuild(expr: &Expr, kind: ExprKind) -> Expr {
    Expr {
        kind,
        checked_type: expr.checked_type.clone(),
        shape: expr.shape.clone(),
        span: expr.span,
    }
}

// ============================================================================
// Default traversal
// ============================================================================

/// Hand `expr` to the `visit_*` method of its kind.
pub fn dispatch_expr<M: ExprMutator>(m: &mut M, expr: &Expr) -> Result<Expr> {
    match &expr.kind {
        ExprKind::Constant(_) => m.visit_constant(expr),
        ExprKind::Var(var) => m.visit_var_ref(expr, var),
        ExprKind::GlobalVar(name) => m.visit_global_var(expr, name),
        ExprKind::Op(name) => m.visit_op(expr, name),
        ExprKind::ExternFunc(name) => m.visit_extern_func(expr, name),
        ExprKind::ShapeExpr(values) => m.visit_shape_expr(expr, values),
        ExprKind::RuntimeDepShape => m.visit_runtime_dep_shape(expr),
        ExprKind::Tuple(fields) => m.visit_tuple(expr, fields),
        ExprKind::TupleGetItem { tuple, index } => m.visit_tuple_get_item(expr, tuple, *index),
        ExprKind::Call(call) => m.visit_call(expr, call),
        ExprKind::If(branch) => m.visit_if(expr, branch),
        ExprKind::Function(func) => m.visit_function(expr, func),
        ExprKind::Seq(seq) => m.visit_seq_expr(expr, seq),
    }
}

/// The default rebuild of `expr`, whatever its kind.
pub fn walk_expr<M: ExprMutator>(m: &mut M, expr: &Expr) -> Result<Expr> {
    match &expr.kind {
        ExprKind::Constant(_)
        | ExprKind::GlobalVar(_)
        | ExprKind::Op(_)
        | ExprKind::ExternFunc(_)
        | ExprKind::RuntimeDepShape => Ok(expr.clone()),
        ExprKind::Var(var) => walk_var_ref(m, expr, var),
        ExprKind::ShapeExpr(values) => walk_shape_expr(m, expr, values),
        ExprKind::Tuple(fields) => walk_tuple(m, expr, fields),
        ExprKind::TupleGetItem { tuple, index } => walk_tuple_get_item(m, expr, tuple, *index),
        ExprKind::Call(call) => walk_call(m, expr, call),
        ExprKind::If(branch) => walk_if(m, expr, branch),
        ExprKind::Function(func) => walk_function(m, expr, func),
        ExprKind::Seq(seq) => walk_seq_expr(m, expr, seq),
    }
}

/// Resolve a reference through the remap table.
pub fn walk_var_ref<M: ExprMutator>(m: &mut M, expr: &Expr, var: &VarRef) -> Result<Expr> {
    match m.context().remap.lookup(var.id) {
        Some(new_var) => Ok(new_var.to_expr()),
        None => Ok(expr.clone()),
    }
}

pub fn walk_shape_expr<M: ExprMutator>(m: &mut M, expr: &Expr, values: &[PrimExpr]) -> Result<Expr> {
    let new_values = values
        .iter()
        .map(|v| m.visit_prim_expr(v))
        .collect::<Result<Vec<_>>>()?;
    if new_values.as_slice() == values {
        return Ok(expr.clone());
    }
    Ok(rebuild(expr, ExprKind::ShapeExpr(new_values)))
}

pub fn walk_tuple<M: ExprMutator>(m: &mut M, expr: &Expr, fields: &[Expr]) -> Result<Expr> {
    let new_fields = fields
        .iter()
        .map(|f| m.visit_expr(f))
        .collect::<Result<Vec<_>>>()?;
    if new_fields.as_slice() == fields {
        return Ok(expr.clone());
    }
    Ok(rebuild(expr, ExprKind::Tuple(new_fields)))
}

pub fn walk_tuple_get_item<M: ExprMutator>(
    m: &mut M,
    expr: &Expr,
    tuple: &Expr,
    index: usize,
) -> Result<Expr> {
    let new_tuple = m.visit_expr(tuple)?;
    if new_tuple == *tuple {
        return Ok(expr.clone());
    }
    Ok(rebuild(
        expr,
        ExprKind::TupleGetItem {
            tuple: Box::new(new_tuple),
            index,
        },
    ))
}

pub fn walk_call<M: ExprMutator>(m: &mut M, expr: &Expr, call: &Call) -> Result<Expr> {
    let op = m.visit_expr(&call.op)?;
    let args = call
        .args
        .iter()
        .map(|a| m.visit_expr(a))
        .collect::<Result<Vec<_>>>()?;
    if op == *call.op && args == call.args {
        return Ok(expr.clone());
    }
    Ok(rebuild(
        expr,
        ExprKind::Call(Call {
            op: Box::new(op),
            args,
            type_args: call.type_args.clone(),
        }),
    ))
}

pub fn walk_if<M: ExprMutator>(m: &mut M, expr: &Expr, branch: &If) -> Result<Expr> {
    let cond = m.visit_expr(&branch.cond)?;
    let then_branch = m.visit_with_new_scope(&branch.then_branch)?;
    let else_branch = m.visit_with_new_scope(&branch.else_branch)?;
    if cond == *branch.cond && then_branch == *branch.then_branch && else_branch == *branch.else_branch {
        return Ok(expr.clone());
    }
    Ok(rebuild(
        expr,
        ExprKind::If(If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        }),
    ))
}

pub fn walk_function<M: ExprMutator>(m: &mut M, expr: &Expr, func: &Function) -> Result<Expr> {
    let params = func
        .params
        .iter()
        .map(|p| m.visit_var_def(p))
        .collect::<Result<Vec<_>>>()?;
    let body = m.visit_with_new_scope(&func.body)?;
    let ret_shape = match &func.ret_shape {
        Some(shape) => Some(m.visit_expr(shape)?),
        None => None,
    };
    if params == func.params && body == func.body && ret_shape == func.ret_shape {
        return Ok(expr.clone());
    }
    // derived return annotations are recomputed from the new body
    let func = Function {
        params,
        body,
        ret_type: func.ret_type.clone(),
        ret_shape,
        declared: func.declared,
        span: func.span,
    }
    .without_derived_signature();
    Ok(rebuild(expr, ExprKind::Function(Box::new(func))))
}

/// Visit each block in order, then the body in a trailing ordinary block.
pub fn walk_seq_expr<M: ExprMutator>(m: &mut M, expr: &Expr, seq: &SeqExpr) -> Result<Expr> {
    let mut changed = false;
    let mut blocks = Vec::with_capacity(seq.blocks.len() + 1);
    for block in &seq.blocks {
        let new_block = m.visit_binding_block(block)?;
        changed |= new_block != *block;
        if !new_block.is_empty() {
            blocks.push(new_block);
        }
    }
    let (body, trailing) = m.with_block(false, |m| m.visit_expr(&seq.body))?;
    if !trailing.is_empty() {
        changed = true;
        blocks.push(trailing);
    }
    if !changed && body == *seq.body {
        return Ok(expr.clone());
    }
    Ok(rebuild(
        expr,
        ExprKind::Seq(SeqExpr {
            blocks,
            body: Box::new(body),
        }),
    ))
}

/// Re-open the block with its dataflow flag and visit its bindings in order.
pub fn walk_binding_block<M: ExprMutator>(m: &mut M, block: &BindingBlock) -> Result<BindingBlock> {
    let ((), new_block) = m.with_block(block.is_dataflow, |m| {
        for binding in &block.bindings {
            m.visit_binding(binding)?;
        }
        Ok(())
    })?;
    Ok(new_block)
}

pub fn walk_binding<M: ExprMutator>(m: &mut M, binding: &Binding) -> Result<()> {
    match binding {
        Binding::Var(b) => m.visit_var_binding(b),
        Binding::MatchShape(b) => m.visit_match_shape(b),
    }
}

pub fn walk_var_binding<M: ExprMutator>(m: &mut M, binding: &VarBinding) -> Result<()> {
    let new_value = m.visit_expr(&binding.value)?;
    let new_var = m.visit_var_def(&binding.var)?;
    emit_rebound(m, binding, new_var, new_value)?;
    Ok(())
}

/// Emit `binding` after its variable and value were visited.
///
/// The original binding is re-emitted when nothing changed. Otherwise the
/// variable takes the value's annotations where the value has them and
/// keeps its own otherwise, except that a variable whose type changed does
/// not keep its shape. The change is recorded in the remap table and the
/// rebuilt binding is emitted.
pub fn emit_rebound<M: ExprMutator>(
    m: &mut M,
    binding: &VarBinding,
    new_var: Var,
    new_value: Expr,
) -> Result<Var> {
    if new_var == binding.var && new_value == binding.value {
        return emit_preserving(m, binding.clone());
    }
    let type_changed = matches!(
        (&new_value.checked_type, &new_var.checked_type),
        (Some(value_type), Some(var_type)) if value_type != var_type
    );
    let shape = match new_value.shape() {
        Some(shape) => Some(shape.clone()),
        // the old shape describes a value of the old type
        None if type_changed => None,
        None => new_var.shape().cloned(),
    };
    let checked_type = new_value
        .checked_type
        .clone()
        .or_else(|| new_var.checked_type.clone());
    let final_var = new_var.with_shape_and_type(shape, checked_type);
    m.context().remap.record_if_changed(&binding.var, &final_var);
    emit_preserving(m, VarBinding::new(final_var, new_value))
}

/// Emit a value binding, as an output when a non-dataflow variable is bound
/// inside a dataflow block.
pub fn emit_preserving<M: ExprMutator>(m: &mut M, binding: VarBinding) -> Result<Var> {
    let builder = m.builder();
    if builder.current_block_is_dataflow() && !binding.var.is_dataflow {
        builder.emit_output_binding(binding)
    } else {
        builder.emit_binding(binding)
    }
}

pub fn walk_match_shape<M: ExprMutator>(m: &mut M, binding: &MatchShape) -> Result<()> {
    let new_value = m.visit_expr(&binding.value)?;
    let new_pattern = binding
        .pattern
        .iter()
        .map(|p| m.visit_prim_expr(p))
        .collect::<Result<Vec<_>>>()?;
    let new_var = match &binding.var {
        Some(var) => {
            let visited = m.visit_var_def(var)?;
            let unchanged = new_value == binding.value && new_pattern == binding.pattern;
            if unchanged {
                Some(visited)
            } else {
                let (checked_type, shape) = MatchShape::var_annotations(&new_value, &new_pattern);
                let checked_type = checked_type.or_else(|| visited.checked_type.clone());
                let final_var = visited.with_shape_and_type(shape, checked_type);
                m.context().remap.record_if_changed(var, &final_var);
                Some(final_var)
            }
        }
        None => None,
    };
    let builder = m.builder();
    if new_value == binding.value && new_pattern == binding.pattern && new_var == binding.var {
        builder.emit_match_shape_binding(binding.clone())?;
    } else {
        builder.emit_match_shape_binding(MatchShape::new(new_value, new_pattern, new_var))?;
    }
    Ok(())
}

/// Visit the shape annotation of a definition. A changed annotation yields a
/// variable with the same identity, recorded in the remap table.
pub fn walk_var_def<M: ExprMutator>(m: &mut M, var: &Var) -> Result<Var> {
    let Some(shape) = var.shape() else {
        return Ok(var.clone());
    };
    let new_shape = m.visit_expr(shape)?;
    if new_shape == *shape {
        return Ok(var.clone());
    }
    let new_var = var.with_shape_and_type(Some(new_shape), var.checked_type.clone());
    m.context().remap.record_if_changed(var, &new_var);
    Ok(new_var)
}

pub fn walk_with_new_scope<M: ExprMutator>(m: &mut M, expr: &Expr) -> Result<Expr> {
    let (value, block) = m.with_block(false, |m| m.visit_expr(expr))?;
    Ok(value.prepend_block(block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tessera_ir::{Constant, DataType, Type};

    /// The identity pass.
    struct Identity {
        ctx: MutatorContext,
    }

    impl ExprMutator for Identity {
        fn context(&mut self) -> &mut MutatorContext {
            &mut self.ctx
        }
    }

    fn identity() -> Identity {
        Identity {
            ctx: MutatorContext::new(BlockBuilder::new()),
        }
    }

    #[test]
    fn test_identity_keeps_function() {
        let x = Var::new("x", None, Some(Type::tensor(1, DataType::FLOAT32)));
        let mut bb = BlockBuilder::new();
        let func = bb
            .function("main", vec![x.clone()], |bb| {
                let y = bb.dataflow(|bb| {
                    let lv = bb.emit_normalized(Expr::call_op("relax.exp", vec![x.to_expr()]), "lv")?;
                    bb.emit_output(lv.to_expr(), "y")
                })?;
                Ok(y.to_expr())
            })
            .unwrap();
        let mut pass = identity();
        let out = pass.transform_function(&func).unwrap();
        assert_eq!(out, func);
        assert!(pass.ctx.remap.is_empty());
        assert_eq!(pass.ctx.phase(), TraversalPhase::Finished);
        assert!(pass.ctx.builder.scope_stats().is_balanced());
    }

    #[test]
    fn test_transform_expr_wraps_hoisted_bindings() {
        let x = Var::new("x", None, Some(Type::tensor(1, DataType::FLOAT32)));
        let nested = Expr::call_op(
            "relax.add",
            vec![Expr::call_op("relax.exp", vec![x.to_expr()]), x.to_expr()],
        );
        let mut pass = identity();
        let out = pass.transform_expr(&nested).unwrap();
        let seq = out.as_seq().expect("sequence");
        assert_eq!(seq.blocks.len(), 1);
        assert_eq!(seq.blocks[0].len(), 1);
        assert_eq!(seq.body.to_string(), "relax.add(%gv0, %x)");
    }

    #[test]
    fn test_transform_expr_leaves_atoms_bare() {
        let c = Expr::constant(Constant::scalar_int(3));
        let mut pass = identity();
        assert_eq!(pass.transform_expr(&c).unwrap(), c);
    }

    #[test]
    fn test_expected_function() {
        /// Replaces every function with a constant.
        struct Erase {
            ctx: MutatorContext,
        }

        impl ExprMutator for Erase {
            fn context(&mut self) -> &mut MutatorContext {
                &mut self.ctx
            }

            fn visit_function(&mut self, _expr: &Expr, _func: &Function) -> Result<Expr> {
                Ok(Expr::constant(Constant::scalar_int(0)))
            }
        }

        let x = Var::new("x", None, None);
        let func = Function::new(vec![x.clone()], x.to_expr());
        let mut pass = Erase {
            ctx: MutatorContext::new(BlockBuilder::new()),
        };
        assert!(matches!(
            pass.transform_function(&func),
            Err(TransformError::Structural(StructuralError::ExpectedFunction { .. }))
        ));
    }
}
