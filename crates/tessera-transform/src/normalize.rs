//! Normalization to A-normal form.
//!
//! [`BlockBuilder::normalize`] rebuilds an expression so that every operand
//! position holds an atomic expression and every node carries up-to-date
//! metadata. Non-atomic operands are bound to fresh variables in the
//! innermost open block; scope positions (function bodies, conditional
//! branches, sequence bodies) get a block of their own and become sequences
//! when something was hoisted into it.
//!
//! Normalization is idempotent.

use tessera_ir::analysis::derive_func_ret_shape;
use tessera_ir::{
    Binding, BindingBlock, Call, Expr, ExprKind, Function, If, MatchShape, SeqExpr, Type,
    VarBinding,
};

use crate::block_builder::BlockBuilder;
use crate::error::{Result, TransformError};
use crate::infer::{infer_tuple_get_item, join_types, InferenceContext, Inferred};

impl BlockBuilder {
    /// Bring `expr` into normal form, hoisting nested operands into the
    /// innermost open block.
    pub fn normalize(&mut self, expr: Expr) -> Result<Expr> {
        let Expr {
            kind,
            checked_type,
            shape,
            span,
        } = expr;
        let old = Inferred::new(checked_type, shape.map(|s| *s));
        let (kind, inferred) = match kind {
            ExprKind::Constant(value) => {
                let inferred = Inferred::new(Some(value.checked_type()), Some(value.shape_expr()));
                (ExprKind::Constant(value), inferred)
            }
            ExprKind::ShapeExpr(values) => {
                (ExprKind::ShapeExpr(values), Inferred::of_type(Type::Shape))
            }
            ExprKind::RuntimeDepShape => (ExprKind::RuntimeDepShape, Inferred::of_type(Type::Shape)),
            ExprKind::GlobalVar(name) => {
                let inferred = match self.lookup_function(&name) {
                    Some(func) => Inferred::of_type(func.func_type()),
                    None => Inferred::unknown(),
                };
                (ExprKind::GlobalVar(name), inferred)
            }
            kind @ (ExprKind::Var(_) | ExprKind::Op(_) | ExprKind::ExternFunc(_)) => {
                (kind, Inferred::unknown())
            }
            ExprKind::Tuple(fields) => {
                let fields = fields
                    .into_iter()
                    .map(|f| self.normalize_argument(f))
                    .collect::<Result<Vec<_>>>()?;
                let built = Expr::tuple(fields);
                let inferred = Inferred::of_expr(&built);
                (built.kind, inferred)
            }
            ExprKind::TupleGetItem { tuple, index } => {
                let tuple = self.normalize_argument(*tuple)?;
                let inferred = infer_tuple_get_item(&tuple, index).map_err(|source| {
                    TransformError::Inference {
                        expr: format!("{}[{}]", tuple, index),
                        source,
                    }
                })?;
                let kind = ExprKind::TupleGetItem {
                    tuple: Box::new(tuple),
                    index,
                };
                (kind, inferred)
            }
            ExprKind::Call(call) => {
                let call = self.normalize_call(call)?;
                let inferred = self.infer_call(&call)?;
                (ExprKind::Call(call), inferred)
            }
            ExprKind::If(branch) => {
                let cond = self.normalize_argument(*branch.cond)?;
                let then_branch = self.normalize_scope(*branch.then_branch)?;
                let else_branch = self.normalize_scope(*branch.else_branch)?;
                let inferred = self.join_branches(&then_branch, &else_branch);
                let kind = ExprKind::If(If {
                    cond: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                });
                (kind, inferred)
            }
            ExprKind::Function(func) => {
                let func = self.normalize_function(*func)?;
                let inferred = Inferred::of_type(func.func_type());
                (ExprKind::Function(Box::new(func)), inferred)
            }
            ExprKind::Seq(seq) => {
                let flattened = self.normalize_seq(seq)?;
                let inferred = Inferred::of_expr(&flattened);
                if !matches!(flattened.kind, ExprKind::Seq(_)) {
                    return Ok(flattened);
                }
                (flattened.kind, inferred)
            }
        };
        Ok(Expr {
            kind,
            checked_type: inferred.checked_type.or(old.checked_type),
            shape: inferred.shape.or(old.shape).map(Box::new),
            span,
        })
    }

    /// Normalize an operand, binding it to a fresh variable unless it is
    /// atomic.
    pub fn normalize_argument(&mut self, expr: Expr) -> Result<Expr> {
        let expr = self.normalize(expr)?;
        if expr.is_atomic() {
            return Ok(expr);
        }
        let var = self.emit(expr, "")?;
        Ok(var.to_expr())
    }

    /// Normalize an expression in a block of its own.
    pub fn normalize_scope(&mut self, expr: Expr) -> Result<Expr> {
        let (value, block) = self.scope(false, |bb| bb.normalize(expr))?;
        Ok(value.prepend_block(block))
    }

    fn normalize_call(&mut self, call: Call) -> Result<Call> {
        let op = self.normalize_argument(*call.op)?;
        let args = call
            .args
            .into_iter()
            .map(|a| self.normalize_argument(a))
            .collect::<Result<Vec<_>>>()?;
        Ok(Call {
            op: Box::new(op),
            args,
            type_args: call.type_args,
        })
    }

    fn infer_call(&self, call: &Call) -> Result<Inferred> {
        let ctx = InferenceContext {
            module: self.module(),
            oracle: self.oracle(),
            strict: self.config().strict_inference,
        };
        self.inference
            .infer_call(call, &ctx)
            .map_err(|source| TransformError::Inference {
                expr: Expr::new(ExprKind::Call(call.clone())).to_string(),
                source,
            })
    }

    /// Both branches must agree on a shape for the conditional to have it.
    fn join_branches(&self, then_branch: &Expr, else_branch: &Expr) -> Inferred {
        let checked_type = join_types(
            then_branch.checked_type.as_ref(),
            else_branch.checked_type.as_ref(),
        );
        let shape = match (then_branch.shape(), else_branch.shape()) {
            (None, None) => None,
            (Some(a), Some(b)) if self.shapes_provably_equal(a, b) => Some(a.clone()),
            _ => Some(Expr::runtime_dep_shape()),
        };
        Inferred::new(checked_type, shape)
    }

    fn normalize_function(&mut self, func: Function) -> Result<Function> {
        let body = self.normalize_scope(func.body)?;
        Ok(Self::complete_signature(Function { body, ..func }))
    }

    /// Fill in an absent return type from the body and an absent return
    /// shape by derivation.
    pub(crate) fn complete_signature(mut func: Function) -> Function {
        if func.ret_type.is_none() {
            func.ret_type = func.body.checked_type.clone();
        }
        if func.ret_shape.is_none() {
            func.ret_shape = Some(derive_func_ret_shape(&func.params, &func.body));
        }
        func
    }

    /// Re-emit every block of `seq` with normalized values, then flatten the
    /// normalized body into it. Empty blocks are dropped; a sequence without
    /// blocks becomes its body.
    fn normalize_seq(&mut self, seq: SeqExpr) -> Result<Expr> {
        let mut blocks: Vec<BindingBlock> = Vec::with_capacity(seq.blocks.len());
        for block in seq.blocks {
            let ((), normalized) = self.scope(block.is_dataflow, |bb| {
                for binding in block.bindings {
                    let binding = bb.normalize_binding(binding)?;
                    bb.push_binding(binding, "normalize")?;
                }
                Ok(())
            })?;
            if !normalized.is_empty() {
                blocks.push(normalized);
            }
        }
        let body = match self.normalize_scope(*seq.body)? {
            Expr {
                kind: ExprKind::Seq(inner),
                ..
            } => {
                blocks.extend(inner.blocks);
                *inner.body
            }
            body => body,
        };
        if blocks.is_empty() {
            return Ok(body);
        }
        Ok(Expr::seq(blocks, body))
    }

    /// Normalize the value of a binding. The bound variable is kept.
    fn normalize_binding(&mut self, binding: Binding) -> Result<Binding> {
        Ok(match binding {
            Binding::Var(b) => {
                let value = self.normalize(b.value)?;
                VarBinding::new(b.var, value).into()
            }
            Binding::MatchShape(m) => {
                let value = self.normalize(m.value)?;
                MatchShape::new(value, m.pattern, m.var).into()
            }
        })
    }
}
