//! Read-only traversal.
//!
//! [`ExprVisitor`] has a default implementation for every hook, so an analysis
//! overrides only the nodes it cares about. The `walk_*` functions perform the
//! default recursion and can be called from an override to keep descending.

use crate::expr::{Binding, BindingBlock, Expr, ExprKind, Function, Var, VarRef};
use crate::prim::PrimExpr;

pub trait ExprVisitor {
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr)
    }

    fn visit_var_ref(&mut self, _expr: &Expr, _var: &VarRef) {}

    fn visit_prim_expr(&mut self, _value: &PrimExpr) {}

    fn visit_function(&mut self, func: &Function) {
        walk_function(self, func)
    }

    fn visit_binding_block(&mut self, block: &BindingBlock) {
        walk_binding_block(self, block)
    }

    fn visit_binding(&mut self, binding: &Binding) {
        walk_binding(self, binding)
    }

    /// Called for every variable definition, after the bound value.
    fn visit_var_def(&mut self, var: &Var) {
        walk_var_def(self, var)
    }
}

pub fn walk_expr<V: ExprVisitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Constant(_)
        | ExprKind::GlobalVar(_)
        | ExprKind::Op(_)
        | ExprKind::ExternFunc(_)
        | ExprKind::RuntimeDepShape => {}
        ExprKind::Var(var) => visitor.visit_var_ref(expr, var),
        ExprKind::ShapeExpr(values) => {
            for value in values {
                visitor.visit_prim_expr(value);
            }
        }
        ExprKind::Tuple(fields) => {
            for field in fields {
                visitor.visit_expr(field);
            }
        }
        ExprKind::TupleGetItem { tuple, .. } => visitor.visit_expr(tuple),
        ExprKind::Call(call) => {
            visitor.visit_expr(&call.op);
            for arg in &call.args {
                visitor.visit_expr(arg);
            }
        }
        ExprKind::If(branch) => {
            visitor.visit_expr(&branch.cond);
            visitor.visit_expr(&branch.then_branch);
            visitor.visit_expr(&branch.else_branch);
        }
        ExprKind::Function(func) => visitor.visit_function(func),
        ExprKind::Seq(seq) => {
            for block in &seq.blocks {
                visitor.visit_binding_block(block);
            }
            visitor.visit_expr(&seq.body);
        }
    }
}

pub fn walk_function<V: ExprVisitor + ?Sized>(visitor: &mut V, func: &Function) {
    for param in &func.params {
        visitor.visit_var_def(param);
    }
    visitor.visit_expr(&func.body);
}

pub fn walk_binding_block<V: ExprVisitor + ?Sized>(visitor: &mut V, block: &BindingBlock) {
    for binding in &block.bindings {
        visitor.visit_binding(binding);
    }
}

pub fn walk_binding<V: ExprVisitor + ?Sized>(visitor: &mut V, binding: &Binding) {
    match binding {
        Binding::Var(b) => {
            visitor.visit_expr(&b.value);
            visitor.visit_var_def(&b.var);
        }
        Binding::MatchShape(m) => {
            visitor.visit_expr(&m.value);
            for value in &m.pattern {
                visitor.visit_prim_expr(value);
            }
            if let Some(var) = &m.var {
                visitor.visit_var_def(var);
            }
        }
    }
}

pub fn walk_var_def<V: ExprVisitor + ?Sized>(visitor: &mut V, var: &Var) {
    if let Some(shape) = var.shape() {
        visitor.visit_expr(shape);
    }
}

/// Call `f` on every sub-expression of `expr`, children before parents.
pub fn post_order_visit(expr: &Expr, f: impl FnMut(&Expr)) {
    struct PostOrder<F>(F);

    impl<F: FnMut(&Expr)> ExprVisitor for PostOrder<F> {
        fn visit_expr(&mut self, expr: &Expr) {
            walk_expr(self, expr);
            (self.0)(expr);
        }
    }

    PostOrder(f).visit_expr(expr);
}
