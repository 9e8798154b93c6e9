//! Program analyses.
//!
//! # Available analyses
//!
//! - [`shape_vars`], [`bound_vars`], [`free_vars`], [`all_vars`],
//!   [`all_global_vars`]: variable collection
//! - [`name_to_binding`], [`dataflow_block_use_def`]: binding lookup tables
//! - [`remove_all_unused`]: dead dataflow binding elimination
//! - [`derive_func_ret_shape`]: function return shape derivation

use crate::expr::{Binding, BindingBlock, Expr, ExprKind, Function, SeqExpr, Var, VarId, VarRef};
use crate::prim::{PrimExpr, ShapeVar};
use crate::visitor::{walk_expr, ExprVisitor};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use smol_str::SmolStr;

// ============================================================================
// Variable collection
// ============================================================================

/// Shape variables appearing in `expr`, in order of first occurrence.
pub fn shape_vars(expr: &Expr) -> Vec<ShapeVar> {
    struct Collector(Vec<ShapeVar>);

    impl ExprVisitor for Collector {
        fn visit_prim_expr(&mut self, value: &PrimExpr) {
            value.collect_vars(&mut self.0);
        }
    }

    let mut collector = Collector(Vec::new());
    collector.visit_expr(expr);
    collector.0
}

#[derive(Default)]
struct VarCollector {
    bound: Vec<Var>,
    bound_ids: FxHashSet<VarId>,
    used: Vec<Var>,
    used_ids: FxHashSet<VarId>,
    all: Vec<Var>,
    all_ids: FxHashSet<VarId>,
}

impl VarCollector {
    fn run(expr: &Expr) -> Self {
        let mut collector = Self::default();
        collector.visit_expr(expr);
        collector
    }

    fn record_all(&mut self, var: Var) {
        if self.all_ids.insert(var.id) {
            self.all.push(var);
        }
    }
}

impl ExprVisitor for VarCollector {
    fn visit_var_ref(&mut self, expr: &Expr, var: &VarRef) {
        if let Some(v) = expr.as_var() {
            if self.used_ids.insert(var.id) {
                self.used.push(v.clone());
            }
            self.record_all(v);
        }
    }

    fn visit_var_def(&mut self, var: &Var) {
        if self.bound_ids.insert(var.id) {
            self.bound.push(var.clone());
        }
        self.record_all(var.clone());
        crate::visitor::walk_var_def(self, var);
    }
}

/// Variables defined inside `expr` (parameters and binding targets).
pub fn bound_vars(expr: &Expr) -> Vec<Var> {
    VarCollector::run(expr).bound
}

/// Variables referenced in `expr` but defined outside of it.
pub fn free_vars(expr: &Expr) -> Vec<Var> {
    let collector = VarCollector::run(expr);
    collector
        .used
        .into_iter()
        .filter(|v| !collector.bound_ids.contains(&v.id))
        .collect()
}

/// Every variable defined or referenced in `expr`.
pub fn all_vars(expr: &Expr) -> Vec<Var> {
    VarCollector::run(expr).all
}

/// Names of global functions referenced in `expr`.
pub fn all_global_vars(expr: &Expr) -> Vec<SmolStr> {
    struct Collector(Vec<SmolStr>);

    impl ExprVisitor for Collector {
        fn visit_expr(&mut self, expr: &Expr) {
            if let ExprKind::GlobalVar(name) = &expr.kind {
                if !self.0.contains(name) {
                    self.0.push(name.clone());
                }
            }
            walk_expr(self, expr);
        }
    }

    let mut collector = Collector(Vec::new());
    collector.visit_expr(expr);
    collector.0
}

// ============================================================================
// Binding tables
// ============================================================================

/// All bindings of `func` grouped by the name of the variable they define.
///
/// Names may be shadowed, so a name can map to several bindings.
pub fn name_to_binding(func: &Function) -> IndexMap<SmolStr, Vec<Binding>> {
    struct Collector(IndexMap<SmolStr, Vec<Binding>>);

    impl ExprVisitor for Collector {
        fn visit_binding(&mut self, binding: &Binding) {
            if let Some(var) = binding.var() {
                self.0
                    .entry(var.name_hint.clone())
                    .or_default()
                    .push(binding.clone());
            }
            crate::visitor::walk_binding(self, binding);
        }
    }

    let mut collector = Collector(IndexMap::new());
    collector.visit_function(func);
    collector.0
}

/// Use-def chains of a dataflow block: for every variable defined or used in
/// the block, the variables of the bindings that use it.
pub fn dataflow_block_use_def(block: &BindingBlock) -> IndexMap<VarId, Vec<VarId>> {
    struct Uses(Vec<VarId>);

    impl ExprVisitor for Uses {
        fn visit_var_ref(&mut self, _expr: &Expr, var: &VarRef) {
            if !self.0.contains(&var.id) {
                self.0.push(var.id);
            }
        }
    }

    let mut chains: IndexMap<VarId, Vec<VarId>> = IndexMap::new();
    for binding in &block.bindings {
        let mut uses = Uses(Vec::new());
        uses.visit_expr(binding.value());
        let user = binding.var().map(|v| v.id);
        for used in uses.0 {
            let entry = chains.entry(used).or_default();
            if let Some(user) = user {
                if !entry.contains(&user) {
                    entry.push(user);
                }
            }
        }
        if let Some(user) = user {
            chains.entry(user).or_default();
        }
    }
    chains
}

// ============================================================================
// Dead binding elimination
// ============================================================================

/// Remove bindings of unused dataflow variables from every dataflow block of
/// `func`, repeating until nothing more can be removed.
///
/// Bindings in ordinary blocks and block outputs are kept since they may have
/// side effects. Match-shape bindings are kept since they also bind shape
/// variables.
pub fn remove_all_unused(func: &Function) -> Function {
    let mut current = func.clone();
    loop {
        let used = used_var_ids(&Expr::function(current.clone()));
        let mut changed = false;
        let body = prune_expr(&current.body, &used, &mut changed);
        if !changed {
            return current;
        }
        current = Function { body, ..current };
    }
}

fn used_var_ids(expr: &Expr) -> FxHashSet<VarId> {
    struct Used(FxHashSet<VarId>);

    impl ExprVisitor for Used {
        fn visit_var_ref(&mut self, _expr: &Expr, var: &VarRef) {
            self.0.insert(var.id);
        }
    }

    let mut used = Used(FxHashSet::default());
    used.visit_expr(expr);
    used.0
}

fn prune_expr(expr: &Expr, used: &FxHashSet<VarId>, changed: &mut bool) -> Expr {
    let kind = match &expr.kind {
        ExprKind::Seq(seq) => {
            let mut blocks = Vec::with_capacity(seq.blocks.len());
            for block in &seq.blocks {
                let pruned = prune_block(block, used, changed);
                if !pruned.is_empty() {
                    blocks.push(pruned);
                }
            }
            ExprKind::Seq(SeqExpr {
                blocks,
                body: Box::new(prune_expr(&seq.body, used, changed)),
            })
        }
        ExprKind::If(branch) => {
            let mut branch = branch.clone();
            *branch.then_branch = prune_expr(&branch.then_branch, used, changed);
            *branch.else_branch = prune_expr(&branch.else_branch, used, changed);
            ExprKind::If(branch)
        }
        ExprKind::Function(func) => {
            let body = prune_expr(&func.body, used, changed);
            ExprKind::Function(Box::new(Function {
                body,
                ..(**func).clone()
            }))
        }
        _ => return expr.clone(),
    };
    Expr {
        kind,
        ..expr.clone()
    }
}

fn prune_block(block: &BindingBlock, used: &FxHashSet<VarId>, changed: &mut bool) -> BindingBlock {
    let mut bindings = Vec::with_capacity(block.bindings.len());
    for binding in &block.bindings {
        match binding {
            Binding::Var(b) if block.is_dataflow && b.var.is_dataflow && !used.contains(&b.var.id) => {
                *changed = true;
            }
            Binding::Var(b) => {
                let mut b = b.clone();
                b.value = prune_expr(&b.value, used, changed);
                bindings.push(Binding::Var(b));
            }
            Binding::MatchShape(_) => bindings.push(binding.clone()),
        }
    }
    BindingBlock {
        bindings,
        is_dataflow: block.is_dataflow,
    }
}

// ============================================================================
// Return shape derivation
// ============================================================================

/// The return shape of a function with `params` and `body`.
///
/// The body's shape is only meaningful to callers if every shape variable in
/// it is bound by a parameter's shape; otherwise the result is only known at
/// run time.
pub fn derive_func_ret_shape(params: &[Var], body: &Expr) -> Expr {
    let Some(shape) = body.shape() else {
        return Expr::runtime_dep_shape();
    };
    let mut bound = Vec::new();
    for param in params {
        if let Some(param_shape) = param.shape() {
            for var in shape_vars(param_shape) {
                if !bound.iter().any(|b: &ShapeVar| b.id == var.id) {
                    bound.push(var);
                }
            }
        }
    }
    let all_bound = shape_vars(shape)
        .iter()
        .all(|v| bound.iter().any(|b| b.id == v.id));
    if all_bound {
        shape.clone()
    } else {
        Expr::runtime_dep_shape()
    }
}
