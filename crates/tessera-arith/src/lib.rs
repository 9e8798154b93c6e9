//! Conservative shape equality.
//!
//! Rewrites keep a shape annotation, or drop a `match_shape`, only when two
//! shapes are *provably* equal. The [`ShapeEquivalence`] oracle answers that
//! question soundly but incompletely: `true` means equal for every value of
//! the shape variables, `false` means "could not prove it" and callers must
//! take the safe branch.
//!
//! Two oracles are provided:
//!
//! - [`Analyzer`] compares canonical polynomial forms, so `2 * (m + n)` and
//!   `n + m + n + m` are equal
//! - [`SyntacticEquivalence`] only accepts structurally identical dimensions
//!
//! Neither considers which shape variables are in scope.

pub mod canonical;

use tessera_ir::{Expr, ExprKind, PrimExpr};

pub use canonical::{canonicalize, Atom, Polynomial};

/// Sound, incomplete equality of shapes.
pub trait ShapeEquivalence: Send + Sync {
    /// Whether two dimensions are equal for every assignment of shape
    /// variables.
    fn prims_provably_equal(&self, lhs: &PrimExpr, rhs: &PrimExpr) -> bool;

    /// Whether two shape expressions denote the same shape.
    fn shapes_provably_equal(&self, lhs: &Expr, rhs: &Expr) -> bool {
        structural_shapes_equal(self, lhs, rhs)
    }
}

/// Compare shape expressions node by node, asking `oracle` about
/// dimensions. Run-time shapes are never equal to anything; a shape held in
/// a variable is only equal to the same variable.
pub fn structural_shapes_equal<O: ShapeEquivalence + ?Sized>(
    oracle: &O,
    lhs: &Expr,
    rhs: &Expr,
) -> bool {
    match (&lhs.kind, &rhs.kind) {
        (ExprKind::ShapeExpr(a), ExprKind::ShapeExpr(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|(x, y)| oracle.prims_provably_equal(x, y))
        }
        (ExprKind::Var(a), ExprKind::Var(b)) => a.id == b.id,
        (ExprKind::Tuple(a), ExprKind::Tuple(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|(x, y)| structural_shapes_equal(oracle, x, y))
        }
        _ => false,
    }
}

/// Oracle based on canonical polynomial forms.
#[derive(Debug, Clone, Copy, Default)]
pub struct Analyzer;

impl Analyzer {
    pub fn new() -> Self {
        Self
    }

    /// Fold `expr` to a constant when its normal form has no atoms.
    pub fn const_value(&self, expr: &PrimExpr) -> Option<i64> {
        canonicalize(expr)?.as_constant()
    }
}

impl ShapeEquivalence for Analyzer {
    fn prims_provably_equal(&self, lhs: &PrimExpr, rhs: &PrimExpr) -> bool {
        if lhs == rhs {
            return true;
        }
        let difference = PrimExpr::Sub(Box::new(lhs.clone()), Box::new(rhs.clone()));
        canonicalize(&difference).is_some_and(|p| p.is_zero())
    }
}

/// Oracle accepting only structurally identical dimensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntacticEquivalence;

impl ShapeEquivalence for SyntacticEquivalence {
    fn prims_provably_equal(&self, lhs: &PrimExpr, rhs: &PrimExpr) -> bool {
        lhs == rhs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_ir::{ShapeVar, Var};

    #[test]
    fn test_algebraic_equality() {
        let m = ShapeVar::new("m");
        let n = ShapeVar::new("n");
        let a = Expr::shape_expr(vec![(PrimExpr::var(&m) + PrimExpr::var(&n)) * 2.into(), 4.into()]);
        let b = Expr::shape_expr(vec![
            PrimExpr::var(&n) + PrimExpr::var(&m) + PrimExpr::var(&n) + PrimExpr::var(&m),
            PrimExpr::int(2) * 2.into(),
        ]);
        assert!(Analyzer.shapes_provably_equal(&a, &b));
        assert!(!SyntacticEquivalence.shapes_provably_equal(&a, &b));
    }

    #[test]
    fn test_distinct_variables_are_not_equal() {
        let m = ShapeVar::new("m");
        let also_m = ShapeVar::new("m");
        let a = Expr::shape_expr(vec![PrimExpr::var(&m)]);
        let b = Expr::shape_expr(vec![PrimExpr::var(&also_m)]);
        assert!(!Analyzer.shapes_provably_equal(&a, &b));
    }

    #[test]
    fn test_rank_mismatch() {
        let a = Expr::shape_expr(vec![1.into(), 2.into()]);
        let b = Expr::shape_expr(vec![1.into()]);
        assert!(!Analyzer.shapes_provably_equal(&a, &b));
    }

    #[test]
    fn test_runtime_shapes_are_never_equal() {
        let rt = Expr::runtime_dep_shape();
        assert!(!Analyzer.shapes_provably_equal(&rt, &rt));
    }

    #[test]
    fn test_shape_variables_compare_by_identity() {
        let s = Var::new("s", None, None);
        let t = Var::new("s", None, None);
        assert!(Analyzer.shapes_provably_equal(&s.to_expr(), &s.to_expr()));
        assert!(!Analyzer.shapes_provably_equal(&s.to_expr(), &t.to_expr()));
    }

    #[test]
    fn test_tuple_shapes() {
        let n = ShapeVar::new("n");
        let a = Expr::tuple(vec![Expr::shape_expr(vec![PrimExpr::var(&n)]), Expr::shape_expr(vec![])]);
        let b = Expr::tuple(vec![
            Expr::shape_expr(vec![PrimExpr::var(&n) * 1.into()]),
            Expr::shape_expr(vec![]),
        ]);
        assert!(Analyzer.shapes_provably_equal(&a, &b));
    }

    #[test]
    fn test_const_value() {
        let n = ShapeVar::new("n");
        assert_eq!(Analyzer.const_value(&(PrimExpr::int(3) * 4.into())), Some(12));
        assert_eq!(Analyzer.const_value(&PrimExpr::var(&n)), None);
    }
}
