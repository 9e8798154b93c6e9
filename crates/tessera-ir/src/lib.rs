//! Tensor program IR in A-normal form.
//!
//! Programs are modules of functions whose bodies are sequences of binding
//! blocks. The IR provides:
//!
//! - **Variable identity**: every [`Var`] carries an opaque [`VarId`]; the
//!   id, not the annotations, decides whether two variables are the same
//! - **Inferred metadata**: every [`Expr`] carries an optional [`Type`] and
//!   an optional shape expression
//! - **Dataflow regions**: [`BindingBlock`]s flagged as dataflow contain
//!   pure bindings whose dataflow variables stay local to the block
//! - **Persistent modules**: [`Module`] is copy-on-write, so passes can
//!   build new versions while older ones remain readable
//!
//! # Architecture
//!
//! ```text
//! expr / prim  → data model
//! module       → global functions
//! visitor      → read-only traversal
//! analysis     → variable collection, use-def chains, dead binding removal
//! well_formed  → invariant checking
//! pretty       → text output
//! ```

use std::ops::Range;

pub mod analysis;
pub mod expr;
pub mod module;
pub mod prim;
mod pretty;
pub mod visitor;
pub mod well_formed;

pub use expr::{
    // Identifiers
    VarId,

    // Types
    DataType,
    Type,

    // Values
    Constant,
    ConstValues,
    Var,
    VarRef,

    // Expressions
    Call,
    Expr,
    ExprKind,
    ExprTag,
    If,
    SeqExpr,

    // Bindings
    Binding,
    BindingBlock,
    MatchShape,
    VarBinding,

    // Functions
    Declared,
    Function,
};
pub use module::{Module, ModuleError, ModuleResult};
pub use prim::{PrimExpr, ShapeVar, ShapeVarId};
pub use pretty::{pretty_print_expr, pretty_print_function, pretty_print_module};
pub use visitor::{post_order_visit, ExprVisitor};
pub use well_formed::{is_well_formed, well_formed, WellFormedError};

/// Source location of a node, as a byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Span::new(range.start, range.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge() {
        let a = Span::new(4, 8);
        let b = Span::from(2..6);
        assert_eq!(a.merge(b), Span::new(2, 8));
    }

    #[test]
    fn test_span_survives_reference() {
        let x = Var::new("x", None, None).with_span(Span::new(1, 2));
        assert_eq!(x.to_expr().span, Some(Span::new(1, 2)));
    }
}
