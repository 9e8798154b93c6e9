//! Module passes built on [`ExprMutator`](crate::ExprMutator).
//!
//! - [`CanonicalizeBindings`]: collapse chains of variable-to-variable
//!   bindings
//! - [`LiftClosedFunctions`]: move local functions without free variables to
//!   module scope

mod canonicalize;
mod lift_functions;

pub use canonicalize::{canonicalize_bindings, canonicalize_bindings_with, CanonicalizeBindings};
pub use lift_functions::{lift_closed_functions, LiftClosedFunctions};
