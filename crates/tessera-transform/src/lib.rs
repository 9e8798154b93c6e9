//! Program construction and rewriting for the tessera IR.
//!
//! This crate provides:
//!
//! - **Block building**: [`BlockBuilder`] keeps a stack of open binding
//!   blocks, emits bindings with unique names and builds functions
//! - **Normalization**: every expression built or rewritten is brought to
//!   A-normal form with inferred type and shape metadata
//! - **Mutating traversal**: [`ExprMutator`] rebuilds programs bottom-up and
//!   keeps variable identities stable across annotation changes
//! - **Passes**: binding canonicalization and closed-function lifting
//!
//! # Architecture
//!
//! ```text
//! config        → builder settings
//! infer         → per-operator type and shape inference
//! module_store  → the builder's copy of the module
//! block_builder → block stack, emission, function building
//! normalize     → A-normal form and metadata
//! remap         → identity-preserving variable replacement
//! mutator       → ExprMutator and its default traversal
//! rewriter      → callback-table passes
//! passes        → module passes
//! ```

pub mod block_builder;
pub mod config;
pub mod error;
pub mod infer;
pub mod module_store;
pub mod mutator;
mod normalize;
pub mod passes;
pub mod remap;
pub mod rewriter;

pub use block_builder::{BlockBuilder, ScopeStats};
pub use config::TransformConfig;
pub use error::{ErrorCategory, InferenceError, Result, StructuralError, TransformError};
pub use infer::{
    infer_tuple_get_item, join_types, InferenceContext, Inferred, OpRegistry, OpRule,
    TypeInference,
};
pub use module_store::ModuleStore;
pub use mutator::{
    dispatch_expr, emit_preserving, emit_rebound, walk_binding, walk_binding_block, walk_call,
    walk_expr, walk_function, walk_if, walk_match_shape, walk_seq_expr, walk_shape_expr,
    walk_tuple, walk_tuple_get_item, walk_var_binding, walk_var_def, walk_var_ref,
    walk_with_new_scope, ExprMutator, MutatorContext, TraversalPhase,
};
pub use passes::{
    canonicalize_bindings, canonicalize_bindings_with, lift_closed_functions,
    CanonicalizeBindings, LiftClosedFunctions,
};
pub use remap::VarRemap;
pub use rewriter::{RewriteFn, Rewriter};
