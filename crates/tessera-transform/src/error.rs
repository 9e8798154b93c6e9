//! Transformation errors

use smol_str::SmolStr;
use tessera_ir::{ModuleError, VarId, WellFormedError};
use thiserror::Error;

/// Result type for builder and traversal operations
pub type Result<T> = std::result::Result<T, TransformError>;

/// Misuse of the block stack or the function-building surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("cannot {operation}: no block is open")]
    NoOpenBlock { operation: &'static str },

    #[error("cannot emit output `{name}` outside a dataflow block")]
    OutputOutsideDataflow { name: SmolStr },

    #[error("end_block called without a matching begin_block")]
    UnmatchedEndBlock,

    #[error("cannot open a dataflow block inside a dataflow block")]
    NestedDataflowBlock,

    #[error("dataflow variable `{name}` cannot be bound in an ordinary block")]
    DataflowVarInOrdinaryBlock { name: SmolStr },

    #[error("{count} block(s) still open")]
    UnclosedBlocks { count: usize },

    #[error("no function is being built")]
    NoFunctionScope,

    #[error("function `{name}` still has open blocks")]
    FunctionScopeMismatch { name: SmolStr },

    #[error("expected a function, found {found}")]
    ExpectedFunction { found: String },
}

/// Failure to compute the metadata of a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("unknown operator `{op}`")]
    UnknownOp { op: SmolStr },

    #[error("`{op}` expects {expected} argument(s), found {found}")]
    ArityMismatch {
        op: SmolStr,
        expected: String,
        found: usize,
    },

    #[error("`{op}` expects {expected}, found {found}")]
    TypeMismatch {
        op: SmolStr,
        expected: String,
        found: String,
    },

    #[error("`{op}` operands have different element types: {lhs} and {rhs}")]
    DtypeMismatch {
        op: SmolStr,
        lhs: String,
        rhs: String,
    },

    #[error("`{op}` operand shapes cannot be broadcast: {lhs} and {rhs}")]
    IncompatibleShapes {
        op: SmolStr,
        lhs: String,
        rhs: String,
    },

    #[error("tuple index {index} out of range for a tuple of {len} field(s)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("cannot index into a value of type {found}")]
    NotATuple { found: String },
}

/// Errors that abort a builder operation or a traversal.
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("variable `{name}` ({id}) bound twice with different annotations")]
    IdentityConflict { name: SmolStr, id: VarId },

    #[error("cannot infer metadata of `{expr}`: {source}")]
    Inference {
        expr: String,
        #[source]
        source: InferenceError,
    },

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error("transformed module is malformed: {} error(s), first: {}", .errors.len(), first_error(.errors))]
    Malformed { errors: Vec<WellFormedError> },

    #[error("invalid configuration: {0}")]
    Config(String),
}

fn first_error(errors: &[WellFormedError]) -> String {
    errors
        .first()
        .map(|e| e.to_string())
        .unwrap_or_else(|| String::from("(none)"))
}

/// Coarse classification of a [`TransformError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Structural,
    IdentityConflict,
    Inference,
    Module,
    Malformed,
    Config,
}

impl TransformError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransformError::Structural(_) => ErrorCategory::Structural,
            TransformError::IdentityConflict { .. } => ErrorCategory::IdentityConflict,
            TransformError::Inference { .. } => ErrorCategory::Inference,
            TransformError::Module(_) => ErrorCategory::Module,
            TransformError::Malformed { .. } => ErrorCategory::Malformed,
            TransformError::Config(_) => ErrorCategory::Config,
        }
    }

    /// Whether a traversal hitting this error must stop. Configuration
    /// errors are raised before any traversal starts.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransformError::Config(_))
    }
}
