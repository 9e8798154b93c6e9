//! Type and shape inference for calls.
//!
//! The normalizer asks a [`TypeInference`] implementation for the metadata of
//! every call it rebuilds. Operands are already normalized, so their metadata
//! is up to date. [`OpRegistry`] is the default: a table of per-operator
//! rules plus the calling conventions of global functions, packed functions
//! and closures.

use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tessera_arith::ShapeEquivalence;
use tessera_ir::{Call, DataType, Expr, ExprKind, Module, PrimExpr, Type};
use tracing::warn;

use crate::error::InferenceError;

/// Metadata computed for an expression.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Inferred {
    pub checked_type: Option<Type>,
    pub shape: Option<Expr>,
}

impl Inferred {
    pub fn new(checked_type: Option<Type>, shape: Option<Expr>) -> Self {
        Self { checked_type, shape }
    }

    /// Nothing is known.
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn of_type(checked_type: Type) -> Self {
        Self::new(Some(checked_type), None)
    }

    /// The metadata an expression already carries.
    pub fn of_expr(expr: &Expr) -> Self {
        Self::new(expr.checked_type.clone(), expr.shape().cloned())
    }
}

/// What a rule may consult besides the call itself.
pub struct InferenceContext<'a> {
    pub module: &'a Module,
    pub oracle: &'a dyn ShapeEquivalence,
    /// Fail on unknown operators instead of leaving the call untyped.
    pub strict: bool,
}

/// Computes the metadata of a call from its normalized operands.
pub trait TypeInference: Send + Sync {
    fn infer_call(
        &self,
        call: &Call,
        ctx: &InferenceContext<'_>,
    ) -> Result<Inferred, InferenceError>;
}

/// A rule for one operator. Receives the operator name for error messages.
pub type OpRule =
    fn(op: &str, call: &Call, ctx: &InferenceContext<'_>) -> Result<Inferred, InferenceError>;

/// Inference rules keyed by operator name.
#[derive(Clone)]
pub struct OpRegistry {
    rules: FxHashMap<SmolStr, OpRule>,
}

impl Default for OpRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&SmolStr> = self.rules.keys().collect();
        names.sort();
        f.debug_struct("OpRegistry").field("ops", &names).finish()
    }
}

impl OpRegistry {
    /// A registry without any operator.
    pub fn empty() -> Self {
        Self {
            rules: FxHashMap::default(),
        }
    }

    /// The registry of built-in operators.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for op in ["relax.add", "relax.subtract", "relax.multiply", "relax.divide"] {
            registry.register(op, infer_broadcast);
        }
        for op in ["relax.nn.relu", "relax.exp", "relax.negative", "relax.sigmoid"] {
            registry.register(op, infer_unary);
        }
        registry.register("relax.call_tir", infer_call_tir);
        registry.register("relax.shape_of", infer_shape_of);
        registry.register("relax.make_closure", infer_object);
        registry.register("relax.print", infer_object);
        registry.register("relax.invoke_closure", infer_from_type_args);
        registry
    }

    /// Add or replace the rule for `op`.
    pub fn register(&mut self, op: impl Into<SmolStr>, rule: OpRule) -> &mut Self {
        self.rules.insert(op.into(), rule);
        self
    }

    pub fn contains(&self, op: &str) -> bool {
        self.rules.contains_key(op)
    }
}

impl TypeInference for OpRegistry {
    fn infer_call(
        &self,
        call: &Call,
        ctx: &InferenceContext<'_>,
    ) -> Result<Inferred, InferenceError> {
        match &call.op.kind {
            ExprKind::Op(name) => match self.rules.get(name) {
                Some(rule) => rule(name, call, ctx),
                None if ctx.strict => Err(InferenceError::UnknownOp { op: name.clone() }),
                None => {
                    warn!(op = %name, "no inference rule, leaving call untyped");
                    Ok(Inferred::unknown())
                }
            },
            ExprKind::GlobalVar(name) => infer_global_call(name, call, ctx),
            ExprKind::ExternFunc(_) => Ok(infer_opaque_call(call.type_args.first().cloned())),
            _ => match &call.op.checked_type {
                Some(Type::Func { params, ret }) => {
                    if params.len() != call.args.len() {
                        return Err(InferenceError::ArityMismatch {
                            op: SmolStr::new(call.op.to_string()),
                            expected: params.len().to_string(),
                            found: call.args.len(),
                        });
                    }
                    Ok(infer_opaque_call(Some((**ret).clone())))
                }
                _ => Ok(infer_opaque_call(call.type_args.first().cloned())),
            },
        }
    }
}

/// Calls into code whose result shape is only known at run time.
fn infer_opaque_call(checked_type: Option<Type>) -> Inferred {
    match checked_type {
        Some(ty) if ty.is_tensor() => Inferred::new(Some(ty), Some(Expr::runtime_dep_shape())),
        ty => Inferred::new(ty, None),
    }
}

/// A global function's declared result. Static return shapes that mention no
/// shape variable are kept; the rest are resolved at run time.
fn infer_global_call(
    name: &SmolStr,
    call: &Call,
    ctx: &InferenceContext<'_>,
) -> Result<Inferred, InferenceError> {
    // reported by the well-formedness check
    let Some(func) = ctx.module.get(name) else {
        return Ok(Inferred::unknown());
    };
    if func.params.len() != call.args.len() {
        return Err(InferenceError::ArityMismatch {
            op: name.clone(),
            expected: func.params.len().to_string(),
            found: call.args.len(),
        });
    }
    let checked_type = func
        .ret_type
        .clone()
        .or_else(|| func.body.checked_type.clone());
    let shape = match &func.ret_shape {
        Some(shape) if is_static_shape(shape) => Some(shape.clone()),
        Some(_) => Some(Expr::runtime_dep_shape()),
        None => return Ok(infer_opaque_call(checked_type)),
    };
    Ok(Inferred::new(checked_type, shape))
}

fn is_static_shape(shape: &Expr) -> bool {
    shape
        .as_shape()
        .is_some_and(|dims| dims.iter().all(|d| d.as_int().is_some()))
}

/// Metadata of `tuple[index]`.
pub fn infer_tuple_get_item(tuple: &Expr, index: usize) -> Result<Inferred, InferenceError> {
    let checked_type = match &tuple.checked_type {
        None => None,
        Some(Type::Tuple(fields)) => match fields.get(index) {
            Some(field) => Some(field.clone()),
            None => {
                return Err(InferenceError::IndexOutOfRange {
                    index,
                    len: fields.len(),
                })
            }
        },
        Some(other) => {
            return Err(InferenceError::NotATuple {
                found: other.to_string(),
            })
        }
    };
    let shape = match tuple.shape().map(|s| &s.kind) {
        Some(ExprKind::Tuple(fields)) => fields.get(index).cloned(),
        _ => None,
    };
    Ok(Inferred::new(checked_type, shape))
}

/// The most precise type both branches of a conditional satisfy.
pub fn join_types(lhs: Option<&Type>, rhs: Option<&Type>) -> Option<Type> {
    let (lhs, rhs) = (lhs?, rhs?);
    if lhs == rhs {
        return Some(lhs.clone());
    }
    let joined = match (lhs, rhs) {
        (
            Type::DynTensor { ndim: n1, dtype: d1 },
            Type::DynTensor { ndim: n2, dtype: d2 },
        ) => Type::DynTensor {
            ndim: if n1 == n2 { *n1 } else { Type::UNKNOWN_NDIM },
            dtype: if d1 == d2 { *d1 } else { DataType::Unknown },
        },
        (Type::Tuple(a), Type::Tuple(b)) if a.len() == b.len() => Type::Tuple(
            a.iter()
                .zip(b.iter())
                .map(|(x, y)| join_types(Some(x), Some(y)).unwrap_or(Type::Object))
                .collect(),
        ),
        _ => Type::Object,
    };
    Some(joined)
}

// ============================================================================
// Built-in rules
// ============================================================================

fn expect_arity(op: &str, call: &Call, expected: usize) -> Result<(), InferenceError> {
    if call.args.len() != expected {
        return Err(InferenceError::ArityMismatch {
            op: op.into(),
            expected: expected.to_string(),
            found: call.args.len(),
        });
    }
    Ok(())
}

/// `(ndim, dtype)` of a tensor operand, `None` if the operand is untyped.
fn tensor_operand(op: &str, arg: &Expr) -> Result<Option<(i32, DataType)>, InferenceError> {
    match &arg.checked_type {
        None => Ok(None),
        Some(Type::DynTensor { ndim, dtype }) => Ok(Some((*ndim, *dtype))),
        Some(other) => Err(InferenceError::TypeMismatch {
            op: op.into(),
            expected: "a tensor".to_string(),
            found: other.to_string(),
        }),
    }
}

/// Elementwise binary operators with numpy-style broadcasting.
fn infer_broadcast(
    op: &str,
    call: &Call,
    ctx: &InferenceContext<'_>,
) -> Result<Inferred, InferenceError> {
    expect_arity(op, call, 2)?;
    let (lhs, rhs) = (&call.args[0], &call.args[1]);
    let (Some((n1, d1)), Some((n2, d2))) = (tensor_operand(op, lhs)?, tensor_operand(op, rhs)?)
    else {
        return Ok(Inferred::unknown());
    };
    let dtype = match (d1, d2) {
        (DataType::Unknown, d) | (d, DataType::Unknown) => d,
        (a, b) if a == b => a,
        (a, b) => {
            return Err(InferenceError::DtypeMismatch {
                op: op.into(),
                lhs: a.to_string(),
                rhs: b.to_string(),
            })
        }
    };
    let ndim = if n1 < 0 || n2 < 0 { Type::UNKNOWN_NDIM } else { n1.max(n2) };
    let shape = match (lhs.shape(), rhs.shape()) {
        (Some(a), Some(b)) => match (a.as_shape(), b.as_shape()) {
            (Some(x), Some(y)) => Some(broadcast_shapes(op, x, y, ctx.oracle)?),
            _ => Some(Expr::runtime_dep_shape()),
        },
        _ => None,
    };
    Ok(Inferred::new(Some(Type::tensor(ndim, dtype)), shape))
}

/// Align dimensions from the right. A dimension pair resolves when both are
/// provably equal or one is 1; otherwise the shape is only known at run
/// time, unless both are distinct constants.
fn broadcast_shapes(
    op: &str,
    lhs: &[PrimExpr],
    rhs: &[PrimExpr],
    oracle: &dyn ShapeEquivalence,
) -> Result<Expr, InferenceError> {
    let rank = lhs.len().max(rhs.len());
    let mut dims = Vec::with_capacity(rank);
    for i in 0..rank {
        let a = lhs.len().checked_sub(rank - i).map(|k| &lhs[k]);
        let b = rhs.len().checked_sub(rank - i).map(|k| &rhs[k]);
        let dim = match (a, b) {
            (Some(a), None) => a.clone(),
            (None, Some(b)) => b.clone(),
            (Some(a), Some(b)) => {
                if oracle.prims_provably_equal(a, b) {
                    a.clone()
                } else if a.as_int() == Some(1) {
                    b.clone()
                } else if b.as_int() == Some(1) {
                    a.clone()
                } else if let (Some(_), Some(_)) = (a.as_int(), b.as_int()) {
                    return Err(InferenceError::IncompatibleShapes {
                        op: op.into(),
                        lhs: Expr::shape_expr(lhs.to_vec()).to_string(),
                        rhs: Expr::shape_expr(rhs.to_vec()).to_string(),
                    });
                } else {
                    return Ok(Expr::runtime_dep_shape());
                }
            }
            (None, None) => return Ok(Expr::runtime_dep_shape()),
        };
        dims.push(dim);
    }
    Ok(Expr::shape_expr(dims))
}

fn infer_unary(
    op: &str,
    call: &Call,
    _ctx: &InferenceContext<'_>,
) -> Result<Inferred, InferenceError> {
    expect_arity(op, call, 1)?;
    let arg = &call.args[0];
    tensor_operand(op, arg)?;
    Ok(Inferred::of_expr(arg))
}

/// `call_tir(func, args, shape[, packed_ints])`
fn infer_call_tir(
    op: &str,
    call: &Call,
    _ctx: &InferenceContext<'_>,
) -> Result<Inferred, InferenceError> {
    if !(3..=4).contains(&call.args.len()) {
        return Err(InferenceError::ArityMismatch {
            op: op.into(),
            expected: "3 or 4".to_string(),
            found: call.args.len(),
        });
    }
    let output_shape = &call.args[2];
    let checked_type = match (call.type_args.first(), output_shape.as_shape()) {
        (Some(ty), _) => ty.clone(),
        (None, Some(dims)) => Type::tensor(dims.len() as i32, DataType::Unknown),
        (None, None) => Type::any_tensor(),
    };
    let shape = match &output_shape.kind {
        ExprKind::ShapeExpr(_) | ExprKind::RuntimeDepShape => output_shape.clone(),
        _ => Expr::runtime_dep_shape(),
    };
    Ok(Inferred::new(Some(checked_type), Some(shape)))
}

fn infer_shape_of(
    op: &str,
    call: &Call,
    _ctx: &InferenceContext<'_>,
) -> Result<Inferred, InferenceError> {
    expect_arity(op, call, 1)?;
    tensor_operand(op, &call.args[0])?;
    Ok(Inferred::of_type(Type::Shape))
}

fn infer_object(
    _op: &str,
    _call: &Call,
    _ctx: &InferenceContext<'_>,
) -> Result<Inferred, InferenceError> {
    Ok(Inferred::of_type(Type::Object))
}

fn infer_from_type_args(
    _op: &str,
    call: &Call,
    _ctx: &InferenceContext<'_>,
) -> Result<Inferred, InferenceError> {
    Ok(infer_opaque_call(Some(
        call.type_args.first().cloned().unwrap_or(Type::Object),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tessera_arith::Analyzer;
    use tessera_ir::{Function, ShapeVar, Var};

    fn infer(module: &Module, strict: bool, call: &Expr) -> Result<Inferred, InferenceError> {
        let ctx = InferenceContext {
            module,
            oracle: &Analyzer,
            strict,
        };
        let call = call.as_call().expect("call");
        OpRegistry::default().infer_call(call, &ctx)
    }

    fn tensor(name: &str, dims: Vec<PrimExpr>) -> Var {
        let ndim = dims.len() as i32;
        Var::new(
            name,
            Some(Expr::shape_expr(dims)),
            Some(Type::tensor(ndim, DataType::FLOAT32)),
        )
    }

    #[test]
    fn test_broadcast_with_one() {
        let n = ShapeVar::new("n");
        let x = tensor("x", vec![PrimExpr::var(&n), 4.into()]);
        let y = tensor("y", vec![1.into(), 4.into()]);
        let call = Expr::call_op("relax.add", vec![x.to_expr(), y.to_expr()]);
        let out = infer(&Module::new(), true, &call).unwrap();
        assert_eq!(out.checked_type, Some(Type::tensor(2, DataType::FLOAT32)));
        assert_eq!(out.shape, Some(Expr::shape_expr(vec![PrimExpr::var(&n), 4.into()])));
    }

    #[test]
    fn test_broadcast_unprovable_dims() {
        let m = ShapeVar::new("m");
        let n = ShapeVar::new("n");
        let x = tensor("x", vec![PrimExpr::var(&m)]);
        let y = tensor("y", vec![PrimExpr::var(&n)]);
        let call = Expr::call_op("relax.multiply", vec![x.to_expr(), y.to_expr()]);
        let out = infer(&Module::new(), true, &call).unwrap();
        assert_eq!(out.shape, Some(Expr::runtime_dep_shape()));
    }

    #[test]
    fn test_broadcast_errors() {
        let x = tensor("x", vec![2.into()]);
        let y = tensor("y", vec![3.into()]);
        let call = Expr::call_op("relax.add", vec![x.to_expr(), y.to_expr()]);
        assert!(matches!(
            infer(&Module::new(), true, &call),
            Err(InferenceError::IncompatibleShapes { .. })
        ));

        let i = Var::new("i", None, Some(Type::tensor(1, DataType::INT32)));
        let call = Expr::call_op("relax.add", vec![x.to_expr(), i.to_expr()]);
        assert!(matches!(
            infer(&Module::new(), true, &call),
            Err(InferenceError::DtypeMismatch { .. })
        ));

        let s = Var::new("s", None, Some(Type::Shape));
        let call = Expr::call_op("relax.add", vec![x.to_expr(), s.to_expr()]);
        assert_eq!(
            infer(&Module::new(), true, &call).unwrap_err().to_string(),
            "`relax.add` expects a tensor, found Shape"
        );
    }

    #[test]
    fn test_unknown_op_strictness() {
        let call = Expr::call_op("my.op", Vec::new());
        assert_eq!(
            infer(&Module::new(), true, &call),
            Err(InferenceError::UnknownOp { op: "my.op".into() })
        );
        assert_eq!(infer(&Module::new(), false, &call), Ok(Inferred::unknown()));
    }

    #[test]
    fn test_call_tir() {
        let x = tensor("x", vec![4.into()]);
        let call = Expr::call_op(
            "relax.call_tir",
            vec![
                Expr::extern_func("tir_exp"),
                Expr::tuple(vec![x.to_expr()]),
                Expr::shape_expr(vec![4.into()]),
            ],
        );
        let out = infer(&Module::new(), true, &call).unwrap();
        assert_eq!(out.checked_type, Some(Type::tensor(1, DataType::Unknown)));
        assert_eq!(out.shape, Some(Expr::shape_expr(vec![4.into()])));
    }

    #[test]
    fn test_global_call() {
        let n = ShapeVar::new("n");
        let p = tensor("p", vec![PrimExpr::var(&n)]);
        let func = Function::new(vec![p.clone()], p.to_expr())
            .with_ret_type(Type::tensor(1, DataType::FLOAT32))
            .with_ret_shape(Expr::shape_expr(vec![PrimExpr::var(&n)]));
        let module = Module::new().with_function("f", func).unwrap();
        let x = tensor("x", vec![8.into()]);

        let call = Expr::call(Expr::global("f"), vec![x.to_expr()]);
        let out = infer(&module, true, &call).unwrap();
        assert_eq!(out.checked_type, Some(Type::tensor(1, DataType::FLOAT32)));
        assert_eq!(out.shape, Some(Expr::runtime_dep_shape()));

        let bad = Expr::call(Expr::global("f"), Vec::new());
        assert!(matches!(
            infer(&module, true, &bad),
            Err(InferenceError::ArityMismatch { .. })
        ));
    }

    #[test]
    fn test_tuple_get_item() {
        let t = Expr::tuple(vec![Expr::constant(tessera_ir::Constant::scalar_int(1))]);
        assert_eq!(
            infer_tuple_get_item(&t, 3),
            Err(InferenceError::IndexOutOfRange { index: 3, len: 1 })
        );
        let s = Var::new("s", None, Some(Type::Shape));
        assert!(matches!(
            infer_tuple_get_item(&s.to_expr(), 0),
            Err(InferenceError::NotATuple { .. })
        ));
    }

    #[test]
    fn test_join_types() {
        let a = Type::tensor(2, DataType::FLOAT32);
        let b = Type::tensor(3, DataType::FLOAT32);
        assert_eq!(
            join_types(Some(&a), Some(&b)),
            Some(Type::tensor(-1, DataType::FLOAT32))
        );
        assert_eq!(join_types(Some(&a), Some(&Type::Shape)), Some(Type::Object));
        assert_eq!(join_types(Some(&a), None), None);
    }
}
