//! IR data structures.
//!
//! Programs are trees of immutable [`Expr`] nodes in A-normal form: the
//! operands of every compound node are atomic, and intermediate values are
//! named by [`Binding`]s collected in [`BindingBlock`]s. Every expression
//! carries optional inferred metadata (a [`Type`] and a shape expression).

use crate::prim::PrimExpr;
use crate::Span;
use smol_str::SmolStr;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

// ============================================================================
// Identifiers
// ============================================================================

static NEXT_VAR_ID: AtomicU32 = AtomicU32::new(0);

/// Identity of a variable.
///
/// Two [`Var`]s with the same id are the same variable, regardless of their
/// annotations. Rewrites that change a variable's annotations keep its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

impl VarId {
    /// Allocate a process-wide unique id.
    pub fn fresh() -> Self {
        VarId(NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// Types
// ============================================================================

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    #[default]
    Unknown,
    Bool,
    Int(u8),
    UInt(u8),
    Float(u8),
}

impl DataType {
    pub const FLOAT16: DataType = DataType::Float(16);
    pub const FLOAT32: DataType = DataType::Float(32);
    pub const INT32: DataType = DataType::Int(32);
    pub const INT64: DataType = DataType::Int(64);

    pub fn is_unknown(self) -> bool {
        matches!(self, DataType::Unknown)
    }
}

/// Static type of an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Object,
    Shape,
    /// A tensor of `ndim` dimensions; `ndim == -1` means unknown rank.
    DynTensor { ndim: i32, dtype: DataType },
    Tuple(Vec<Type>),
    Func { params: Vec<Type>, ret: Box<Type> },
}

impl Type {
    pub const UNKNOWN_NDIM: i32 = -1;

    pub fn tensor(ndim: i32, dtype: DataType) -> Self {
        Type::DynTensor { ndim, dtype }
    }

    /// Tensor of unknown rank and element type.
    pub fn any_tensor() -> Self {
        Type::DynTensor {
            ndim: Self::UNKNOWN_NDIM,
            dtype: DataType::Unknown,
        }
    }

    pub fn func(params: Vec<Type>, ret: Type) -> Self {
        Type::Func {
            params,
            ret: Box::new(ret),
        }
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, Type::DynTensor { .. })
    }

    /// Whether every value of type `other` is also a value of this type.
    /// Unknown rank and element type accept any.
    pub fn accepts(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Object, _) => true,
            (
                Type::DynTensor { ndim, dtype },
                Type::DynTensor {
                    ndim: other_ndim,
                    dtype: other_dtype,
                },
            ) => {
                (*ndim == Self::UNKNOWN_NDIM || ndim == other_ndim)
                    && (*dtype == DataType::Unknown || dtype == other_dtype)
            }
            (Type::Tuple(fields), Type::Tuple(other_fields)) => {
                fields.len() == other_fields.len()
                    && fields.iter().zip(other_fields).all(|(a, b)| a.accepts(b))
            }
            _ => self == other,
        }
    }
}

// ============================================================================
// Constants
// ============================================================================

/// Flat element storage of a constant tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValues {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Bool(Vec<bool>),
}

/// A constant tensor. Rank-0 constants are scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub dtype: DataType,
    pub shape: Vec<i64>,
    pub values: ConstValues,
}

impl Constant {
    pub fn scalar_int(value: i64) -> Self {
        Self {
            dtype: DataType::INT64,
            shape: Vec::new(),
            values: ConstValues::Int(vec![value]),
        }
    }

    pub fn scalar_float(value: f64) -> Self {
        Self {
            dtype: DataType::FLOAT32,
            shape: Vec::new(),
            values: ConstValues::Float(vec![value]),
        }
    }

    pub fn scalar_bool(value: bool) -> Self {
        Self {
            dtype: DataType::Bool,
            shape: Vec::new(),
            values: ConstValues::Bool(vec![value]),
        }
    }

    pub fn float_tensor(shape: Vec<i64>, values: Vec<f64>) -> Self {
        Self {
            dtype: DataType::FLOAT32,
            shape,
            values: ConstValues::Float(values),
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    pub fn checked_type(&self) -> Type {
        Type::tensor(self.shape.len() as i32, self.dtype)
    }

    pub fn shape_expr(&self) -> Expr {
        Expr::shape_expr(self.shape.iter().map(|d| PrimExpr::Int(*d)).collect())
    }
}

// ============================================================================
// Variables
// ============================================================================

/// A variable at its binding site: function parameter, binding or
/// match-shape target.
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub id: VarId,
    pub name_hint: SmolStr,
    /// Dataflow variables are local to the dataflow block that binds them.
    pub is_dataflow: bool,
    pub shape: Option<Box<Expr>>,
    pub checked_type: Option<Type>,
    pub span: Option<Span>,
}

impl Var {
    pub fn new(name: impl Into<SmolStr>, shape: Option<Expr>, checked_type: Option<Type>) -> Self {
        Self {
            id: VarId::fresh(),
            name_hint: name.into(),
            is_dataflow: false,
            shape: shape.map(Box::new),
            checked_type,
            span: None,
        }
    }

    pub fn dataflow(
        name: impl Into<SmolStr>,
        shape: Option<Expr>,
        checked_type: Option<Type>,
    ) -> Self {
        Self {
            is_dataflow: true,
            ..Self::new(name, shape, checked_type)
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn shape(&self) -> Option<&Expr> {
        self.shape.as_deref()
    }

    /// Identity comparison.
    pub fn same_as(&self, other: &Var) -> bool {
        self.id == other.id
    }

    /// Whether both carry the same shape and type annotations.
    pub fn annotations_equal(&self, other: &Var) -> bool {
        self.shape == other.shape && self.checked_type == other.checked_type
    }

    /// The same variable with replaced annotations.
    pub fn with_shape_and_type(&self, shape: Option<Expr>, checked_type: Option<Type>) -> Var {
        Var {
            shape: shape.map(Box::new),
            checked_type,
            ..self.clone()
        }
    }

    pub fn reference(&self) -> VarRef {
        VarRef {
            id: self.id,
            name_hint: self.name_hint.clone(),
            is_dataflow: self.is_dataflow,
        }
    }

    /// A reference expression carrying this variable's annotations.
    pub fn to_expr(&self) -> Expr {
        Expr {
            kind: ExprKind::Var(self.reference()),
            checked_type: self.checked_type.clone(),
            shape: self.shape.clone(),
            span: self.span,
        }
    }
}

/// A use of a variable inside an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub id: VarId,
    pub name_hint: SmolStr,
    pub is_dataflow: bool,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: Box<Expr>,
    pub args: Vec<Expr>,
    /// Result types for calls whose callee cannot describe them (packed
    /// functions, closures).
    pub type_args: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct If {
    pub cond: Box<Expr>,
    pub then_branch: Box<Expr>,
    pub else_branch: Box<Expr>,
}

/// A sequence of binding blocks followed by a result expression.
#[derive(Debug, Clone, PartialEq)]
pub struct SeqExpr {
    pub blocks: Vec<BindingBlock>,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Constant(Constant),
    Var(VarRef),
    /// Reference to a module-level function by name.
    GlobalVar(SmolStr),
    /// Primitive operator such as `relax.add`.
    Op(SmolStr),
    /// Externally provided packed function.
    ExternFunc(SmolStr),
    ShapeExpr(Vec<PrimExpr>),
    /// A shape only known at run time.
    RuntimeDepShape,
    Tuple(Vec<Expr>),
    TupleGetItem { tuple: Box<Expr>, index: usize },
    Call(Call),
    If(If),
    Function(Box<Function>),
    Seq(SeqExpr),
}

/// Discriminant of [`ExprKind`], used to key per-kind rewrite tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprTag {
    Constant,
    Var,
    GlobalVar,
    Op,
    ExternFunc,
    ShapeExpr,
    RuntimeDepShape,
    Tuple,
    TupleGetItem,
    Call,
    If,
    Function,
    Seq,
}

/// An expression node with its inferred metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub checked_type: Option<Type>,
    pub shape: Option<Box<Expr>>,
    pub span: Option<Span>,
}

impl Expr {
    /// A node without metadata.
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            checked_type: None,
            shape: None,
            span: None,
        }
    }

    pub fn constant(value: Constant) -> Self {
        let checked_type = value.checked_type();
        let shape = value.shape_expr();
        Expr::new(ExprKind::Constant(value))
            .with_checked_type(Some(checked_type))
            .with_shape(Some(shape))
    }

    pub fn op(name: impl Into<SmolStr>) -> Self {
        Expr::new(ExprKind::Op(name.into()))
    }

    pub fn global(name: impl Into<SmolStr>) -> Self {
        Expr::new(ExprKind::GlobalVar(name.into()))
    }

    pub fn extern_func(name: impl Into<SmolStr>) -> Self {
        Expr::new(ExprKind::ExternFunc(name.into()))
    }

    /// A shape expression with the given dimensions.
    pub fn shape_expr(values: Vec<PrimExpr>) -> Self {
        Expr::new(ExprKind::ShapeExpr(values)).with_checked_type(Some(Type::Shape))
    }

    pub fn runtime_dep_shape() -> Self {
        Expr::new(ExprKind::RuntimeDepShape).with_checked_type(Some(Type::Shape))
    }

    /// A tuple; its type and shape are assembled from the fields when every
    /// field has one.
    pub fn tuple(fields: Vec<Expr>) -> Self {
        let checked_type = fields
            .iter()
            .map(|f| f.checked_type.clone())
            .collect::<Option<Vec<_>>>()
            .map(Type::Tuple);
        let shape = fields
            .iter()
            .map(|f| f.shape.as_deref().cloned())
            .collect::<Option<Vec<_>>>()
            .map(Expr::tuple_shape);
        Expr::new(ExprKind::Tuple(fields))
            .with_checked_type(checked_type)
            .with_shape(shape)
    }

    /// The shape of a tuple: a tuple of its fields' shapes. Typed like a
    /// tuple, but carries no shape of its own.
    fn tuple_shape(shapes: Vec<Expr>) -> Self {
        let checked_type = shapes
            .iter()
            .map(|s| s.checked_type.clone())
            .collect::<Option<Vec<_>>>()
            .map(Type::Tuple);
        Expr::new(ExprKind::Tuple(shapes)).with_checked_type(checked_type)
    }

    pub fn tuple_get_item(tuple: Expr, index: usize) -> Self {
        let checked_type = match &tuple.checked_type {
            Some(Type::Tuple(fields)) => fields.get(index).cloned(),
            _ => None,
        };
        let shape = match tuple.shape.as_deref().map(|s| &s.kind) {
            Some(ExprKind::Tuple(fields)) => fields.get(index).cloned(),
            _ => None,
        };
        Expr::new(ExprKind::TupleGetItem {
            tuple: Box::new(tuple),
            index,
        })
        .with_checked_type(checked_type)
        .with_shape(shape)
    }

    pub fn call(op: Expr, args: Vec<Expr>) -> Self {
        Expr::call_with_type_args(op, args, Vec::new())
    }

    pub fn call_with_type_args(op: Expr, args: Vec<Expr>, type_args: Vec<Type>) -> Self {
        Expr::new(ExprKind::Call(Call {
            op: Box::new(op),
            args,
            type_args,
        }))
    }

    /// Shorthand for a call to a primitive operator.
    pub fn call_op(name: &str, args: Vec<Expr>) -> Self {
        Expr::call(Expr::op(name), args)
    }

    pub fn if_then_else(cond: Expr, then_branch: Expr, else_branch: Expr) -> Self {
        Expr::new(ExprKind::If(If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        }))
    }

    pub fn function(func: Function) -> Self {
        Expr::new(ExprKind::Function(Box::new(func)))
    }

    /// A sequence; it has its body's metadata.
    pub fn seq(blocks: Vec<BindingBlock>, body: Expr) -> Self {
        let checked_type = body.checked_type.clone();
        let shape = body.shape.clone();
        Expr {
            kind: ExprKind::Seq(SeqExpr {
                blocks,
                body: Box::new(body),
            }),
            checked_type,
            shape,
            span: None,
        }
    }

    pub fn with_checked_type(mut self, checked_type: Option<Type>) -> Self {
        self.checked_type = checked_type;
        self
    }

    pub fn with_shape(mut self, shape: Option<Expr>) -> Self {
        self.shape = shape.map(Box::new);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn tag(&self) -> ExprTag {
        match &self.kind {
            ExprKind::Constant(_) => ExprTag::Constant,
            ExprKind::Var(_) => ExprTag::Var,
            ExprKind::GlobalVar(_) => ExprTag::GlobalVar,
            ExprKind::Op(_) => ExprTag::Op,
            ExprKind::ExternFunc(_) => ExprTag::ExternFunc,
            ExprKind::ShapeExpr(_) => ExprTag::ShapeExpr,
            ExprKind::RuntimeDepShape => ExprTag::RuntimeDepShape,
            ExprKind::Tuple(_) => ExprTag::Tuple,
            ExprKind::TupleGetItem { .. } => ExprTag::TupleGetItem,
            ExprKind::Call(_) => ExprTag::Call,
            ExprKind::If(_) => ExprTag::If,
            ExprKind::Function(_) => ExprTag::Function,
            ExprKind::Seq(_) => ExprTag::Seq,
        }
    }

    /// Whether this node may appear in an operand position.
    pub fn is_atomic(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Constant(_)
                | ExprKind::Var(_)
                | ExprKind::GlobalVar(_)
                | ExprKind::Op(_)
                | ExprKind::ExternFunc(_)
                | ExprKind::ShapeExpr(_)
                | ExprKind::RuntimeDepShape
        )
    }

    pub fn as_var_ref(&self) -> Option<&VarRef> {
        match &self.kind {
            ExprKind::Var(v) => Some(v),
            _ => None,
        }
    }

    /// The referenced variable with the annotations this reference carries.
    pub fn as_var(&self) -> Option<Var> {
        self.as_var_ref().map(|v| Var {
            id: v.id,
            name_hint: v.name_hint.clone(),
            is_dataflow: v.is_dataflow,
            shape: self.shape.clone(),
            checked_type: self.checked_type.clone(),
            span: self.span,
        })
    }

    pub fn as_shape(&self) -> Option<&[PrimExpr]> {
        match &self.kind {
            ExprKind::ShapeExpr(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match &self.kind {
            ExprKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&Call> {
        match &self.kind {
            ExprKind::Call(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&SeqExpr> {
        match &self.kind {
            ExprKind::Seq(s) => Some(s),
            _ => None,
        }
    }

    /// The shape annotation, if any.
    pub fn shape(&self) -> Option<&Expr> {
        self.shape.as_deref()
    }

    /// Put `block` in front of this expression, flattening into an existing
    /// sequence. Empty blocks leave the expression untouched.
    pub fn prepend_block(self, block: BindingBlock) -> Expr {
        if block.is_empty() {
            return self;
        }
        let Expr {
            kind,
            checked_type,
            shape,
            span,
        } = self;
        match kind {
            ExprKind::Seq(seq) => {
                let mut blocks = Vec::with_capacity(seq.blocks.len() + 1);
                blocks.push(block);
                blocks.extend(seq.blocks);
                Expr {
                    kind: ExprKind::Seq(SeqExpr {
                        blocks,
                        body: seq.body,
                    }),
                    checked_type,
                    shape,
                    span,
                }
            }
            kind => Expr::seq(
                vec![block],
                Expr {
                    kind,
                    checked_type,
                    shape,
                    span,
                },
            ),
        }
    }
}

impl From<&Var> for Expr {
    fn from(var: &Var) -> Self {
        var.to_expr()
    }
}

impl From<Constant> for Expr {
    fn from(value: Constant) -> Self {
        Expr::constant(value)
    }
}

// ============================================================================
// Bindings and blocks
// ============================================================================

/// `var = value`
#[derive(Debug, Clone, PartialEq)]
pub struct VarBinding {
    pub var: Var,
    pub value: Expr,
}

impl VarBinding {
    pub fn new(var: Var, value: Expr) -> Self {
        Self { var, value }
    }
}

/// Match `value`'s shape against `pattern`, binding the unbound shape
/// variables of the pattern and optionally `var`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchShape {
    pub value: Expr,
    pub pattern: Vec<PrimExpr>,
    pub var: Option<Var>,
}

impl MatchShape {
    pub fn new(value: Expr, pattern: Vec<PrimExpr>, var: Option<Var>) -> Self {
        Self {
            value,
            pattern,
            var,
        }
    }

    /// The annotations a match-shape target gets for a given value and
    /// pattern: a tensor value yields a tensor of the pattern's rank and
    /// shape, a shape value yields a shape.
    pub fn var_annotations(value: &Expr, pattern: &[PrimExpr]) -> (Option<Type>, Option<Expr>) {
        match &value.checked_type {
            Some(Type::DynTensor { dtype, .. }) => (
                Some(Type::tensor(pattern.len() as i32, *dtype)),
                Some(Expr::shape_expr(pattern.to_vec())),
            ),
            Some(Type::Shape) => (Some(Type::Shape), None),
            other => (other.clone(), None),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Var(VarBinding),
    MatchShape(MatchShape),
}

impl Binding {
    /// The variable this binding defines, if any.
    pub fn var(&self) -> Option<&Var> {
        match self {
            Binding::Var(b) => Some(&b.var),
            Binding::MatchShape(m) => m.var.as_ref(),
        }
    }

    pub fn value(&self) -> &Expr {
        match self {
            Binding::Var(b) => &b.value,
            Binding::MatchShape(m) => &m.value,
        }
    }
}

impl From<VarBinding> for Binding {
    fn from(binding: VarBinding) -> Self {
        Binding::Var(binding)
    }
}

impl From<MatchShape> for Binding {
    fn from(binding: MatchShape) -> Self {
        Binding::MatchShape(binding)
    }
}

/// An ordered group of bindings. Dataflow blocks contain side-effect free
/// bindings whose dataflow variables do not escape the block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BindingBlock {
    pub bindings: Vec<Binding>,
    pub is_dataflow: bool,
}

impl BindingBlock {
    pub fn new(bindings: Vec<Binding>) -> Self {
        Self {
            bindings,
            is_dataflow: false,
        }
    }

    pub fn dataflow(bindings: Vec<Binding>) -> Self {
        Self {
            bindings,
            is_dataflow: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Which return annotations of a function were written by its author.
/// The others are derived from the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Declared {
    pub ret_type: bool,
    pub ret_shape: bool,
}

/// A function with parameters, a body and return annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub params: Vec<Var>,
    pub body: Expr,
    pub ret_type: Option<Type>,
    pub ret_shape: Option<Expr>,
    pub declared: Declared,
    pub span: Option<Span>,
}

impl Function {
    pub fn new(params: Vec<Var>, body: Expr) -> Self {
        Self {
            params,
            body,
            ret_type: None,
            ret_shape: None,
            declared: Declared::default(),
            span: None,
        }
    }

    /// Declare the return type.
    pub fn with_ret_type(mut self, ret_type: Type) -> Self {
        self.ret_type = Some(ret_type);
        self.declared.ret_type = true;
        self
    }

    /// Declare the return shape.
    pub fn with_ret_shape(mut self, ret_shape: Expr) -> Self {
        self.ret_shape = Some(ret_shape);
        self.declared.ret_shape = true;
        self
    }

    /// Drop the return annotations that were derived from the body, keeping
    /// declared ones.
    pub fn without_derived_signature(mut self) -> Self {
        if !self.declared.ret_type {
            self.ret_type = None;
        }
        if !self.declared.ret_shape {
            self.ret_shape = None;
        }
        self
    }

    /// The callable type; unannotated positions are `Object`.
    pub fn func_type(&self) -> Type {
        let params = self
            .params
            .iter()
            .map(|p| p.checked_type.clone().unwrap_or(Type::Object))
            .collect();
        let ret = self
            .ret_type
            .clone()
            .or_else(|| self.body.checked_type.clone())
            .unwrap_or(Type::Object);
        Type::func(params, ret)
    }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Unknown => write!(f, "unknown"),
            DataType::Bool => write!(f, "bool"),
            DataType::Int(bits) => write!(f, "int{}", bits),
            DataType::UInt(bits) => write!(f, "uint{}", bits),
            DataType::Float(bits) => write!(f, "float{}", bits),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Object => write!(f, "Object"),
            Type::Shape => write!(f, "Shape"),
            Type::DynTensor { ndim, dtype } => match (*ndim >= 0, dtype.is_unknown()) {
                (false, true) => write!(f, "Tensor"),
                (false, false) => write!(f, "Tensor[{}]", dtype),
                (true, true) => write!(f, "Tensor[ndim={}]", ndim),
                (true, false) => write!(f, "Tensor[ndim={}, {}]", ndim, dtype),
            },
            Type::Tuple(fields) => {
                write!(f, "Tuple[")?;
                write_comma_separated(f, fields)?;
                write!(f, "]")
            }
            Type::Func { params, ret } => {
                write!(f, "Callable[(")?;
                write_comma_separated(f, params)?;
                write!(f, "), {}]", ret)
            }
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_scalar() {
            match &self.values {
                ConstValues::Int(v) if v.len() == 1 => return write!(f, "{}", v[0]),
                ConstValues::Float(v) if v.len() == 1 => return write!(f, "{:?}", v[0]),
                ConstValues::Bool(v) if v.len() == 1 => return write!(f, "{}", v[0]),
                _ => {}
            }
        }
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(f, "const<({}), {}>", dims.join(", "), self.dtype)
    }
}

fn write_comma_separated<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prim::ShapeVar;

    #[test]
    fn test_var_ids_are_unique() {
        let a = Var::new("x", None, None);
        let b = Var::new("x", None, None);
        assert!(!a.same_as(&b));
        assert!(a.same_as(&a.with_shape_and_type(None, Some(Type::Object))));
    }

    #[test]
    fn test_var_round_trips_through_reference() {
        let n = ShapeVar::new("n");
        let x = Var::dataflow(
            "x",
            Some(Expr::shape_expr(vec![PrimExpr::var(&n)])),
            Some(Type::tensor(1, DataType::FLOAT32)),
        );
        let e = x.to_expr();
        assert!(e.is_atomic());
        assert_eq!(e.as_var(), Some(x));
    }

    #[test]
    fn test_constant_metadata() {
        let c = Expr::constant(Constant::float_tensor(vec![2, 3], vec![0.0; 6]));
        assert_eq!(c.checked_type, Some(Type::tensor(2, DataType::FLOAT32)));
        assert_eq!(
            c.shape().and_then(|s| s.as_shape()),
            Some(&[PrimExpr::Int(2), PrimExpr::Int(3)][..])
        );
    }

    #[test]
    fn test_tuple_metadata_requires_all_fields() {
        let a = Expr::constant(Constant::scalar_int(1));
        let b = Expr::op("relax.add");
        let partial = Expr::tuple(vec![a.clone(), b]);
        assert!(partial.checked_type.is_none());
        assert!(partial.shape.is_none());

        let full = Expr::tuple(vec![a.clone(), a]);
        assert_eq!(
            full.checked_type,
            Some(Type::Tuple(vec![Type::tensor(0, DataType::INT64); 2]))
        );
        let item = Expr::tuple_get_item(full, 1);
        assert_eq!(item.checked_type, Some(Type::tensor(0, DataType::INT64)));
        assert_eq!(item.shape().and_then(|s| s.as_shape()), Some(&[][..]));
    }

    #[test]
    fn test_empty_tuple() {
        let unit = Expr::tuple(Vec::new());
        assert_eq!(unit.checked_type, Some(Type::Tuple(Vec::new())));
        let shape = unit.shape().expect("empty tuples have a shape");
        assert_eq!(shape.kind, ExprKind::Tuple(Vec::new()));
        assert_eq!(shape.checked_type, Some(Type::Tuple(Vec::new())));
        assert!(shape.shape().is_none());
    }

    #[test]
    fn test_type_acceptance() {
        let f32_matrix = Type::tensor(2, DataType::FLOAT32);
        assert!(Type::Object.accepts(&Type::Shape));
        assert!(Type::any_tensor().accepts(&f32_matrix));
        assert!(Type::tensor(2, DataType::Unknown).accepts(&f32_matrix));
        assert!(!Type::tensor(1, DataType::FLOAT32).accepts(&f32_matrix));
        assert!(!f32_matrix.accepts(&Type::any_tensor()));
        assert!(Type::Tuple(vec![Type::Object]).accepts(&Type::Tuple(vec![Type::Shape])));
        assert!(!Type::Shape.accepts(&Type::Object));
    }

    #[test]
    fn test_declared_signature_survives_rederivation() {
        let x = Var::new("x", None, Some(Type::Object));
        let derived = Function {
            ret_type: Some(Type::Object),
            ret_shape: Some(Expr::runtime_dep_shape()),
            ..Function::new(vec![x.clone()], x.to_expr())
        };
        let stripped = derived.without_derived_signature();
        assert!(stripped.ret_type.is_none());
        assert!(stripped.ret_shape.is_none());

        let declared = Function::new(vec![x.clone()], x.to_expr()).with_ret_type(Type::Object);
        assert_eq!(declared.clone().without_derived_signature(), declared);
    }

    #[test]
    fn test_prepend_block_flattens() {
        let x = Var::new("x", None, None);
        let inner = Expr::seq(
            vec![BindingBlock::new(vec![VarBinding::new(
                Var::new("y", None, None),
                x.to_expr(),
            )
            .into()])],
            x.to_expr(),
        );
        let front = BindingBlock::new(vec![VarBinding::new(
            Var::new("z", None, None),
            x.to_expr(),
        )
        .into()]);
        let out = inner.prepend_block(front.clone());
        let seq = out.as_seq().expect("sequence");
        assert_eq!(seq.blocks.len(), 2);
        assert_eq!(seq.blocks[0], front);

        let untouched = x.to_expr().prepend_block(BindingBlock::default());
        assert_eq!(untouched, x.to_expr());
    }

    #[test]
    fn test_match_shape_annotations() {
        let m = ShapeVar::new("m");
        let t = Var::new("t", None, Some(Type::tensor(-1, DataType::FLOAT16)));
        let (ty, shape) = MatchShape::var_annotations(&t.to_expr(), &[PrimExpr::var(&m), 4.into()]);
        assert_eq!(ty, Some(Type::tensor(2, DataType::FLOAT16)));
        assert_eq!(shape, Some(Expr::shape_expr(vec![PrimExpr::var(&m), 4.into()])));

        let s = Var::new("s", None, Some(Type::Shape));
        let (ty, shape) = MatchShape::var_annotations(&s.to_expr(), &[PrimExpr::var(&m)]);
        assert_eq!(ty, Some(Type::Shape));
        assert!(shape.is_none());
    }

    #[test]
    fn test_type_display() {
        assert_eq!(Type::any_tensor().to_string(), "Tensor");
        assert_eq!(
            Type::tensor(2, DataType::FLOAT32).to_string(),
            "Tensor[ndim=2, float32]"
        );
        assert_eq!(
            Type::func(vec![Type::Object, Type::Shape], Type::Tuple(vec![])).to_string(),
            "Callable[(Object, Shape), Tuple[]]"
        );
    }
}
