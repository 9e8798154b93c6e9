//! Symbolic shape arithmetic.
//!
//! Tensor dimensions are integer expressions over shape variables. These are
//! the values that appear inside shape expressions and match-shape patterns.

use smol_str::SmolStr;
use std::fmt;
use std::ops;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_SHAPE_VAR: AtomicU32 = AtomicU32::new(0);

/// Identity of a shape variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeVarId(pub u32);

impl ShapeVarId {
    /// Allocate a process-wide unique id.
    pub fn fresh() -> Self {
        ShapeVarId(NEXT_SHAPE_VAR.fetch_add(1, Ordering::Relaxed))
    }
}

/// A symbolic dimension such as `n` in `Tensor((n, 4), "float32")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeVar {
    pub id: ShapeVarId,
    pub name: SmolStr,
}

impl ShapeVar {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            id: ShapeVarId::fresh(),
            name: name.into(),
        }
    }
}

/// Integer expression over shape variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimExpr {
    Int(i64),
    Var(ShapeVar),
    Add(Box<PrimExpr>, Box<PrimExpr>),
    Sub(Box<PrimExpr>, Box<PrimExpr>),
    Mul(Box<PrimExpr>, Box<PrimExpr>),
    FloorDiv(Box<PrimExpr>, Box<PrimExpr>),
    FloorMod(Box<PrimExpr>, Box<PrimExpr>),
    Min(Box<PrimExpr>, Box<PrimExpr>),
    Max(Box<PrimExpr>, Box<PrimExpr>),
}

impl PrimExpr {
    pub fn int(value: i64) -> Self {
        PrimExpr::Int(value)
    }

    pub fn var(var: &ShapeVar) -> Self {
        PrimExpr::Var(var.clone())
    }

    pub fn floor_div(lhs: PrimExpr, rhs: PrimExpr) -> Self {
        PrimExpr::FloorDiv(Box::new(lhs), Box::new(rhs))
    }

    pub fn floor_mod(lhs: PrimExpr, rhs: PrimExpr) -> Self {
        PrimExpr::FloorMod(Box::new(lhs), Box::new(rhs))
    }

    pub fn min(lhs: PrimExpr, rhs: PrimExpr) -> Self {
        PrimExpr::Min(Box::new(lhs), Box::new(rhs))
    }

    pub fn max(lhs: PrimExpr, rhs: PrimExpr) -> Self {
        PrimExpr::Max(Box::new(lhs), Box::new(rhs))
    }

    /// The constant value, if this is a literal.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PrimExpr::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Both operands of a binary node.
    pub fn operands(&self) -> Option<(&PrimExpr, &PrimExpr)> {
        match self {
            PrimExpr::Int(_) | PrimExpr::Var(_) => None,
            PrimExpr::Add(a, b)
            | PrimExpr::Sub(a, b)
            | PrimExpr::Mul(a, b)
            | PrimExpr::FloorDiv(a, b)
            | PrimExpr::FloorMod(a, b)
            | PrimExpr::Min(a, b)
            | PrimExpr::Max(a, b) => Some((a, b)),
        }
    }

    /// Append every shape variable not yet in `out`, left to right.
    pub fn collect_vars(&self, out: &mut Vec<ShapeVar>) {
        match self {
            PrimExpr::Int(_) => {}
            PrimExpr::Var(v) => {
                if !out.iter().any(|seen| seen.id == v.id) {
                    out.push(v.clone());
                }
            }
            _ => {
                if let Some((a, b)) = self.operands() {
                    a.collect_vars(out);
                    b.collect_vars(out);
                }
            }
        }
    }

    /// Shape variables in order of first occurrence.
    pub fn vars(&self) -> Vec<ShapeVar> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }
}

impl From<i64> for PrimExpr {
    fn from(value: i64) -> Self {
        PrimExpr::Int(value)
    }
}

impl From<&ShapeVar> for PrimExpr {
    fn from(var: &ShapeVar) -> Self {
        PrimExpr::Var(var.clone())
    }
}

impl From<ShapeVar> for PrimExpr {
    fn from(var: ShapeVar) -> Self {
        PrimExpr::Var(var)
    }
}

impl ops::Add for PrimExpr {
    type Output = PrimExpr;

    fn add(self, rhs: PrimExpr) -> PrimExpr {
        PrimExpr::Add(Box::new(self), Box::new(rhs))
    }
}

impl ops::Sub for PrimExpr {
    type Output = PrimExpr;

    fn sub(self, rhs: PrimExpr) -> PrimExpr {
        PrimExpr::Sub(Box::new(self), Box::new(rhs))
    }
}

impl ops::Mul for PrimExpr {
    type Output = PrimExpr;

    fn mul(self, rhs: PrimExpr) -> PrimExpr {
        PrimExpr::Mul(Box::new(self), Box::new(rhs))
    }
}

impl fmt::Display for ShapeVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Display for PrimExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimExpr::Int(v) => write!(f, "{}", v),
            PrimExpr::Var(v) => write!(f, "{}", v),
            PrimExpr::Add(a, b) => write!(f, "({} + {})", a, b),
            PrimExpr::Sub(a, b) => write!(f, "({} - {})", a, b),
            PrimExpr::Mul(a, b) => write!(f, "({} * {})", a, b),
            PrimExpr::FloorDiv(a, b) => write!(f, "floordiv({}, {})", a, b),
            PrimExpr::FloorMod(a, b) => write!(f, "floormod({}, {})", a, b),
            PrimExpr::Min(a, b) => write!(f, "min({}, {})", a, b),
            PrimExpr::Max(a, b) => write!(f, "max({}, {})", a, b),
        }
    }
}
