//! Canonical polynomial form of shape arithmetic.
//!
//! A [`Polynomial`] is a sum of integer-weighted monomials over atoms. Atoms
//! are shape variables or sub-expressions the normal form cannot see into
//! (non-exact divisions, `min`, `max`), rendered canonically so equal
//! sub-expressions become equal atoms.

use std::collections::BTreeMap;
use std::fmt::Write;

use tessera_ir::{PrimExpr, ShapeVarId};

/// An indivisible factor of a monomial.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Atom {
    Var(ShapeVarId),
    Opaque(String),
}

/// Sorted list of atoms; the empty monomial is the constant term.
type Monomial = Vec<Atom>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Polynomial {
    terms: BTreeMap<Monomial, i64>,
}

impl Polynomial {
    pub fn constant(value: i64) -> Self {
        let mut terms = BTreeMap::new();
        if value != 0 {
            terms.insert(Vec::new(), value);
        }
        Self { terms }
    }

    pub fn atom(atom: Atom) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(vec![atom], 1);
        Self { terms }
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// The value if this polynomial has no atoms.
    pub fn as_constant(&self) -> Option<i64> {
        match self.terms.len() {
            0 => Some(0),
            1 => self.terms.get(&Vec::new()).copied(),
            _ => None,
        }
    }

    pub fn checked_add(&self, other: &Polynomial) -> Option<Polynomial> {
        let mut terms = self.terms.clone();
        for (monomial, coeff) in &other.terms {
            let slot = terms.entry(monomial.clone()).or_insert(0);
            *slot = slot.checked_add(*coeff)?;
            if *slot == 0 {
                terms.remove(monomial);
            }
        }
        Some(Polynomial { terms })
    }

    pub fn checked_scale(&self, factor: i64) -> Option<Polynomial> {
        if factor == 0 {
            return Some(Polynomial::default());
        }
        let mut terms = BTreeMap::new();
        for (monomial, coeff) in &self.terms {
            terms.insert(monomial.clone(), coeff.checked_mul(factor)?);
        }
        Some(Polynomial { terms })
    }

    pub fn checked_mul(&self, other: &Polynomial) -> Option<Polynomial> {
        let mut product = Polynomial::default();
        for (m1, c1) in &self.terms {
            for (m2, c2) in &other.terms {
                let mut monomial: Monomial = m1.iter().chain(m2.iter()).cloned().collect();
                monomial.sort();
                let mut terms = BTreeMap::new();
                terms.insert(monomial, c1.checked_mul(*c2)?);
                product = product.checked_add(&Polynomial { terms })?;
            }
        }
        Some(product)
    }

    /// Exact division by a positive constant, when every coefficient is a
    /// multiple of it.
    pub fn div_exact(&self, divisor: i64) -> Option<Polynomial> {
        if divisor <= 0 || self.terms.values().any(|c| c % divisor != 0) {
            return None;
        }
        let terms = self
            .terms
            .iter()
            .map(|(m, c)| (m.clone(), c / divisor))
            .collect();
        Some(Polynomial { terms })
    }

    /// Deterministic text used to name opaque atoms.
    pub fn render(&self) -> String {
        if self.terms.is_empty() {
            return "0".to_string();
        }
        let mut out = String::new();
        for (i, (monomial, coeff)) in self.terms.iter().enumerate() {
            if i > 0 {
                out.push('+');
            }
            let _ = write!(out, "{}", coeff);
            for atom in monomial {
                match atom {
                    Atom::Var(id) => {
                        let _ = write!(out, "*v{}", id.0);
                    }
                    Atom::Opaque(text) => {
                        let _ = write!(out, "*[{}]", text);
                    }
                }
            }
        }
        out
    }
}

/// Normal form of `expr`, or `None` when the arithmetic overflows or divides
/// by zero.
pub fn canonicalize(expr: &PrimExpr) -> Option<Polynomial> {
    match expr {
        PrimExpr::Int(v) => Some(Polynomial::constant(*v)),
        PrimExpr::Var(v) => Some(Polynomial::atom(Atom::Var(v.id))),
        PrimExpr::Add(a, b) => canonicalize(a)?.checked_add(&canonicalize(b)?),
        PrimExpr::Sub(a, b) => canonicalize(a)?.checked_add(&canonicalize(b)?.checked_scale(-1)?),
        PrimExpr::Mul(a, b) => canonicalize(a)?.checked_mul(&canonicalize(b)?),
        PrimExpr::FloorDiv(a, b) => floor_div(canonicalize(a)?, canonicalize(b)?),
        PrimExpr::FloorMod(a, b) => floor_mod(canonicalize(a)?, canonicalize(b)?),
        PrimExpr::Min(a, b) => min_max("min", canonicalize(a)?, canonicalize(b)?, i64::min),
        PrimExpr::Max(a, b) => min_max("max", canonicalize(a)?, canonicalize(b)?, i64::max),
    }
}

fn floor_div(lhs: Polynomial, rhs: Polynomial) -> Option<Polynomial> {
    match (lhs.as_constant(), rhs.as_constant()) {
        (_, Some(0)) => None,
        (Some(a), Some(b)) => Some(Polynomial::constant(floor_div_i64(a, b)?)),
        (_, Some(1)) => Some(lhs),
        (_, Some(k)) => match lhs.div_exact(k) {
            Some(exact) => Some(exact),
            None => Some(opaque("floordiv", &lhs, &rhs)),
        },
        _ => Some(opaque("floordiv", &lhs, &rhs)),
    }
}

fn floor_mod(lhs: Polynomial, rhs: Polynomial) -> Option<Polynomial> {
    match (lhs.as_constant(), rhs.as_constant()) {
        (_, Some(0)) => None,
        (Some(a), Some(b)) => {
            let q = floor_div_i64(a, b)?;
            Some(Polynomial::constant(a.checked_sub(q.checked_mul(b)?)?))
        }
        (_, Some(1)) => Some(Polynomial::default()),
        (_, Some(k)) if lhs.div_exact(k).is_some() => Some(Polynomial::default()),
        _ => Some(opaque("floormod", &lhs, &rhs)),
    }
}

fn min_max(
    name: &str,
    lhs: Polynomial,
    rhs: Polynomial,
    fold: fn(i64, i64) -> i64,
) -> Option<Polynomial> {
    if let (Some(a), Some(b)) = (lhs.as_constant(), rhs.as_constant()) {
        return Some(Polynomial::constant(fold(a, b)));
    }
    if lhs == rhs {
        return Some(lhs);
    }
    // commutative, so order the operands
    let (first, second) = if lhs.render() <= rhs.render() {
        (lhs, rhs)
    } else {
        (rhs, lhs)
    };
    Some(opaque(name, &first, &second))
}

fn opaque(name: &str, lhs: &Polynomial, rhs: &Polynomial) -> Polynomial {
    Polynomial::atom(Atom::Opaque(format!(
        "{}({}, {})",
        name,
        lhs.render(),
        rhs.render()
    )))
}

fn floor_div_i64(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}
