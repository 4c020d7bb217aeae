//! A small symbolic front end for building pairwise formulas.
//!
//! Formulas are trees of [`Expr`] nodes. Every node caches the width of the
//! vector it produces, and the constructors check that the widths of the
//! operands are compatible. Elementwise binary operations accept operands of
//! equal width, or a width-1 operand that gets broadcast against the other.
//!
//! The leaves of a tree are [`Var`]s (tagged with a [`Category`]) and
//! constants. Trees are immutable and cheap to clone (nodes are shared
//! through [`Arc`]).
//!
//! [`Expr::diff`] implements reverse-mode symbolic differentiation, which is
//! how gradients of reductions get built.

use crate::Error;
use std::fmt;
use std::sync::Arc;

/// Describes how the values of a variable are indexed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// one vector per index `i` (category 0)
    I,
    /// one vector per index `j` (category 1)
    J,
    /// a single global vector (category 2)
    Param,
}

impl Category {
    pub fn index(&self) -> u8 {
        match self {
            Category::I => 0,
            Category::J => 1,
            Category::Param => 2,
        }
    }

    pub fn from_index(index: u8) -> Result<Self, Error> {
        match index {
            0 => Ok(Category::I),
            1 => Ok(Category::J),
            2 => Ok(Category::Param),
            _ => Err(Error::integer_range("variable category", index as i64, 0, 2)),
        }
    }

    fn prefix(&self) -> char {
        match self {
            Category::I => 'x',
            Category::J => 'y',
            Category::Param => 'p',
        }
    }
}

/// A symbolic input variable.
///
/// The `id` identifies the array that supplies the values. Two variables
/// are the same variable when all 3 properties match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var {
    cat: Category,
    id: usize,
    dim: usize,
}

impl Var {
    pub fn new(id: usize, dim: usize, cat: Category) -> Result<Var, Error> {
        if dim == 0 {
            Err(Error::configuration(format!(
                "variable {}{id} must have a positive width",
                cat.prefix()
            )))
        } else {
            Ok(Var { cat, id, dim })
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn cat(&self) -> Category {
        self.cat
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.cat.prefix(), self.id)
    }
}

#[derive(Debug)]
pub(crate) enum Kind {
    Var(Var),
    Constant(Vec<f64>),
    Zero,
    Add(Expr, Expr),
    Sub(Expr, Expr),
    Mul(Expr, Expr),
    Neg(Expr),
    Exp(Expr),
    Square(Expr),
    SumComponents(Expr),
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) kind: Kind,
    pub(crate) dim: usize,
}

/// A node of a formula tree
#[derive(Clone, Debug)]
pub struct Expr(Arc<Node>);

/// computes the width of an elementwise binary operation
fn broadcast_dim(op: &'static str, a: &Expr, b: &Expr) -> Result<usize, Error> {
    let (da, db) = (a.dim(), b.dim());
    if da == db || db == 1 {
        Ok(da)
    } else if da == 1 {
        Ok(db)
    } else {
        Err(Error::configuration(format!(
            "can't apply {op} to operands of width {da} ({a}) and {db} ({b})"
        )))
    }
}

// constructors
impl Expr {
    fn from_kind(kind: Kind, dim: usize) -> Expr {
        Expr(Arc::new(Node { kind, dim }))
    }

    pub fn var(var: Var) -> Expr {
        Expr::from_kind(Kind::Var(var), var.dim)
    }

    pub fn constant(values: Vec<f64>) -> Result<Expr, Error> {
        if values.is_empty() {
            return Err(Error::configuration("a constant needs at least 1 value"));
        }
        let dim = values.len();
        Ok(Expr::from_kind(Kind::Constant(values), dim))
    }

    pub fn scalar(value: f64) -> Expr {
        Expr::from_kind(Kind::Constant(vec![value]), 1)
    }

    /// The zero vector of width `dim`
    pub fn zero(dim: usize) -> Result<Expr, Error> {
        if dim == 0 {
            Err(Error::configuration("a zero vector must have a positive width"))
        } else {
            Ok(Expr::from_kind(Kind::Zero, dim))
        }
    }

    /// Elementwise sum. A zero operand that doesn't determine the width of
    /// the result is dropped.
    #[allow(clippy::should_implement_trait)]
    pub fn add(&self, other: &Expr) -> Result<Expr, Error> {
        let dim = broadcast_dim("+", self, other)?;
        Ok(if self.is_zero() && other.dim() == dim {
            other.clone()
        } else if other.is_zero() && self.dim() == dim {
            self.clone()
        } else {
            Expr::from_kind(Kind::Add(self.clone(), other.clone()), dim)
        })
    }

    #[allow(clippy::should_implement_trait)]
    pub fn sub(&self, other: &Expr) -> Result<Expr, Error> {
        let dim = broadcast_dim("-", self, other)?;
        Ok(if other.is_zero() && self.dim() == dim {
            self.clone()
        } else if self.is_zero() && other.dim() == dim {
            other.neg()
        } else {
            Expr::from_kind(Kind::Sub(self.clone(), other.clone()), dim)
        })
    }

    /// Elementwise product
    #[allow(clippy::should_implement_trait)]
    pub fn mul(&self, other: &Expr) -> Result<Expr, Error> {
        let dim = broadcast_dim("*", self, other)?;
        if self.is_zero() || other.is_zero() {
            Expr::zero(dim)
        } else {
            Ok(Expr::from_kind(Kind::Mul(self.clone(), other.clone()), dim))
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn neg(&self) -> Expr {
        if self.is_zero() {
            self.clone()
        } else {
            Expr::from_kind(Kind::Neg(self.clone()), self.dim())
        }
    }

    /// Elementwise exponential
    pub fn exp(&self) -> Expr {
        Expr::from_kind(Kind::Exp(self.clone()), self.dim())
    }

    /// Elementwise square
    pub fn square(&self) -> Expr {
        if self.is_zero() {
            self.clone()
        } else {
            Expr::from_kind(Kind::Square(self.clone()), self.dim())
        }
    }

    /// The sum of all components (a width-1 result)
    pub fn sum(&self) -> Expr {
        if self.is_zero() {
            Expr::from_kind(Kind::Zero, 1)
        } else {
            Expr::from_kind(Kind::SumComponents(self.clone()), 1)
        }
    }

    /// Scalar product of 2 vectors of equal width
    pub fn dot(&self, other: &Expr) -> Result<Expr, Error> {
        if self.dim() != other.dim() {
            return Err(Error::configuration(format!(
                "can't take the scalar product of {self} and {other}: the \
                 widths differ"
            )));
        }
        Ok(self.mul(other)?.sum())
    }

    /// Squared Euclidean norm
    pub fn sq_norm2(&self) -> Expr {
        self.square().sum()
    }

    /// Squared Euclidean distance between 2 vectors of equal width
    pub fn sq_dist(&self, other: &Expr) -> Result<Expr, Error> {
        if self.dim() != other.dim() {
            return Err(Error::configuration(format!(
                "can't take the distance between {self} and {other}: the \
                 widths differ"
            )));
        }
        Ok(self.sub(other)?.sq_norm2())
    }
}

// accessors
impl Expr {
    pub fn dim(&self) -> usize {
        self.0.dim
    }

    pub fn is_zero(&self) -> bool {
        matches!(self.0.kind, Kind::Zero)
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.0.kind
    }

    /// used for memoization (nodes are shared via Arc)
    pub(crate) fn node_ptr(&self) -> *const Node {
        Arc::as_ptr(&self.0)
    }

    fn children(&self) -> Vec<&Expr> {
        match self.kind() {
            Kind::Var(_) | Kind::Constant(_) | Kind::Zero => Vec::new(),
            Kind::Add(a, b) | Kind::Sub(a, b) | Kind::Mul(a, b) => vec![a, b],
            Kind::Neg(a) | Kind::Exp(a) | Kind::Square(a) | Kind::SumComponents(a) => vec![a],
        }
    }

    /// The distinct variables referenced by the formula, sorted by category
    /// and then by id
    pub fn vars(&self) -> Vec<Var> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            if let Kind::Var(v) = expr.kind() {
                out.push(*v);
            }
            stack.extend(expr.children());
        }
        out.sort();
        out.dedup();
        out
    }
}

/// sums the components of `g` when it's wider than the operand it flows to
fn unbroadcast(operand_dim: usize, g: Expr) -> Expr {
    if g.dim() == operand_dim {
        g
    } else {
        // the operand was broadcast
        debug_assert_eq!(operand_dim, 1);
        g.sum()
    }
}

impl Expr {
    /// Reverse-mode derivative.
    ///
    /// Returns the formula for `Σₖ adjointₖ ∂selfₖ/∂var`, a vector of width
    /// `var.dim()`. `adjoint` must have the same width as `self`.
    pub fn diff(&self, var: &Var, adjoint: &Expr) -> Result<Expr, Error> {
        if adjoint.dim() != self.dim() {
            return Err(Error::configuration(format!(
                "the adjoint {adjoint} has width {}, but {self} has width {}",
                adjoint.dim(),
                self.dim()
            )));
        }
        self.backprop(var, adjoint.clone())
    }

    fn backprop(&self, var: &Var, g: Expr) -> Result<Expr, Error> {
        match self.kind() {
            Kind::Var(v) if v == var => Ok(g),
            Kind::Var(_) | Kind::Constant(_) | Kind::Zero => Expr::zero(var.dim()),
            Kind::Add(a, b) => {
                let da = a.backprop(var, unbroadcast(a.dim(), g.clone()))?;
                let db = b.backprop(var, unbroadcast(b.dim(), g))?;
                da.add(&db)
            }
            Kind::Sub(a, b) => {
                let da = a.backprop(var, unbroadcast(a.dim(), g.clone()))?;
                let db = b.backprop(var, unbroadcast(b.dim(), g.neg()))?;
                da.add(&db)
            }
            Kind::Mul(a, b) => {
                let da = a.backprop(var, unbroadcast(a.dim(), g.mul(b)?))?;
                let db = b.backprop(var, unbroadcast(b.dim(), g.mul(a)?))?;
                da.add(&db)
            }
            Kind::Neg(a) => a.backprop(var, g.neg()),
            // d/da exp(a) = exp(a), which is just self
            Kind::Exp(a) => a.backprop(var, g.mul(self)?),
            Kind::Square(a) => a.backprop(var, g.mul(a)?.mul(&Expr::scalar(2.0))?),
            Kind::SumComponents(a) => {
                // g has width 1, it gets broadcast back to the operand's width
                let ones = Expr::constant(vec![1.0; a.dim()])?;
                a.backprop(var, g.mul(&ones)?)
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind() {
            Kind::Var(v) => v.fmt(f),
            Kind::Constant(values) if values.len() == 1 => write!(f, "{}", values[0]),
            Kind::Constant(values) => write!(f, "{values:?}"),
            Kind::Zero => write!(f, "0"),
            Kind::Add(a, b) => write!(f, "({a} + {b})"),
            Kind::Sub(a, b) => write!(f, "({a} - {b})"),
            Kind::Mul(a, b) => write!(f, "({a} * {b})"),
            Kind::Neg(a) => write!(f, "-{a}"),
            Kind::Exp(a) => write!(f, "Exp({a})"),
            Kind::Square(a) => write!(f, "Square({a})"),
            Kind::SumComponents(a) => write!(f, "Sum({a})"),
        }
    }
}
