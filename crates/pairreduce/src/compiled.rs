//! Turns a formula tree into something the blocked evaluators can run.
//!
//! Compilation flattens an [`Expr`] tree into a linear tape of elementwise
//! operations. Each operation writes into its own region of a scratch
//! buffer and reads its operands from:
//! - the staged outer row (the variables of the outer category, followed by
//!   the parameters),
//! - the staged inner row (the variables of the inner category),
//! - the regions written by earlier operations, or
//! - a table of constants.
//!
//! Shared subtrees (the same `Arc` node reached along multiple paths) get
//! evaluated once.
//!
//! Binding a compiled formula to a [`PairInputs`] instance produces a
//! [`BoundFormula`], which implements [`PairFormula`].

use crate::Error;
use crate::formula::{Category, Expr, Kind, Node, Var};
use crate::inputs::{PairInputs, batch_index_map};
use crate::misc::{ReductionAxis, shape_len};
use ndarray::ArrayView2;
use pairreduce_nostd_internal::PairFormula;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Src {
    Outer,
    Inner,
    Scratch,
    Const,
}

#[derive(Clone, Copy, Debug)]
struct Operand {
    src: Src,
    offset: usize,
    dim: usize,
}

#[derive(Clone, Copy, Debug)]
enum OpKind {
    Add(Operand, Operand),
    Sub(Operand, Operand),
    Mul(Operand, Operand),
    Neg(Operand),
    Exp(Operand),
    Square(Operand),
    Sum(Operand),
}

#[derive(Clone, Copy, Debug)]
struct Op {
    kind: OpKind,
    // the op writes to scratch[dst..dst + dim]
    dst: usize,
    dim: usize,
}

/// Where the values of a variable get staged
#[derive(Clone, Copy, Debug)]
struct Slot {
    var: Var,
    offset: usize,
}

/// A formula flattened into a tape of operations.
///
/// This doesn't reference any data.
#[derive(Clone, Debug)]
pub struct CompiledFormula {
    dim: usize,
    axis: ReductionAxis,
    outer_slots: Vec<Slot>,
    inner_slots: Vec<Slot>,
    outer_stage_len: usize,
    inner_stage_len: usize,
    consts: Vec<f64>,
    ops: Vec<Op>,
    scratch_len: usize,
    result: Operand,
}

struct Compiler<'a> {
    outer: &'a HashMap<Var, usize>,
    inner: &'a HashMap<Var, usize>,
    consts: Vec<f64>,
    ops: Vec<Op>,
    scratch_len: usize,
    memo: HashMap<*const Node, Operand>,
}

impl<'a> Compiler<'a> {
    fn push_const(&mut self, values: &[f64]) -> Operand {
        let offset = self.consts.len();
        self.consts.extend_from_slice(values);
        Operand {
            src: Src::Const,
            offset,
            dim: values.len(),
        }
    }

    fn push_op(&mut self, kind: OpKind, dim: usize) -> Operand {
        let dst = self.scratch_len;
        self.scratch_len += dim;
        self.ops.push(Op { kind, dst, dim });
        Operand {
            src: Src::Scratch,
            offset: dst,
            dim,
        }
    }

    fn visit(&mut self, expr: &Expr) -> Operand {
        if let Some(operand) = self.memo.get(&expr.node_ptr()) {
            return *operand;
        }
        let dim = expr.dim();
        let operand = match expr.kind() {
            Kind::Var(v) => match (self.outer.get(v), self.inner.get(v)) {
                (Some(&offset), _) => Operand {
                    src: Src::Outer,
                    offset,
                    dim,
                },
                (None, Some(&offset)) => Operand {
                    src: Src::Inner,
                    offset,
                    dim,
                },
                (None, None) => unreachable!("every variable was assigned a slot"),
            },
            Kind::Constant(values) => self.push_const(values),
            Kind::Zero => self.push_const(&vec![0.0; dim]),
            Kind::Add(a, b) => {
                let (a, b) = (self.visit(a), self.visit(b));
                self.push_op(OpKind::Add(a, b), dim)
            }
            Kind::Sub(a, b) => {
                let (a, b) = (self.visit(a), self.visit(b));
                self.push_op(OpKind::Sub(a, b), dim)
            }
            Kind::Mul(a, b) => {
                let (a, b) = (self.visit(a), self.visit(b));
                self.push_op(OpKind::Mul(a, b), dim)
            }
            Kind::Neg(a) => {
                let a = self.visit(a);
                self.push_op(OpKind::Neg(a), dim)
            }
            Kind::Exp(a) => {
                let a = self.visit(a);
                self.push_op(OpKind::Exp(a), dim)
            }
            Kind::Square(a) => {
                let a = self.visit(a);
                self.push_op(OpKind::Square(a), dim)
            }
            Kind::SumComponents(a) => {
                let a = self.visit(a);
                self.push_op(OpKind::Sum(a), dim)
            }
        };
        self.memo.insert(expr.node_ptr(), operand);
        operand
    }
}

/// assign staging offsets to `vars`, returning the slots & the total length
fn assign_slots(vars: &[Var]) -> (Vec<Slot>, usize) {
    let mut offset = 0;
    let slots = vars
        .iter()
        .map(|&var| {
            let slot = Slot { var, offset };
            offset += var.dim();
            slot
        })
        .collect();
    (slots, offset)
}

impl CompiledFormula {
    pub fn new(formula: &Expr, axis: ReductionAxis) -> Result<Self, Error> {
        let vars = formula.vars();
        for (i, a) in vars.iter().enumerate() {
            for b in vars.iter().skip(i + 1) {
                if a.id() == b.id() {
                    return Err(Error::configuration(format!(
                        "variable id {} is used by {a} (width {}) and by {b} (width {}). \
                         Each id must refer to a single variable",
                        a.id(),
                        a.dim(),
                        b.dim()
                    )));
                }
            }
        }

        // parameters are staged along with the outer row
        let outer_vars: Vec<Var> = vars
            .iter()
            .filter(|v| v.cat() == axis.outer_category())
            .chain(vars.iter().filter(|v| v.cat() == Category::Param))
            .copied()
            .collect();
        let inner_vars: Vec<Var> = vars
            .iter()
            .filter(|v| v.cat() == axis.inner_category())
            .copied()
            .collect();
        let (outer_slots, outer_stage_len) = assign_slots(&outer_vars);
        let (inner_slots, inner_stage_len) = assign_slots(&inner_vars);

        let outer_map: HashMap<Var, usize> =
            outer_slots.iter().map(|s| (s.var, s.offset)).collect();
        let inner_map: HashMap<Var, usize> =
            inner_slots.iter().map(|s| (s.var, s.offset)).collect();
        let mut compiler = Compiler {
            outer: &outer_map,
            inner: &inner_map,
            consts: Vec::new(),
            ops: Vec::new(),
            scratch_len: 0,
            memo: HashMap::new(),
        };
        let result = compiler.visit(formula);

        Ok(CompiledFormula {
            dim: formula.dim(),
            axis,
            outer_slots,
            inner_slots,
            outer_stage_len,
            inner_stage_len,
            consts: compiler.consts,
            ops: compiler.ops,
            scratch_len: compiler.scratch_len,
            result,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn axis(&self) -> ReductionAxis {
        self.axis
    }

    /// The widths of the formula's output and of every variable
    pub fn widths(&self) -> Vec<usize> {
        std::iter::once(self.dim)
            .chain(self.outer_slots.iter().map(|s| s.var.dim()))
            .chain(self.inner_slots.iter().map(|s| s.var.dim()))
            .collect()
    }

    /// Attach the compiled formula to input data
    pub fn bind<'a, 'i: 'a>(
        &'a self,
        inputs: &PairInputs<'i>,
    ) -> Result<BoundFormula<'a>, Error> {
        let batch_shape = inputs.batch_shape()?;
        let bind_slots = |slots: &[Slot]| -> Result<Vec<BoundSlot<'a>>, Error> {
            slots
                .iter()
                .map(|slot| BoundSlot::new(slot, inputs, &batch_shape))
                .collect()
        };
        Ok(BoundFormula {
            compiled: self,
            n_batches: shape_len(&batch_shape),
            outer: bind_slots(&self.outer_slots)?,
            inner: bind_slots(&self.inner_slots)?,
        })
    }

    #[inline(always)]
    fn operand<'s>(
        &'s self,
        operand: &Operand,
        outer: &'s [f64],
        inner: &'s [f64],
        done: &'s [f64],
    ) -> &'s [f64] {
        let src = match operand.src {
            Src::Outer => outer,
            Src::Inner => inner,
            Src::Scratch => done,
            Src::Const => &self.consts,
        };
        &src[operand.offset..operand.offset + operand.dim]
    }

    fn run(&self, out: &mut [f64], outer: &[f64], inner: &[f64], scratch: &mut [f64]) {
        for op in &self.ops {
            // operands always live before dst
            let (done, rest) = scratch.split_at_mut(op.dst);
            let done: &[f64] = done;
            let dst = &mut rest[..op.dim];
            let binary = |a: &Operand, b: &Operand, dst: &mut [f64], f: fn(f64, f64) -> f64| {
                let a_vals = self.operand(a, outer, inner, done);
                let b_vals = self.operand(b, outer, inner, done);
                for (k, d) in dst.iter_mut().enumerate() {
                    let x = if a.dim == 1 { a_vals[0] } else { a_vals[k] };
                    let y = if b.dim == 1 { b_vals[0] } else { b_vals[k] };
                    *d = f(x, y);
                }
            };
            let unary = |a: &Operand, dst: &mut [f64], f: fn(f64) -> f64| {
                let a_vals = self.operand(a, outer, inner, done);
                for (d, x) in dst.iter_mut().zip(a_vals) {
                    *d = f(*x);
                }
            };
            match op.kind {
                OpKind::Add(ref a, ref b) => binary(a, b, dst, |x, y| x + y),
                OpKind::Sub(ref a, ref b) => binary(a, b, dst, |x, y| x - y),
                OpKind::Mul(ref a, ref b) => binary(a, b, dst, |x, y| x * y),
                OpKind::Neg(ref a) => unary(a, dst, |x| -x),
                OpKind::Exp(ref a) => unary(a, dst, f64::exp),
                OpKind::Square(ref a) => unary(a, dst, |x| x * x),
                OpKind::Sum(ref a) => {
                    dst[0] = self.operand(a, outer, inner, done).iter().sum();
                }
            }
        }
        out[..self.dim].copy_from_slice(self.operand(&self.result, outer, inner, scratch));
    }
}

/// A variable slot that has been attached to an input array
#[derive(Clone, Debug)]
struct BoundSlot<'a> {
    data: ArrayView2<'a, f64>,
    // maps each batch to the batch of data
    batch_map: Vec<usize>,
    rows_per_batch: usize,
    is_param: bool,
    offset: usize,
    dim: usize,
}

impl<'a> BoundSlot<'a> {
    fn new<'i: 'a>(
        slot: &Slot,
        inputs: &PairInputs<'i>,
        batch_shape: &[usize],
    ) -> Result<Self, Error> {
        let var = slot.var;
        let Some(array) = inputs.get(var.id()) else {
            return Err(Error::configuration(format!(
                "no input array was provided for {var}"
            )));
        };
        // narrow the view to the lifetime of the binding
        let data = array.data().clone().reborrow();
        let rows_per_batch = match var.cat() {
            Category::I => inputs.nx(),
            Category::J => inputs.ny(),
            Category::Param => 1,
        };
        let own_batches = shape_len(array.batch_shape());
        if data.ncols() != var.dim() {
            return Err(Error::configuration(format!(
                "{var} has a width of {}, but its array has {} columns",
                var.dim(),
                data.ncols()
            )));
        } else if data.nrows() != own_batches * rows_per_batch {
            return Err(Error::configuration(format!(
                "the array for {var} should have {} rows ({} batches of {}), \
                 but it has {}",
                own_batches * rows_per_batch,
                own_batches,
                rows_per_batch,
                data.nrows()
            )));
        }
        Ok(BoundSlot {
            data,
            batch_map: batch_index_map(array.batch_shape(), batch_shape),
            rows_per_batch,
            is_param: var.cat() == Category::Param,
            offset: slot.offset,
            dim: var.dim(),
        })
    }

    #[inline(always)]
    fn stage(&self, batch: usize, index: usize, dst: &mut [f64]) {
        let index = if self.is_param { 0 } else { index };
        let row = self.batch_map[batch] * self.rows_per_batch + index;
        let dst = &mut dst[self.offset..self.offset + self.dim];
        for (d, v) in dst.iter_mut().zip(self.data.row(row)) {
            *d = *v;
        }
    }
}

/// A [`CompiledFormula`] attached to input arrays
#[derive(Clone, Debug)]
pub struct BoundFormula<'a> {
    compiled: &'a CompiledFormula,
    n_batches: usize,
    outer: Vec<BoundSlot<'a>>,
    inner: Vec<BoundSlot<'a>>,
}

impl<'a> BoundFormula<'a> {
    pub fn n_batches(&self) -> usize {
        self.n_batches
    }
}

impl<'a> PairFormula for BoundFormula<'a> {
    fn dim(&self) -> usize {
        self.compiled.dim
    }

    fn outer_stage_len(&self) -> usize {
        self.compiled.outer_stage_len
    }

    fn inner_stage_len(&self) -> usize {
        self.compiled.inner_stage_len
    }

    fn scratch_len(&self) -> usize {
        self.compiled.scratch_len
    }

    fn stage_outer(&self, batch: usize, outer_index: usize, dst: &mut [f64]) {
        for slot in &self.outer {
            slot.stage(batch, outer_index, dst);
        }
    }

    fn stage_inner(&self, batch: usize, inner_index: usize, dst: &mut [f64]) {
        for slot in &self.inner {
            slot.stage(batch, inner_index, dst);
        }
    }

    #[inline(always)]
    fn eval(&self, out: &mut [f64], outer: &[f64], inner: &[f64], scratch: &mut [f64]) {
        self.compiled.run(out, outer, inner, scratch)
    }
}
