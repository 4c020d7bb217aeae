//! Builds the reduction that computes the gradient of another reduction.
//!
//! Consider a forward reduction that produces `R_i = reduce_j F(x_i, y_j, p)`
//! and an adjoint `G_i` (the gradient of some scalar loss with respect to
//! `R_i`). The gradient with respect to a variable `v` is another pairwise
//! reduction:
//! - it's indexed by the category of `v` (the gradient with respect to `y_j`
//!   is a reduction over `i`),
//! - its formula is the symbolic derivative of `F` contracted with the
//!   adjoint (see [`Expr::diff`]),
//! - contributions always accumulate with a sum.
//!
//! The adjoint (and, for `LogSumExp`, the forward result) enter the gradient
//! formula as variables of the forward reduction's output category.
//!
//! A block-sparse forward reduction has a block-sparse gradient over the same
//! pairs. When the gradient is indexed by the other category, its range table
//! is the transposed table (see [`GenericReduction::grad_ranges`]).

use crate::{
    Error, GenericReduction, Ranges, ReductionBuilder,
    formula::{Category, Expr, Var},
    misc::ReductionAxis,
};

/// How a reduction gets differentiated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GradRule {
    /// sum of the derivative of the formula contracted with the adjoint
    Sum,
    /// like [`GradRule::Sum`], except that the adjoint is first rescaled by
    /// the softmax weights `exp(F - R)`
    LogSumExp,
    /// order statistics are piecewise constant; their derivative vanishes
    Zero,
}

/// Look up the rule for differentiating the named reduction
pub fn grad_rule(reduction_name: &str) -> Result<GradRule, Error> {
    match reduction_name {
        "Sum" => Ok(GradRule::Sum),
        "LogSumExp" => Ok(GradRule::LogSumExp),
        "Min" | "Max" | "ArgMin" | "ArgMax" | "MinArgMin" | "MaxArgMax" | "KMin" | "ArgKMin"
        | "KMinArgKMin" | "ArgKMax" | "Zero" => Ok(GradRule::Zero),
        _ => Err(Error::unsupported_gradient(
            reduction_name.to_owned(),
            "there is no gradient rule for this reduction",
        )),
    }
}

impl GenericReduction {
    /// Build the reduction that computes the gradient with respect to `wrt`.
    ///
    /// - `adjoint_id` is the variable id used for the adjoint. The adjoint has
    ///   the category of this reduction's output rows and a width of
    ///   [`GenericReduction::output_dim`].
    /// - `forward_id` is the variable id used for this reduction's own result
    ///   (with the same category & width as the adjoint). Only the
    ///   `LogSumExp` rule needs it.
    ///
    /// Neither id may clash with a variable of the formula.
    pub fn grad(
        &self,
        wrt: &Var,
        adjoint_id: usize,
        forward_id: Option<usize>,
    ) -> Result<GenericReduction, Error> {
        let axis = self.grad_axis(wrt)?;
        let out_cat = self.axis().outer_category();

        let formula = match grad_rule(self.name())? {
            GradRule::Zero => {
                return ReductionBuilder::new()
                    .reduction("Zero")
                    .axis(axis)
                    .formula(Expr::zero(wrt.dim())?)
                    .build();
            }
            GradRule::Sum => {
                let adjoint = Expr::var(Var::new(adjoint_id, self.output_dim(), out_cat)?);
                self.formula().diff(wrt, &adjoint)?
            }
            GradRule::LogSumExp => {
                let Some(forward_id) = forward_id else {
                    return Err(Error::configuration(
                        "the gradient of LogSumExp needs the id of a variable \
                         holding the forward result",
                    ));
                };
                let adjoint = Expr::var(Var::new(adjoint_id, self.output_dim(), out_cat)?);
                let forward = Expr::var(Var::new(forward_id, self.output_dim(), out_cat)?);
                let weight = self.formula().sub(&forward)?.exp();
                self.formula().diff(wrt, &adjoint.mul(&weight)?)?
            }
        };
        ReductionBuilder::new()
            .reduction("Sum")
            .axis(axis)
            .formula(formula)
            .build()
    }

    /// The range table for the gradient with respect to `wrt`, given the
    /// `ranges` of this reduction.
    ///
    /// Both reductions visit the same pairs. When the gradient is indexed by
    /// the other category (e.g. `wrt` is a `J` variable of a reduction over
    /// `j`), that's the transposed table.
    pub fn grad_ranges(&self, wrt: &Var, ranges: &Ranges) -> Result<Ranges, Error> {
        if self.grad_axis(wrt)? == self.axis() {
            Ok(ranges.clone())
        } else {
            Ok(ranges.transposed())
        }
    }

    fn grad_axis(&self, wrt: &Var) -> Result<ReductionAxis, Error> {
        match wrt.cat() {
            Category::I => Ok(ReductionAxis::OverJ),
            Category::J => Ok(ReductionAxis::OverI),
            Category::Param => Err(Error::unsupported_gradient(
                self.name().to_owned(),
                "differentiation with respect to a parameter isn't supported",
            )),
        }
    }
}
