use crate::{
    Error,
    compiled::CompiledFormula,
    device::check_supported_widths,
    executor::try_alloc_f64,
    formula::Expr,
    inputs::PairInputs,
    misc::ReductionAxis,
    ranges::Ranges,
    runtime::{Backend, RuntimeSpec},
    wrapped_reducer::{Config, Job, WrappedReducer, wrapped_reducer_from_config},
};
use log::debug;
use ndarray::ArrayViewMut2;
use std::num::NonZeroUsize;

/// A fully configured pairwise reduction: a formula, the index that gets
/// reduced, and the reduction policy.
///
/// Instances are built with [`ReductionBuilder`] and are immutable. Use
/// [`crate::reduce_dense`] or [`crate::reduce_ranged`] to evaluate one.
pub struct GenericReduction {
    config: Config,
    axis: ReductionAxis,
    formula: Expr,
    compiled: CompiledFormula,
    wrapped_reducer: Box<dyn WrappedReducer>,
}

impl std::fmt::Debug for GenericReduction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("GenericReduction")
            .field("config", &self.config)
            .field("axis", &self.axis)
            .field("formula", &format_args!("{}", self.formula))
            .finish()
    }
}

impl GenericReduction {
    pub fn name(&self) -> &str {
        &self.config.reduction_name
    }

    /// the K parameter (only the K-variants have one)
    pub fn k(&self) -> Option<usize> {
        self.config.k.map(NonZeroUsize::get)
    }

    pub fn axis(&self) -> ReductionAxis {
        self.axis
    }

    pub fn formula(&self) -> &Expr {
        &self.formula
    }

    /// The width of a single output row
    pub fn output_dim(&self) -> usize {
        self.wrapped_reducer.output_dim()
    }

    /// The size of an accumulator state (for a single output row)
    pub fn accum_state_size(&self) -> usize {
        self.wrapped_reducer.accum_state_size()
    }

    /// The shape of the 2D output array expected for `inputs`:
    /// `(n_batches * n_outer, output_dim)`
    pub fn output_shape(&self, inputs: &PairInputs) -> Result<(usize, usize), Error> {
        let (n_outer, _) = self.axis.outer_inner_lens(inputs.nx(), inputs.ny());
        Ok((inputs.n_batches()? * n_outer, self.output_dim()))
    }

    /// Carry out the reduction & write the result into `out`.
    ///
    /// Nothing is written to `out` unless the whole calculation succeeds.
    pub(crate) fn exec(
        &self,
        inputs: &PairInputs,
        ranges: Option<&Ranges>,
        out: &mut ArrayViewMut2<f64>,
        runtime: &RuntimeSpec,
    ) -> Result<(), Error> {
        let expected_shape = self.output_shape(inputs)?;
        if out.dim() != expected_shape {
            return Err(Error::configuration(format!(
                "the output array has shape {:?}, but the reduction produces {:?}",
                out.dim(),
                expected_shape
            )));
        }
        if let Backend::Device(ctx) = runtime.backend() {
            check_supported_widths(ctx.as_ref(), &self.compiled.widths())?;
        }

        let (n_outer, n_inner) = self.axis.outer_inner_lens(inputs.nx(), inputs.ny());
        if let Some(ranges) = ranges {
            ranges.validate(n_outer, n_inner)?;
        }
        let bound = self.compiled.bind(inputs)?;
        let job = Job {
            n_batches: bound.n_batches(),
            n_outer,
            n_inner,
            ranges: ranges.map(Ranges::view),
        };
        debug!(
            "{} reduction over {:?}: {} batches, n_outer = {}, n_inner = {}, ranged = {}",
            self.name(),
            self.axis,
            job.n_batches,
            n_outer,
            n_inner,
            job.ranges.is_some()
        );

        // stage the result so that a failure never leaves a partial output
        let mut staged = try_alloc_f64(expected_shape.0 * expected_shape.1, "output staging buffer")?;
        self.wrapped_reducer
            .exec_reduction(&bound, &job, runtime, &mut staged)?;
        for (dst, src) in out.iter_mut().zip(staged.iter()) {
            *dst = *src;
        }
        Ok(())
    }
}

/// Assembles a [`GenericReduction`]
///
/// ```
/// use pairreduce::{Category, Expr, ReductionAxis, ReductionBuilder, Var};
/// let x = Expr::var(Var::new(0, 3, Category::I).unwrap());
/// let y = Expr::var(Var::new(1, 3, Category::J).unwrap());
/// let reduction = ReductionBuilder::new()
///     .reduction("ArgKMin")
///     .k(2)
///     .axis(ReductionAxis::OverJ)
///     .formula(x.sq_dist(&y).unwrap())
///     .build()
///     .unwrap();
/// assert_eq!(reduction.output_dim(), 2);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ReductionBuilder {
    reduction_name: Option<String>,
    k: Option<usize>,
    axis: Option<ReductionAxis>,
    formula: Option<Expr>,
}

impl ReductionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// the name of the reduction policy (e.g. `"Sum"` or `"ArgKMin"`)
    pub fn reduction(mut self, name: &str) -> Self {
        self.reduction_name = Some(name.to_owned());
        self
    }

    /// the number of retained entries (only for the K-variants)
    pub fn k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    /// the reduced index (defaults to [`ReductionAxis::OverJ`])
    pub fn axis(mut self, axis: ReductionAxis) -> Self {
        self.axis = Some(axis);
        self
    }

    pub fn formula(mut self, formula: Expr) -> Self {
        self.formula = Some(formula);
        self
    }

    pub fn build(&self) -> Result<GenericReduction, Error> {
        let Some(ref reduction_name) = self.reduction_name else {
            return Err(Error::configuration("the reduction name must be specified"));
        };
        let Some(ref formula) = self.formula else {
            return Err(Error::configuration("the formula must be specified"));
        };
        let k = match self.k {
            None => None,
            Some(k) => match NonZeroUsize::new(k) {
                Some(k) => Some(k),
                None => return Err(Error::integer_range("K", 0, 1, i64::MAX)),
            },
        };
        let axis = self.axis.unwrap_or(ReductionAxis::OverJ);

        let config = Config {
            reduction_name: reduction_name.clone(),
            k,
            formula_dim: formula.dim(),
        };
        let wrapped_reducer = wrapped_reducer_from_config(&config)?;
        let compiled = CompiledFormula::new(formula, axis)?;
        Ok(GenericReduction {
            config,
            axis,
            formula: formula.clone(),
            compiled,
            wrapped_reducer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Category, Var};
    use crate::status;
    use ndarray::{Array2, array};

    fn x_minus_y() -> Expr {
        let x = Expr::var(Var::new(0, 1, Category::I).unwrap());
        let y = Expr::var(Var::new(1, 1, Category::J).unwrap());
        x.sub(&y).unwrap()
    }

    #[test]
    fn builder_errors() {
        let err = ReductionBuilder::new()
            .formula(x_minus_y())
            .build()
            .unwrap_err();
        assert_eq!(err.status_code(), status::CONFIGURATION);

        let err = ReductionBuilder::new().reduction("Sum").build().unwrap_err();
        assert_eq!(err.status_code(), status::CONFIGURATION);

        let err = ReductionBuilder::new()
            .reduction("ArgKMin")
            .k(0)
            .formula(x_minus_y())
            .build()
            .unwrap_err();
        assert_eq!(err.status_code(), status::CONFIGURATION);

        let reduction = ReductionBuilder::new()
            .reduction("KMinArgKMin")
            .k(4)
            .formula(x_minus_y())
            .build()
            .unwrap();
        assert_eq!(reduction.k(), Some(4));
        assert_eq!(reduction.output_dim(), 8);
        assert_eq!(reduction.axis(), ReductionAxis::OverJ);
    }

    #[test]
    fn output_shape_check() {
        let reduction = ReductionBuilder::new()
            .reduction("MinArgMin")
            .axis(ReductionAxis::OverI)
            .formula(x_minus_y())
            .build()
            .unwrap();
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![[0.0], [5.0]];
        let inputs = PairInputs::new(3, 2).with(0, x.view()).with(1, y.view());
        assert_eq!(reduction.output_shape(&inputs).unwrap(), (2, 2));

        let mut wrong = Array2::<f64>::from_elem((3, 2), -7.0);
        let result = reduction.exec(&inputs, None, &mut wrong.view_mut(), &RuntimeSpec::serial());
        assert_eq!(crate::status_of(&result), status::CONFIGURATION);
        // nothing was written
        assert!(wrong.iter().all(|v| *v == -7.0));

        let mut out = Array2::<f64>::zeros((2, 2));
        reduction
            .exec(&inputs, None, &mut out.view_mut(), &RuntimeSpec::serial())
            .unwrap();
        // min over i of (x_i - y_j)
        assert_eq!(out, array![[1.0, 0.0], [-4.0, 0.0]]);
    }
}
