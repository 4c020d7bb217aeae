//! This module introduces the machinery to wrap the various types that
//! implement [`Reducer`] in a uniform manner and enable runtime polymorphism.
//! This machinery is primarily used to implement [`crate::GenericReduction`].
//!
//! Like the rest of the crate, we use dynamic dispatch. The generic code
//! paths (the blocked reductions and the executors) get monomorphized once
//! per reducer type inside of [`WrappedReducer::exec_reduction`].

use crate::{
    Error,
    compiled::BoundFormula,
    reducers::{LogSumExp, SumSoftMaxWeight},
    runtime::RuntimeSpec,
};
use pairreduce_nostd_internal::{
    ArgKMax, ArgKMin, ArgMax, ArgMin, DenseReduction, KMin, KMinArgKMin, Max, MaxArgMax, Min,
    MinArgMin, RangeView, RangedReduction, Reducer, Sum, Zero,
};
use std::{collections::HashMap, num::NonZeroUsize, sync::LazyLock};

/// The configuration of a reduction.
///
/// This is the "single source of truth" for the reduction properties. It's
/// stored alongside the [`WrappedReducer`] that was built from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Config {
    pub(crate) reduction_name: String,
    // only meaningful for the K-variants
    pub(crate) k: Option<NonZeroUsize>,
    pub(crate) formula_dim: usize,
}

/// Describes the extent of a single evaluation
#[derive(Clone, Copy, Debug)]
pub(crate) struct Job<'a> {
    pub(crate) n_batches: usize,
    pub(crate) n_outer: usize,
    pub(crate) n_inner: usize,
    /// `None` means dense evaluation
    pub(crate) ranges: Option<RangeView<'a>>,
}

/// Wraps a function pointer that constructs a boxed [`WrappedReducer`] trait
/// object.
struct MkWrappedReducerFn(fn(&Config) -> Result<Box<dyn WrappedReducer>, Error>);

fn formula_dim(c: &Config) -> Result<NonZeroUsize, Error> {
    NonZeroUsize::new(c.formula_dim)
        .ok_or_else(|| Error::configuration("a formula must produce at least 1 value"))
}

fn forbid_k(c: &Config) -> Result<(), Error> {
    if c.k.is_some() {
        Err(Error::configuration(format!(
            "the \"{}\" reduction doesn't accept a K parameter",
            c.reduction_name
        )))
    } else {
        Ok(())
    }
}

fn require_k(c: &Config) -> Result<NonZeroUsize, Error> {
    c.k.ok_or_else(|| {
        Error::configuration(format!(
            "the \"{}\" reduction requires a K parameter",
            c.reduction_name
        ))
    })
}

fn boxed<R: Reducer + Send + Sync + 'static>(reducer: R) -> Box<dyn WrappedReducer> {
    Box::new(WrappedReducerImpl { reducer })
}

/// returns a hashmap, where keys map the names of reductions to functions
/// that construct the appropriate boxed [`WrappedReducer`] trait objects.
fn build_registry() -> HashMap<String, MkWrappedReducerFn> {
    let out: HashMap<String, MkWrappedReducerFn> = HashMap::from([
        // --------------------
        // summation reductions
        // --------------------
        (
            "Sum".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                forbid_k(c)?;
                Ok(boxed(Sum::new(formula_dim(c)?)))
            }),
        ),
        (
            "LogSumExp".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                forbid_k(c)?;
                Ok(boxed(LogSumExp::new(formula_dim(c)?)))
            }),
        ),
        (
            "SumSoftMaxWeight".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                forbid_k(c)?;
                let reducer = SumSoftMaxWeight::new(c.formula_dim).map_err(Error::configuration)?;
                Ok(boxed(reducer))
            }),
        ),
        (
            "Zero".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                forbid_k(c)?;
                Ok(boxed(Zero::new(formula_dim(c)?)))
            }),
        ),
        // -----------------------------------
        // order-statistic reductions (K = 1)
        // -----------------------------------
        (
            "Min".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                forbid_k(c)?;
                Ok(boxed(Min::new(formula_dim(c)?)))
            }),
        ),
        (
            "Max".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                forbid_k(c)?;
                Ok(boxed(Max::new(formula_dim(c)?)))
            }),
        ),
        (
            "ArgMin".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                forbid_k(c)?;
                Ok(boxed(ArgMin::new(formula_dim(c)?)))
            }),
        ),
        (
            "ArgMax".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                forbid_k(c)?;
                Ok(boxed(ArgMax::new(formula_dim(c)?)))
            }),
        ),
        (
            "MinArgMin".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                forbid_k(c)?;
                Ok(boxed(MinArgMin::new(formula_dim(c)?)))
            }),
        ),
        (
            "MaxArgMax".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                forbid_k(c)?;
                Ok(boxed(MaxArgMax::new(formula_dim(c)?)))
            }),
        ),
        // ---------------------------------
        // order-statistic reductions (K > 1)
        // ---------------------------------
        (
            "KMin".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                Ok(boxed(KMin::with_k(formula_dim(c)?, require_k(c)?)))
            }),
        ),
        (
            "ArgKMin".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                Ok(boxed(ArgKMin::with_k(formula_dim(c)?, require_k(c)?)))
            }),
        ),
        (
            "KMinArgKMin".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                Ok(boxed(KMinArgKMin::with_k(formula_dim(c)?, require_k(c)?)))
            }),
        ),
        (
            "ArgKMax".to_owned(),
            MkWrappedReducerFn(|c: &Config| -> Result<Box<dyn WrappedReducer>, Error> {
                Ok(boxed(ArgKMax::with_k(formula_dim(c)?, require_k(c)?)))
            }),
        ),
    ]);
    out
}

/// global variable that holds a registry of the reductions that the crate
/// supports.
///
/// This variable is lazily initialized, in a threadsafe manner, using the
/// [`build_registry`] function.
static REDUCER_MAKER_REGISTRY: LazyLock<HashMap<String, MkWrappedReducerFn>> =
    LazyLock::new(build_registry);

/// constructs the appropriate [`WrappedReducer`] trait object that
/// corresponds to the specified configuration
pub(crate) fn wrapped_reducer_from_config(
    config: &Config,
) -> Result<Box<dyn WrappedReducer>, Error> {
    let name = &config.reduction_name;
    if let Some(func) = REDUCER_MAKER_REGISTRY.get(name) {
        func.0(config)
    } else {
        Err(Error::reduction_name(
            name.clone(),
            REDUCER_MAKER_REGISTRY.keys().cloned().collect(),
        ))
    }
}

/// A trait that wraps a [`Reducer`] type in order to support dynamic
/// dispatch.
pub(crate) trait WrappedReducer: Send + Sync {
    /// the width of a single output row
    fn output_dim(&self) -> usize;

    fn accum_state_size(&self) -> usize;

    /// Executes the reduction described by `job` and writes every output row
    /// to `out` (rows are ordered by `(batch, outer_index)`).
    ///
    /// At a high-level, one might ask why this is a method of the wrapped
    /// reducer. The answer: the generic machinery needs the concrete reducer
    /// type, and this is the only place that knows it.
    fn exec_reduction(
        &self,
        formula: &BoundFormula,
        job: &Job,
        runtime: &RuntimeSpec,
        out: &mut [f64],
    ) -> Result<(), Error>;
}

struct WrappedReducerImpl<R: Reducer + Send + Sync> {
    reducer: R,
}

impl<R: Reducer + Send + Sync> WrappedReducer for WrappedReducerImpl<R> {
    fn output_dim(&self) -> usize {
        self.reducer.output_dim()
    }

    fn accum_state_size(&self) -> usize {
        self.reducer.accum_state_size()
    }

    fn exec_reduction(
        &self,
        formula: &BoundFormula,
        job: &Job,
        runtime: &RuntimeSpec,
        out: &mut [f64],
    ) -> Result<(), Error> {
        match job.ranges {
            None => {
                let reduction = DenseReduction::new(
                    &self.reducer,
                    formula,
                    job.n_batches,
                    job.n_outer,
                    job.n_inner,
                )
                .map_err(Error::internal_legacy_adhoc)?;
                runtime.drive(&reduction, out)
            }
            Some(ranges) => {
                let reduction = RangedReduction::new(
                    &self.reducer,
                    formula,
                    job.n_batches,
                    job.n_outer,
                    job.n_inner,
                    ranges,
                )
                .map_err(Error::internal_legacy_adhoc)?;
                runtime.drive(&reduction, out)
            }
        }
    }
}
