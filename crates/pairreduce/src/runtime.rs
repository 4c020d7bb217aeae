//! Runtime configuration: which backend carries out a reduction, and the
//! parameters controlling how the work gets decomposed.
//!
//! These are deliberately separate from the description of the reduction
//! itself ([`crate::ReductionBuilder`]). The same reduction can be evaluated
//! with any backend, and the results are bitwise identical for a given
//! [`ExecParams`].

use crate::Error;
use crate::device::{DeviceContext, DeviceExecutor};
use crate::executor::Executor;
use crate::parallel_rayon::ThreadPoolExecutor;
use crate::parallel_serial::SerialExecutor;
use log::debug;
use pairreduce_nostd_internal::{BlockedReduction, TeamParam};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Parameters that control how a reduction is decomposed into units of work
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecParams {
    /// the max number of outer rows handled by a team at once
    pub rows_per_team: NonZeroUsize,
    /// the max number of inner indices per tile
    pub tile_len: NonZeroUsize,
    /// the number of pieces each inner interval is split into. Each piece is
    /// folded separately, and the partial results are merged afterwards.
    ///
    /// Changing this value may change the floating-point results of sums
    /// (the order of additions changes).
    pub inner_splits: NonZeroUsize,
    /// When specified, tiles are shrunk so that the staged inner data of a
    /// tile doesn't exceed this many bytes.
    pub tile_bytes: Option<NonZeroUsize>,
}

impl Default for ExecParams {
    fn default() -> Self {
        ExecParams {
            rows_per_team: TeamParam::DEFAULT_ROWS_PER_TEAM,
            tile_len: TeamParam::DEFAULT_TILE_LEN,
            inner_splits: NonZeroUsize::MIN,
            // roughly the size of an L1 data cache
            tile_bytes: NonZeroUsize::new(32 * 1024),
        }
    }
}

impl ExecParams {
    /// Derive the parameters for a team, given the number of f64 elements
    /// staged per inner index
    pub fn team_param(&self, inner_stage_len: usize) -> TeamParam {
        let tile_len = match self.tile_bytes {
            Some(bytes) => {
                let per_index = std::mem::size_of::<f64>() * inner_stage_len.max(1);
                let fitting = NonZeroUsize::new(bytes.get() / per_index).unwrap_or(NonZeroUsize::MIN);
                fitting.min(self.tile_len)
            }
            None => self.tile_len,
        };
        TeamParam {
            rows_per_team: self.rows_per_team,
            tile_len,
            inner_splits: self.inner_splits,
        }
    }
}

/// The backend that carries out the work
#[derive(Clone)]
pub enum Backend {
    /// everything runs on the calling thread
    Serial,
    /// units of work are distributed across a rayon thread pool
    ThreadPool(Arc<rayon::ThreadPool>),
    /// the work runs on a device, with working memory in device buffers
    Device(Arc<dyn DeviceContext>),
}

impl core::fmt::Debug for Backend {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Backend::Serial => write!(f, "Serial"),
            Backend::ThreadPool(pool) => {
                write!(f, "ThreadPool(n_threads={})", pool.current_num_threads())
            }
            Backend::Device(ctx) => write!(f, "Device({})", ctx.name()),
        }
    }
}

/// Specifies how (and where) a reduction gets evaluated
#[derive(Clone, Debug)]
pub struct RuntimeSpec {
    backend: Backend,
    params: ExecParams,
}

impl Default for RuntimeSpec {
    fn default() -> Self {
        RuntimeSpec::serial()
    }
}

impl RuntimeSpec {
    pub fn serial() -> Self {
        RuntimeSpec {
            backend: Backend::Serial,
            params: ExecParams::default(),
        }
    }

    /// Use a dedicated thread pool with `n_threads` threads. When
    /// `n_threads` is 0, rayon picks the number of threads.
    pub fn thread_pool(n_threads: usize) -> Result<Self, Error> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|idx| format!("pairreduce-{idx}"))
            .build()
            .map_err(|_| Error::resource("thread pool", 0))?;
        debug!(
            "built a thread pool with {} threads",
            pool.current_num_threads()
        );
        Ok(RuntimeSpec {
            backend: Backend::ThreadPool(Arc::new(pool)),
            params: ExecParams::default(),
        })
    }

    pub fn device(ctx: Arc<dyn DeviceContext>) -> Self {
        RuntimeSpec {
            backend: Backend::Device(ctx),
            params: ExecParams::default(),
        }
    }

    pub fn with_params(mut self, params: ExecParams) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> &ExecParams {
        &self.params
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// dispatch the reduction to the executor of the configured backend
    pub(crate) fn drive<B>(&self, reduction: &B, out: &mut [f64]) -> Result<(), Error>
    where
        B: BlockedReduction + Sync,
    {
        match &self.backend {
            Backend::Serial => SerialExecutor.drive_reduction(reduction, &self.params, out),
            Backend::ThreadPool(pool) => {
                ThreadPoolExecutor::new(pool).drive_reduction(reduction, &self.params, out)
            }
            Backend::Device(ctx) => {
                DeviceExecutor::new(ctx.as_ref()).drive_reduction(reduction, &self.params, out)
            }
        }
    }
}
