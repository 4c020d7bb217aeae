use crate::Error;
use crate::executor::{Executor, build_schedule, check_output_len, split_output, try_alloc_f64};
use crate::runtime::ExecParams;
use log::debug;
use pairreduce_nostd_internal::{
    BlockedReduction, PairFormula, TeamScratchLayout, even_partition, fill_row_block,
};
use rayon::prelude::*;

/// Distributes row blocks across the threads of a rayon thread pool
///
/// Each thread acts as a single team: it owns a scratch buffer and handles a
/// contiguous run of row blocks. Since every block writes to a disjoint region
/// of the output, the threads never need to synchronize with each other.
pub struct ThreadPoolExecutor<'p> {
    pool: &'p rayon::ThreadPool,
}

impl<'p> ThreadPoolExecutor<'p> {
    pub fn new(pool: &'p rayon::ThreadPool) -> Self {
        Self { pool }
    }
}

impl<'p> Executor for ThreadPoolExecutor<'p> {
    fn drive_reduction<B>(
        &mut self,
        reduction: &B,
        params: &ExecParams,
        out: &mut [f64],
    ) -> Result<(), Error>
    where
        B: BlockedReduction + Sync,
    {
        check_output_len(reduction, out)?;
        let team_param = params.team_param(reduction.get_formula().inner_stage_len());
        let blocks = build_schedule(reduction, team_param.rows_per_team.get());
        if blocks.is_empty() {
            return Ok(());
        }
        let n_teams = self.pool.current_num_threads().clamp(1, blocks.len());
        debug!(
            "thread-pool executor: {} row blocks distributed across {} teams",
            blocks.len(),
            n_teams
        );

        let scratch_len = TeamScratchLayout::new(reduction, &team_param).total_len();
        let mut scratch = try_alloc_f64(n_teams * scratch_len, "team scratch buffers")?;

        // hand each team a contiguous run of blocks
        let mut work = split_output(reduction, &blocks, out).into_iter();
        let mut assignments = Vec::with_capacity(n_teams);
        for team in 0..n_teams {
            let (start, stop) = even_partition(blocks.len(), n_teams, team);
            assignments.push(work.by_ref().take(stop - start).collect::<Vec<_>>());
        }

        self.pool.install(|| {
            assignments
                .into_par_iter()
                .zip(scratch.par_chunks_mut(scratch_len))
                .for_each(|(assignment, team_scratch)| {
                    for (block, out_chunk) in assignment {
                        fill_row_block(reduction, &team_param, &block, team_scratch, out_chunk);
                    }
                });
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel_serial::SerialExecutor;
    use pairreduce_nostd_internal::{ClosureFormula, DenseReduction, Sum};
    use std::num::NonZeroUsize;

    #[test]
    fn matches_serial() {
        let x: Vec<f64> = (0..37).map(|i| (i as f64) * 0.37).collect();
        let y: Vec<f64> = (0..53).map(|j| (j as f64).sin()).collect();
        let formula =
            ClosureFormula::new(1, &x, 1, 37, &y, 1, 53, |out, x, y| out[0] = (x[0] * y[0]).exp())
                .unwrap();
        let reducer = Sum::new(NonZeroUsize::MIN);
        let reduction = DenseReduction::new(&reducer, &formula, 1, 37, 53).unwrap();
        let params = ExecParams {
            rows_per_team: NonZeroUsize::new(4).unwrap(),
            tile_len: NonZeroUsize::new(16).unwrap(),
            inner_splits: NonZeroUsize::new(3).unwrap(),
            tile_bytes: None,
        };

        let mut reference = vec![0.0; 37];
        SerialExecutor
            .drive_reduction(&reduction, &params, &mut reference)
            .unwrap();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(3)
            .build()
            .unwrap();
        let mut out = vec![0.0; 37];
        ThreadPoolExecutor::new(&pool)
            .drive_reduction(&reduction, &params, &mut out)
            .unwrap();
        // bitwise identical
        assert_eq!(out, reference);
    }
}
