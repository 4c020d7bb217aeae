use crate::Error;
use crate::executor::{Executor, build_schedule, check_output_len, split_output, try_alloc_f64};
use crate::runtime::ExecParams;
use log::debug;
use pairreduce_nostd_internal::{BlockedReduction, PairFormula, TeamScratchLayout, fill_row_block};

/// Carries out every row block, one after the other, on the calling thread
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialExecutor;

impl Executor for SerialExecutor {
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
        debug!(
            "serial executor: {} row blocks, tile_len = {}",
            blocks.len(),
            team_param.tile_len
        );
        if blocks.is_empty() {
            return Ok(());
        }

        let layout = TeamScratchLayout::new(reduction, &team_param);
        let mut scratch = try_alloc_f64(layout.total_len(), "team scratch buffer")?;
        for (block, out_chunk) in split_output(reduction, &blocks, out) {
            fill_row_block(reduction, &team_param, &block, &mut scratch, out_chunk);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairreduce_nostd_internal::{ClosureFormula, DenseReduction, MinArgMin, Sum};
    use std::num::NonZeroUsize;

    #[test]
    fn dense_sum() {
        let x = [0.0, 1.0];
        let y = [10.0, 20.0, 30.0];
        let formula =
            ClosureFormula::new(1, &x, 1, 2, &y, 1, 3, |out, _x, y| out[0] = y[0]).unwrap();
        let reducer = Sum::new(NonZeroUsize::MIN);
        let reduction = DenseReduction::new(&reducer, &formula, 1, 2, 3).unwrap();
        let mut out = [0.0; 2];
        SerialExecutor
            .drive_reduction(&reduction, &ExecParams::default(), &mut out)
            .unwrap();
        assert_eq!(out, [60.0, 60.0]);
    }

    #[test]
    fn many_small_blocks() {
        // 2 batches, 5 outer rows & 4 inner indices per batch
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = (0..8).map(|j| (j % 3) as f64).collect();
        let formula =
            ClosureFormula::new(1, &x, 1, 5, &y, 1, 4, |out, x, y| out[0] = (x[0] - y[0]).abs())
                .unwrap();
        let reducer = MinArgMin::new(NonZeroUsize::MIN);
        let reduction = DenseReduction::new(&reducer, &formula, 2, 5, 4).unwrap();

        let mut reference = vec![0.0; 20];
        SerialExecutor
            .drive_reduction(&reduction, &ExecParams::default(), &mut reference)
            .unwrap();
        // batch 0, row 1: |1 - [0,1,2,0]| -> min 0 at index 1
        assert_eq!(&reference[2..4], &[0.0, 1.0]);
        // batch 1, row 0 (x = 5): |5 - [1,2,0,1]| -> min 3 at index 1
        assert_eq!(&reference[10..12], &[3.0, 1.0]);

        let params = ExecParams {
            rows_per_team: NonZeroUsize::new(2).unwrap(),
            tile_len: NonZeroUsize::new(3).unwrap(),
            inner_splits: NonZeroUsize::new(2).unwrap(),
            tile_bytes: None,
        };
        let mut out = vec![0.0; 20];
        SerialExecutor
            .drive_reduction(&reduction, &params, &mut out)
            .unwrap();
        assert_eq!(out, reference);
    }
}
