//! Machinery shared by all executors.
//!
//! An executor is responsible for carrying out a [`BlockedReduction`]. Every
//! executor decomposes the reduction into the same list of [`RowBlock`]s
//! (see [`build_schedule`]) and fills each block with
//! [`fill_row_block`](pairreduce_nostd_internal::fill_row_block). Because a
//! block's result only depends on the block itself and the [`TeamParam`],
//! executors differ only in where and when blocks get computed.
//!
//! [`TeamParam`]: pairreduce_nostd_internal::TeamParam

use crate::Error;
use crate::runtime::ExecParams;
use pairreduce_nostd_internal::{BlockedReduction, Reducer, RowBlock};

pub trait Executor {
    /// Fill `out` with the output of every outer index of every batch.
    ///
    /// `out` is a row-major buffer with rows ordered by
    /// `(batch, outer_index)`. Each row is `output_dim` wide.
    fn drive_reduction<B>(
        &mut self,
        reduction: &B,
        params: &ExecParams,
        out: &mut [f64],
    ) -> Result<(), Error>
    where
        B: BlockedReduction + Sync;
}

pub(crate) fn check_output_len(reduction: &impl BlockedReduction, out: &[f64]) -> Result<(), Error> {
    let expected =
        reduction.n_batches() * reduction.n_outer() * reduction.get_reducer().output_dim();
    if out.len() != expected {
        Err(Error::configuration(format!(
            "the output buffer holds {} elements, but {expected} are required",
            out.len()
        )))
    } else {
        Ok(())
    }
}

/// Allocate a zeroed buffer without aborting when memory is exhausted
pub(crate) fn try_alloc_f64(len: usize, who: &'static str) -> Result<Vec<f64>, Error> {
    let n_bytes = len.saturating_mul(std::mem::size_of::<f64>());
    let mut buf: Vec<f64> = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::resource(who, n_bytes))?;
    buf.resize(len, 0.0);
    Ok(buf)
}

fn push_chunks<'a>(
    blocks: &mut Vec<RowBlock<'a>>,
    batch: usize,
    (start, stop): (usize, usize),
    intervals: &'a [[usize; 2]],
    rows_per_team: usize,
) {
    let mut outer_start = start;
    while outer_start < stop {
        let outer_stop = stop.min(outer_start + rows_per_team);
        blocks.push(RowBlock {
            batch,
            outer_start,
            outer_stop,
            intervals,
        });
        outer_start = outer_stop;
    }
}

/// Decompose a reduction into row blocks.
///
/// The blocks are ordered by `(batch, outer_start)` and tile the full range
/// of outer indices of every batch without gaps. Outer indices that aren't
/// covered by any outer slice get blocks with no inner intervals.
pub(crate) fn build_schedule<B: BlockedReduction>(
    reduction: &B,
    rows_per_team: usize,
) -> Vec<RowBlock<'_>> {
    let n_outer = reduction.n_outer();
    let mut slices: Vec<usize> = (0..reduction.n_slices())
        .filter(|&s| {
            let (start, stop) = reduction.slice_outer_bounds(s);
            start < stop
        })
        .collect();
    slices.sort_by_key(|&s| reduction.slice_outer_bounds(s).0);

    let mut blocks = Vec::new();
    for batch in 0..reduction.n_batches() {
        let mut cursor = 0;
        for &s in &slices {
            let (start, stop) = reduction.slice_outer_bounds(s);
            push_chunks(&mut blocks, batch, (cursor, start), &[], rows_per_team);
            push_chunks(
                &mut blocks,
                batch,
                (start, stop),
                reduction.slice_inner_intervals(s),
                rows_per_team,
            );
            cursor = stop;
        }
        push_chunks(&mut blocks, batch, (cursor, n_outer), &[], rows_per_team);
    }
    blocks
}

/// Pair every block with the region of `out` that it fills
///
/// This relies upon the blocks tiling the output in order (as produced by
/// [`build_schedule`]).
pub(crate) fn split_output<'o, 'b>(
    reduction: &impl BlockedReduction,
    blocks: &[RowBlock<'b>],
    out: &'o mut [f64],
) -> Vec<(RowBlock<'b>, &'o mut [f64])> {
    let output_dim = reduction.get_reducer().output_dim();
    let mut rest = out;
    let mut pairs = Vec::with_capacity(blocks.len());
    for block in blocks {
        let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(block.n_rows() * output_dim);
        pairs.push((*block, chunk));
        rest = tail;
    }
    pairs
}
