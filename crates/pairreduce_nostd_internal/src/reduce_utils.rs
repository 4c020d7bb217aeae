// this defines some basic utilities used in reductions.
// it's unclear if we want these things to be part of the public API.
// But, as we implement the evaluators and executors, these are quite useful

use crate::reducer::Reducer;
use crate::state::StatePackViewMut;

pub fn reset_full_statepack(reducer: &impl Reducer, statepack: &mut StatePackViewMut) {
    for i in 0..statepack.n_states() {
        reducer.init_accum_state(&mut statepack.get_state_mut(i));
    }
}

// ideally, other would be more clearly immutable, but I don't think we want to
// introduce another type just for this 1 case
pub fn merge_full_statepacks(
    reducer: &impl Reducer,
    statepack: &mut StatePackViewMut,
    other: &StatePackViewMut,
) {
    assert_eq!(statepack.n_states(), other.n_states());
    for i in 0..statepack.n_states() {
        reducer.merge(&mut statepack.get_state_mut(i), &other.get_state(i));
    }
}

/// Consolidates `n_packs` equally sized statepacks, stored back to back in
/// `packs`, so that the first statepack holds the merged result. Each
/// statepack holds `n_states` states of `reducer.accum_state_size()`
/// elements.
///
/// The merge proceeds as a tree: in each round the upper half of the live
/// statepacks gets merged into the lower half. The order of merges depends
/// only on `n_packs`, which keeps the result reproducible. The contents of
/// the other statepacks are unspecified afterwards.
pub fn tree_merge_statepacks(
    reducer: &impl Reducer,
    packs: &mut [f64],
    n_packs: usize,
    n_states: usize,
) {
    let pack_len = n_states * reducer.accum_state_size();
    assert!(packs.len() >= n_packs * pack_len);
    let mut n_live = n_packs;
    while n_live > 1 {
        let half = n_live.div_ceil(2);
        // packs [half, n_live) get merged into packs [0, n_live - half)
        let (lower, upper) = packs.split_at_mut(half * pack_len);
        for i in 0..(n_live - half) {
            let mut dst = StatePackViewMut::from_slice(
                n_states,
                reducer.accum_state_size(),
                &mut lower[i * pack_len..(i + 1) * pack_len],
            );
            let src = StatePackViewMut::from_slice(
                n_states,
                reducer.accum_state_size(),
                &mut upper[i * pack_len..(i + 1) * pack_len],
            );
            merge_full_statepacks(reducer, &mut dst, &src);
        }
        n_live = half;
    }
}
