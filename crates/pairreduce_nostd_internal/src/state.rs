//! Introduces the [`AccumStateView`] and [`AccumStateViewMut`] types, along
//! with the [`StatePackView`] and [`StatePackViewMut`] collections.
//!
//! An `accum_state` is the fixed-width scratch buffer (the "accumulator")
//! that a [`crate::Reducer`] folds pairwise formula values into. Within the
//! blocked evaluators, each outer-index row that a team is responsible for
//! owns exactly one `accum_state` inside of a statepack.
//!
//! # Why do we need separate types to represent immutable & mutable views?
//!
//! The short version: a statepack stores its accumulator states in an
//! interleaved manner, so a single `accum_state` is *not* a contiguous
//! chunk of memory. We can't hand out `&[f64]`/`&mut [f64]` for a single
//! state, and we can't define our own dynamically sized type that wraps a
//! strided region. Instead, we construct a lightweight view-type on demand,
//! and we need a mutable and an immutable flavor of it to model lifetimes
//! properly.
use crate::misc::View2DSpec;
use core::{
    num::NonZeroUsize,
    ops::{Index, IndexMut},
};

pub struct AccumStateView<'a> {
    len: NonZeroUsize,
    stride: usize,
    data: &'a [f64],
}

impl<'a> AccumStateView<'a> {
    /// Private constructor used by other types in this module
    fn internal_new(len: NonZeroUsize, stride: usize, data: &'a [f64]) -> Self {
        debug_assert!(((len.get() - 1) * stride) < data.len());
        Self { len, stride, data }
    }

    // consider returning an option rather than panicing
    pub fn from_contiguous_slice(data: &'a [f64]) -> Self {
        let Some(len) = NonZeroUsize::new(data.len()) else {
            panic!("can't construct an empty AccumStateView");
        };
        Self {
            len,
            stride: 1,
            data,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.get()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl<'a> Index<usize> for AccumStateView<'a> {
    type Output = f64;

    #[inline(always)]
    fn index(&self, index: usize) -> &Self::Output {
        debug_assert!(index < self.len.get());
        self.data.index(index * self.stride)
    }
}

pub struct AccumStateViewMut<'a> {
    len: NonZeroUsize,
    stride: usize,
    data: &'a mut [f64],
}

impl<'a> AccumStateViewMut<'a> {
    /// Private constructor used by other types in this module
    fn internal_new(len: NonZeroUsize, stride: usize, data: &'a mut [f64]) -> Self {
        debug_assert!(((len.get() - 1) * stride) < data.len());
        Self { len, stride, data }
    }

    // consider returning an option rather than panicing
    pub fn from_contiguous_slice(data: &'a mut [f64]) -> Self {
        let Some(len) = NonZeroUsize::new(data.len()) else {
            panic!("can't construct an empty AccumStateViewMut");
        };
        let stride = 1;
        Self { len, stride, data }
    }

    /// overwrite every element of the `accum_state` with `val`
    ///
    /// Elements of other states interleaved with this one are untouched.
    pub fn fill(&mut self, val: f64) {
        for i in 0..self.len.get() {
            self.data[i * self.stride] = val;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.get()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl<'a> Index<usize> for AccumStateViewMut<'a> {
    type Output = f64;

    #[inline(always)]
    fn index(&self, index: usize) -> &Self::Output {
        debug_assert!(index < self.len.get());
        self.data.index(index * self.stride)
    }
}

impl<'a> IndexMut<usize> for AccumStateViewMut<'a> {
    #[inline(always)]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        debug_assert!(index < self.len.get());
        self.data.index_mut(index * self.stride)
    }
}

/// Represents a read-only Collection of accumulator states
pub struct StatePackView<'a> {
    data: &'a [f64],
    idx_spec: View2DSpec,
}

impl<'a> StatePackView<'a> {
    pub fn from_slice(n_states: usize, state_size: usize, data: &'a [f64]) -> Self {
        assert!(n_states > 0);
        assert!(state_size > 0);
        let Ok(idx_spec) = View2DSpec::from_shape_contiguous([state_size, n_states]) else {
            unreachable!("the shape was already checked");
        };
        if idx_spec.required_length() > data.len() {
            panic!("data doesn't hold the appropriate number of elements");
        }
        Self { data, idx_spec }
    }

    #[inline]
    pub fn get_state(&self, i: usize) -> AccumStateView<'_> {
        assert!(i < self.n_states());
        let start = self.idx_spec.map_idx2d_to_1d(0, i);
        AccumStateView::internal_new(
            self.state_size_nonzero(),
            self.idx_spec.strides()[0],
            &self.data[start..],
        )
    }

    #[inline]
    fn state_size_nonzero(&self) -> NonZeroUsize {
        // the constructor forbids a state_size of 0
        NonZeroUsize::MIN.saturating_add(self.state_size() - 1)
    }

    #[inline]
    pub fn state_size(&self) -> usize {
        self.idx_spec.shape()[0]
    }

    #[inline]
    pub fn n_states(&self) -> usize {
        self.idx_spec.shape()[1]
    }
}

/// Represents a collection of accumulator states
///
/// Within the blocked evaluators, a statepack holds one accumulator state
/// per outer-index row handled by a team.
///
/// # Data Representation
/// This type stores accumulator states in an interleaved manner. In other
/// words, the data associated with an [`AccumStateView`] instance returned by
/// [`Self::get_state`] cannot be contiguous unless [`Self::n_states`] returns
/// `1`. The element `k` of every state in the pack is adjacent in memory,
/// which is the layout that lends itself to SIMD (on CPUs) or coalesced
/// memory access (on GPUs) when many rows are folded in lockstep.
pub struct StatePackViewMut<'a> {
    data: &'a mut [f64],
    idx_spec: View2DSpec,
}

impl<'a> StatePackViewMut<'a> {
    pub fn from_slice(n_states: usize, state_size: usize, data: &'a mut [f64]) -> Self {
        assert!(n_states > 0);
        assert!(state_size > 0);
        let Ok(idx_spec) = View2DSpec::from_shape_contiguous([state_size, n_states]) else {
            unreachable!("the shape was already checked");
        };
        if idx_spec.required_length() > data.len() {
            panic!("data doesn't hold the appropriate number of elements");
        }
        Self { data, idx_spec }
    }

    pub fn as_view<'b>(&'b self) -> StatePackView<'b> {
        StatePackView {
            data: self.data,
            idx_spec: self.idx_spec.clone(),
        }
    }

    #[inline]
    pub fn get_state(&self, i: usize) -> AccumStateView<'_> {
        assert!(i < self.n_states());
        let start = self.idx_spec.map_idx2d_to_1d(0, i);
        AccumStateView::internal_new(
            self.state_size_nonzero(),
            self.idx_spec.strides()[0],
            &self.data[start..],
        )
    }

    #[inline]
    pub fn get_state_mut(&mut self, i: usize) -> AccumStateViewMut<'_> {
        assert!(i < self.n_states());
        let start = self.idx_spec.map_idx2d_to_1d(0, i);
        AccumStateViewMut::internal_new(
            self.state_size_nonzero(),
            self.idx_spec.strides()[0],
            &mut self.data[start..],
        )
    }

    #[inline]
    fn state_size_nonzero(&self) -> NonZeroUsize {
        // the constructor forbids a state_size of 0
        NonZeroUsize::MIN.saturating_add(self.state_size() - 1)
    }

    #[inline]
    pub fn state_size(&self) -> usize {
        self.idx_spec.shape()[0]
    }

    #[inline]
    pub fn n_states(&self) -> usize {
        self.idx_spec.shape()[1]
    }

    pub fn total_size(&self) -> usize {
        self.state_size() * self.n_states()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_layout() {
        // 3 states, each with 2 elements
        let mut storage = [0.0; 6];
        let mut pack = StatePackViewMut::from_slice(3, 2, &mut storage);
        assert_eq!(pack.total_size(), 6);
        for i in 0..3 {
            let mut state = pack.get_state_mut(i);
            state[0] = i as f64;
            state[1] = 10.0 + i as f64;
        }
        assert_eq!(storage, [0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn fill_only_touches_one_state() {
        let mut storage = [0.0; 6];
        let mut pack = StatePackViewMut::from_slice(3, 2, &mut storage);
        pack.get_state_mut(1).fill(7.0);
        let view = pack.as_view();
        assert_eq!(view.get_state(0)[1], 0.0);
        assert_eq!(view.get_state(1)[0], 7.0);
        assert_eq!(view.get_state(1)[1], 7.0);
        assert_eq!(view.get_state(2)[0], 0.0);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_state() {
        let mut storage = [0.0; 4];
        let pack = StatePackViewMut::from_slice(2, 2, &mut storage);
        let _ = pack.get_state(2);
    }
}
