//! Input arrays for the evaluators.
//!
//! Every variable referenced by a formula is backed by a 2D array with one
//! row per vector. For a variable of category `I` (`J`), an unbatched array
//! has `nx` (`ny`) rows, while a parameter array has a single row.
//!
//! # Batch dimensions
//!
//! An array may also carry a *batch shape*. In that case, it holds
//! `prod(batch_shape)` consecutive groups of rows (the batch index varies
//! slowest). The batch shapes of all arrays are broadcast against each other
//! following the numpy rules: the shapes are right-aligned (shorter shapes
//! are padded with leading 1s), and along each axis the sizes must either
//! agree or be 1. An array whose batch size is 1 along some axis is shared by
//! every batch along that axis.

use crate::Error;
use crate::misc::shape_len;
use ndarray::ArrayView2;
use std::collections::BTreeMap;

/// An input array and its batch shape
#[derive(Clone, Debug)]
pub struct VarArray<'a> {
    data: ArrayView2<'a, f64>,
    batch_shape: Vec<usize>,
}

impl<'a> VarArray<'a> {
    pub fn data(&self) -> &ArrayView2<'a, f64> {
        &self.data
    }

    pub fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
}

/// The collection of arrays that supply the values of a formula's variables
///
/// Arrays are keyed by variable id.
#[derive(Clone, Debug)]
pub struct PairInputs<'a> {
    nx: usize,
    ny: usize,
    arrays: BTreeMap<usize, VarArray<'a>>,
}

impl<'a> PairInputs<'a> {
    /// `nx` & `ny` are the sizes of the `i` and `j` index spaces (per batch)
    pub fn new(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            arrays: BTreeMap::new(),
        }
    }

    /// Attach an (unbatched) array to the variable `id`
    pub fn with(self, id: usize, data: ArrayView2<'a, f64>) -> Self {
        self.with_batched(id, &[], data)
    }

    /// Attach an array with batch dimensions to the variable `id`
    pub fn with_batched(mut self, id: usize, batch_shape: &[usize], data: ArrayView2<'a, f64>) -> Self {
        self.arrays.insert(
            id,
            VarArray {
                data,
                batch_shape: batch_shape.to_vec(),
            },
        );
        self
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn get(&self, id: usize) -> Option<&VarArray<'a>> {
        self.arrays.get(&id)
    }

    /// The broadcast batch shape of all attached arrays
    pub fn batch_shape(&self) -> Result<Vec<usize>, Error> {
        let shapes: Vec<&[usize]> = self.arrays.values().map(|a| a.batch_shape()).collect();
        broadcast_batch_shapes(&shapes)
    }

    /// The number of batches (1 when there are no batch dimensions)
    pub fn n_batches(&self) -> Result<usize, Error> {
        Ok(shape_len(&self.batch_shape()?))
    }
}

/// Broadcast batch shapes against each other (following numpy's rules)
pub fn broadcast_batch_shapes(shapes: &[&[usize]]) -> Result<Vec<usize>, Error> {
    let ndim = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut out = vec![1; ndim];
    for shape in shapes {
        let pad = ndim - shape.len();
        for (axis, &len) in shape.iter().enumerate() {
            let cur = &mut out[pad + axis];
            if *cur == 1 {
                *cur = len;
            } else if len != 1 && len != *cur {
                return Err(Error::configuration(format!(
                    "incompatible batch shapes: {shape:?} can't be broadcast \
                     against a batch axis of length {cur}",
                )));
            }
        }
    }
    Ok(out)
}

/// Maps every flat batch index of the `full` batch shape to the flat batch
/// index of an array with batch shape `own` (which must be broadcastable to
/// `full`).
pub(crate) fn batch_index_map(own: &[usize], full: &[usize]) -> Vec<usize> {
    let pad = full.len() - own.len();
    let n_batches = shape_len(full);
    let mut out = Vec::with_capacity(n_batches);
    for flat in 0..n_batches {
        // unravel `flat` (row-major), then ravel into `own`
        let mut rem = flat;
        let mut own_flat = 0;
        let mut own_stride = 1;
        for axis in (0..full.len()).rev() {
            let idx = rem % full[axis];
            rem /= full[axis];
            if axis >= pad {
                let own_len = own[axis - pad];
                if own_len != 1 {
                    own_flat += idx * own_stride;
                }
                own_stride *= own_len;
            }
        }
        out.push(own_flat);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn broadcasting() {
        assert_eq!(broadcast_batch_shapes(&[]).unwrap(), Vec::<usize>::new());
        assert_eq!(
            broadcast_batch_shapes(&[&[2, 1], &[1, 3], &[]]).unwrap(),
            vec![2, 3]
        );
        assert_eq!(broadcast_batch_shapes(&[&[3], &[2, 1]]).unwrap(), vec![2, 3]);
        assert!(broadcast_batch_shapes(&[&[2], &[3]]).is_err());
    }

    #[test]
    fn index_map() {
        assert_eq!(batch_index_map(&[2, 3], &[2, 3]), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(batch_index_map(&[1, 3], &[2, 3]), vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(batch_index_map(&[2, 1], &[2, 3]), vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(batch_index_map(&[], &[2, 3]), vec![0; 6]);
        assert_eq!(batch_index_map(&[3], &[2, 3]), vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn inputs_batch_shape() {
        let a = Array2::<f64>::zeros((6, 1));
        let b = Array2::<f64>::zeros((2, 1));
        let inputs = PairInputs::new(3, 1)
            .with_batched(0, &[2], a.view())
            .with(1, b.view());
        assert_eq!(inputs.batch_shape().unwrap(), vec![2]);
        assert_eq!(inputs.n_batches().unwrap(), 2);
        assert!(inputs.get(2).is_none());
    }
}
