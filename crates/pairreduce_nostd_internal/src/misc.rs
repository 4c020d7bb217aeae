/// Check if a 2D array shape is valid
fn check_shape(shape: &[usize; 2]) -> Result<(), &'static str> {
    if shape.contains(&0) {
        Err("shape must not hold 0")
    } else {
        Ok(())
    }
}

/// Specifies how a "2D" array is laid out in memory. It _must_ be contiguous
/// along the fast axis, which is axis 1.
///
/// For concreteness, an array with shape `[a, b]`, has `a` elements along
/// axis 0 and `b` elements along axis 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct View2DSpec {
    shape: [usize; 2],
    strides: [usize; 2],
}

impl View2DSpec {
    /// Create a contiguous-in-memory View2DSpec from shape alone
    pub fn from_shape_contiguous(shape: [usize; 2]) -> Result<View2DSpec, &'static str> {
        check_shape(&shape)?;
        Ok(Self {
            shape,
            strides: [shape[1], 1],
        })
    }

    /// Create a View2DSpec from shape and strides
    pub fn from_shape_strides(
        shape: [usize; 2],
        strides: [usize; 2],
    ) -> Result<View2DSpec, &'static str> {
        check_shape(&shape)?;
        if strides[1] != 1 {
            Err("the view must be contiguous along the fast axis")
        } else if strides[0] < shape[1] {
            Err("the length of the contiguous axis can't exceed strides[0]")
        } else {
            Ok(Self { shape, strides })
        }
    }

    /// returns the number of elements that a slice must have to be described
    /// by self
    #[inline]
    pub fn required_length(&self) -> usize {
        (self.shape[0] - 1) * self.strides[0] + self.shape[1]
    }

    #[inline]
    pub fn shape(&self) -> &[usize; 2] {
        &self.shape
    }

    #[inline]
    pub fn strides(&self) -> &[usize; 2] {
        &self.strides
    }

    /// map a 2D index to 1D
    #[inline(always)]
    pub fn map_idx2d_to_1d(&self, i0: usize, i1: usize) -> usize {
        i0 * self.strides[0] + i1
    }
}

/// Splits `total` items among `n_parts` parts as evenly as possible and
/// returns the half-open bounds of part `part`.
///
/// The first `total % n_parts` parts hold one extra item.
#[inline]
pub fn even_partition(total: usize, n_parts: usize, part: usize) -> (usize, usize) {
    debug_assert!(n_parts > 0 && part < n_parts);
    let base = total / n_parts;
    let extra = total % n_parts;
    let start = part * base + part.min(extra);
    let len = base + usize::from(part < extra);
    (start, start + len)
}
