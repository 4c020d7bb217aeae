use crate::Error;
use crate::formula::Category;

/// Specifies the index that a reduction collapses.
///
/// The other index (the *outer* index) labels the output rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReductionAxis {
    /// reduce over `i` (axis 0); the output has one row per `j`
    OverI,
    /// reduce over `j` (axis 1); the output has one row per `i`
    OverJ,
}

impl ReductionAxis {
    /// The category of the variables indexed by the output rows
    pub fn outer_category(&self) -> Category {
        match self {
            ReductionAxis::OverI => Category::J,
            ReductionAxis::OverJ => Category::I,
        }
    }

    /// The category of the variables indexed by the reduced-over index
    pub fn inner_category(&self) -> Category {
        match self {
            ReductionAxis::OverI => Category::I,
            ReductionAxis::OverJ => Category::J,
        }
    }

    /// The reduction flag used throughout the internals: `0` when the output
    /// is indexed by `i`, `1` when it is indexed by `j`.
    pub fn tag_i(&self) -> u8 {
        match self {
            ReductionAxis::OverJ => 0,
            ReductionAxis::OverI => 1,
        }
    }

    /// Returns `(n_outer, n_inner)`
    pub(crate) fn outer_inner_lens(&self, nx: usize, ny: usize) -> (usize, usize) {
        match self {
            ReductionAxis::OverJ => (nx, ny),
            ReductionAxis::OverI => (ny, nx),
        }
    }
}

/// Maps a numeric reduction axis to the category of the output rows
///
/// Reducing over axis 0 (`i`) leaves rows indexed by `j` and vice versa.
pub fn axis2cat(axis: i64) -> Result<Category, Error> {
    match axis {
        0 => Ok(Category::J),
        1 => Ok(Category::I),
        _ => Err(Error::integer_range("axis", axis, 0, 1)),
    }
}

/// The inverse of [`axis2cat`]
pub fn cat2axis(cat: Category) -> Result<i64, Error> {
    match cat {
        Category::J => Ok(0),
        Category::I => Ok(1),
        Category::Param => Err(Error::configuration(
            "parameters aren't indexed, so they don't correspond to an axis",
        )),
    }
}

impl TryFrom<i64> for ReductionAxis {
    type Error = Error;

    fn try_from(axis: i64) -> Result<Self, Error> {
        match axis2cat(axis)? {
            Category::J => Ok(ReductionAxis::OverI),
            _ => Ok(ReductionAxis::OverJ),
        }
    }
}

/// Computes the product of the entries in `shape` (an empty shape has
/// 1 element)
pub(crate) fn shape_len(shape: &[usize]) -> usize {
    shape.iter().product()
}
