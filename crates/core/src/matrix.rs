use std::borrow::Cow;

use ndarray::{ArrayBase, Data, Ix2};

use crate::error::{PairwiseError, Result};

/// Read-only dense matrix stored column-major: rows are entities (genes),
/// columns are observations (conditions). Element `(i, j)` lives at
/// `i + nrows * j`. NaN marks a missing value.
#[derive(Debug, Clone)]
pub struct ColumnMajor<'a> {
    data: Cow<'a, [f64]>,
    nr: usize,
    nc: usize,
}

fn check_shape(len: usize, nr: usize, nc: usize) -> Result<()> {
    if nr == 0 || nc == 0 {
        return Err(PairwiseError::EmptyMatrix { rows: nr, cols: nc });
    }
    let expected = nr
        .checked_mul(nc)
        .ok_or(PairwiseError::DimensionOverflow { rows: nr, cols: nc })?;
    if len != expected {
        return Err(PairwiseError::DataLength {
            expected,
            actual: len,
        });
    }
    Ok(())
}

impl<'a> ColumnMajor<'a> {
    pub fn new(data: &'a [f64], nr: usize, nc: usize) -> Result<Self> {
        check_shape(data.len(), nr, nc)?;
        Ok(Self {
            data: Cow::Borrowed(data),
            nr,
            nc,
        })
    }

    /// Wraps an `ndarray` matrix. Fortran-ordered input is borrowed as is;
    /// anything else is copied once into column-major order.
    pub fn from_array<S>(array: &'a ArrayBase<S, Ix2>) -> Result<Self>
    where
        S: Data<Elem = f64>,
    {
        let (nr, nc) = array.dim();
        let transposed = array.t();
        let data = match transposed.to_slice() {
            Some(slice) => Cow::Borrowed(slice),
            None => Cow::Owned(transposed.iter().copied().collect()),
        };
        check_shape(data.len(), nr, nc)?;
        Ok(Self { data, nr, nc })
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nr
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.nc
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i + self.nr * j]
    }

    /// The `ncols()` values of row `i`, in column order.
    #[inline]
    pub fn row(&self, i: usize) -> impl Iterator<Item = f64> + '_ {
        self.data[i..].iter().step_by(self.nr).copied()
    }
}
