//! Packing of the upper triangle of an `nr x nr` symmetric relation into a
//! flat vector.
//!
//! Pairs are enumerated with the outer index `j` ascending and, for each `j`,
//! the inner index `i` ascending over `j + dc .. nr`, where `dc` is 0 when
//! the diagonal is kept and 1 otherwise. The pair `(j, i)` lands at
//!
//! ```text
//! slot = j * (nr - dc) + i - j * (j + 1) / 2 - dc
//! ```
//!
//! which fills `0 .. upper_triangular_len(nr, include_diagonal)` with no gaps.
//! [`pair_at`] inverts the mapping, so callers holding only the flat vector
//! can recover which rows a value belongs to.
//!
//! [`slot`], [`block_start`] and [`pair_at`] never form a product larger than
//! the slot they return, so they cannot overflow for any `nr` whose
//! [`upper_triangular_len`] fits in `usize`.

use crate::error::{PairwiseError, Result};

#[inline]
fn diagonal_offset(include_diagonal: bool) -> usize {
    if include_diagonal {
        0
    } else {
        1
    }
}

/// Number of packed slots: `nr(nr+1)/2` with the diagonal, `nr(nr-1)/2`
/// without. `None` if the count does not fit in `usize`.
pub fn upper_triangular_len(nr: usize, include_diagonal: bool) -> Option<usize> {
    let other = if include_diagonal {
        nr.checked_add(1)?
    } else {
        nr.saturating_sub(1)
    };
    // one of the two factors is even
    if nr % 2 == 0 {
        (nr / 2).checked_mul(other)
    } else {
        nr.checked_mul(other / 2)
    }
}

/// Slot of the pair `(j, i)`; requires `j + dc <= i < nr`.
#[inline]
pub fn slot(nr: usize, include_diagonal: bool, j: usize, i: usize) -> usize {
    let dc = diagonal_offset(include_diagonal);
    debug_assert!(j + dc <= i && i < nr, "pair ({j}, {i}) outside the triangle");
    block_start(nr, include_diagonal, j) + (i - j - dc)
}

/// First slot of outer block `j`, for `j < nr`.
#[inline]
pub fn block_start(nr: usize, include_diagonal: bool, j: usize) -> usize {
    let dc = diagonal_offset(include_diagonal);
    // j * (2(nr - dc) + 1 - j) / 2; the two factors have opposite parity, so
    // halving the even one keeps every intermediate below the result
    let other = 2 * (nr - dc) + 1 - j;
    if j % 2 == 0 {
        (j / 2) * other
    } else {
        j * (other / 2)
    }
}

/// Number of slots in outer block `j`.
#[inline]
pub fn block_len(nr: usize, include_diagonal: bool, j: usize) -> usize {
    nr.saturating_sub(j + diagonal_offset(include_diagonal))
}

/// Inverse of [`slot`]: the `(j, i)` pair stored at `offset`, or `None` when
/// the offset is past the end of the triangle.
pub fn pair_at(nr: usize, include_diagonal: bool, offset: usize) -> Option<(usize, usize)> {
    let len = upper_triangular_len(nr, include_diagonal)?;
    if offset >= len {
        return None;
    }
    let dc = diagonal_offset(include_diagonal);
    let blocks = nr - dc;

    // block_start(j) <= offset  <=>  j^2 - b*j + 2*offset >= 0, smaller root
    let b = 2.0 * (nr - dc) as f64 + 1.0;
    let disc = (b * b - 8.0 * offset as f64).max(0.0);
    let mut j = (((b - disc.sqrt()) / 2.0).floor() as usize).min(blocks - 1);

    // the float guess can be off by one either way for very large nr
    while j > 0 && block_start(nr, include_diagonal, j) > offset {
        j -= 1;
    }
    while j + 1 < blocks && block_start(nr, include_diagonal, j + 1) <= offset {
        j += 1;
    }

    let i = j + dc + (offset - block_start(nr, include_diagonal, j));
    Some((j, i))
}

/// All `(j, i)` pairs in slot order.
pub fn pairs(nr: usize, include_diagonal: bool) -> impl Iterator<Item = (usize, usize)> {
    let dc = diagonal_offset(include_diagonal);
    (0..nr).flat_map(move |j| (j + dc..nr).map(move |i| (j, i)))
}

/// A packed triangle together with the shape needed to address it.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedTriangle {
    nr: usize,
    include_diagonal: bool,
    values: Vec<f64>,
}

impl PackedTriangle {
    pub fn new(nr: usize, include_diagonal: bool, values: Vec<f64>) -> Result<Self> {
        let expected = upper_triangular_len(nr, include_diagonal)
            .ok_or(PairwiseError::DimensionOverflow { rows: nr, cols: nr })?;
        if values.len() != expected {
            return Err(PairwiseError::OutputLength {
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            nr,
            include_diagonal,
            values,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nr
    }

    pub fn include_diagonal(&self) -> bool {
        self.include_diagonal
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value for rows `a` and `b` in either order.
    pub fn get(&self, a: usize, b: usize) -> Option<f64> {
        let (j, i) = if a <= b { (a, b) } else { (b, a) };
        if i >= self.nr || (j == i && !self.include_diagonal) {
            return None;
        }
        Some(self.values[slot(self.nr, self.include_diagonal, j, i)])
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        pairs(self.nr, self.include_diagonal)
            .zip(self.values.iter().copied())
            .map(|((j, i), v)| (j, i, v))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.values
    }
}
