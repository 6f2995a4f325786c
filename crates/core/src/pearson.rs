use crate::matrix::ColumnMajor;

/// Running sums over the positions where both values are present.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PairSums {
    pub n: usize,
    pub sum_x: f64,
    pub sum_xx: f64,
    pub sum_y: f64,
    pub sum_yy: f64,
    pub sum_xy: f64,
}

impl PairSums {
    pub fn accumulate<X, Y>(x: X, y: Y) -> Self
    where
        X: IntoIterator<Item = f64>,
        Y: IntoIterator<Item = f64>,
    {
        let mut sums = PairSums::default();
        for (a, b) in x.into_iter().zip(y) {
            if a.is_nan() || b.is_nan() {
                continue;
            }
            sums.n += 1;
            sums.sum_x += a;
            sums.sum_xx += a * a;
            sums.sum_y += b;
            sums.sum_yy += b * b;
            sums.sum_xy += a * b;
        }
        sums
    }

    /// Fraction of the `nc` columns that were usable for this pair.
    pub fn coverage(&self, nc: usize) -> f64 {
        self.n as f64 / nc as f64
    }

    pub fn passes(&self, nc: usize, missing_threshold: f64) -> bool {
        self.n >= 2 && self.coverage(nc) >= missing_threshold
    }

    /// Pearson r from the computational (single-pass) formulas. A constant
    /// row makes the denominator zero and the result NaN.
    pub fn correlation(&self) -> f64 {
        let n = self.n as f64;
        let ssq_x = self.sum_xx - (self.sum_x * self.sum_x) / n;
        let ssq_y = self.sum_yy - (self.sum_y * self.sum_y) / n;
        let sprod = self.sum_xy - (self.sum_x * self.sum_y) / n;
        sprod / (ssq_x * ssq_y).sqrt()
    }

    fn gated(&self, nc: usize, missing_threshold: f64) -> Option<f64> {
        if self.passes(nc, missing_threshold) {
            Some(self.correlation())
        } else {
            None
        }
    }
}

/// Pearson correlation of rows `i1` and `i2` over their pairwise-complete
/// columns. `None` when fewer than two columns pair up or the paired fraction
/// of columns is below `missing_threshold`.
#[inline]
pub fn pearson_pair(
    matrix: &ColumnMajor<'_>,
    i1: usize,
    i2: usize,
    missing_threshold: f64,
) -> Option<f64> {
    PairSums::accumulate(matrix.row(i1), matrix.row(i2)).gated(matrix.ncols(), missing_threshold)
}

/// Same statistic for two standalone vectors. Extra trailing values of the
/// longer slice are ignored; coverage is measured against the shorter one.
pub fn pearson_slices(x: &[f64], y: &[f64], missing_threshold: f64) -> Option<f64> {
    let nc = x.len().min(y.len());
    if nc == 0 {
        return None;
    }
    PairSums::accumulate(x.iter().copied(), y.iter().copied()).gated(nc, missing_threshold)
}

/// [`pearson_pair`] together with the number of columns present in both
/// rows, which is reported even when the pair is undefined.
#[inline]
pub fn pearson_pair_counted(
    matrix: &ColumnMajor<'_>,
    i1: usize,
    i2: usize,
    missing_threshold: f64,
) -> (Option<f64>, usize) {
    let sums = PairSums::accumulate(matrix.row(i1), matrix.row(i2));
    (sums.gated(matrix.ncols(), missing_threshold), sums.n)
}
