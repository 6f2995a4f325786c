use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::{PairwiseError, Result};

/// Two-sided p-value of `r` observed over `n` paired observations, from
/// Student's t with `n - 2` degrees of freedom. NaN when `r` is undefined or
/// fewer than three observations were paired; 0 when `|r|` reaches 1.
pub fn corr_pvalue(r: f64, n: usize) -> f64 {
    if n <= 2 || !r.is_finite() {
        return f64::NAN;
    }
    let r = r.clamp(-1.0, 1.0);
    let one_minus_r2 = 1.0 - r * r;
    if one_minus_r2 <= 0.0 {
        return 0.0;
    }

    let df = n as f64 - 2.0;
    let Ok(t_dist) = StudentsT::new(0.0, 1.0, df) else {
        return f64::NAN;
    };
    let t = r.abs() * (df / one_minus_r2).sqrt();
    (2.0 * t_dist.cdf(-t)).clamp(0.0, 1.0)
}

/// P-values for a packed triangle, each pair tested with its own number of
/// pairwise-complete observations.
pub fn pairwise_pvalues(correlations: &[f64], counts: &[usize]) -> Result<Vec<f64>> {
    if correlations.len() != counts.len() {
        return Err(PairwiseError::OutputLength {
            expected: correlations.len(),
            actual: counts.len(),
        });
    }
    Ok(correlations
        .par_iter()
        .zip(counts.par_iter())
        .map(|(&r, &n)| corr_pvalue(r, n))
        .collect())
}
