use std::time::Instant;

use ndarray::{ArrayBase, Data, Ix2};
use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use crate::error::{PairwiseError, Result};
use crate::matrix::ColumnMajor;
use crate::monitor::{
    Cancellation, NeverCancel, NoProgress, ProgressSink, ProgressThrottle,
    DEFAULT_PROGRESS_STEP_PERCENT,
};
use crate::pearson::pearson_pair_counted;
use crate::upper::{block_len, upper_triangular_len, PackedTriangle};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairwiseConfig {
    /// Also correlate every row with itself.
    pub include_diagonal: bool,
    /// Minimum fraction of columns that must be present in both rows.
    pub missing_threshold: f64,
    /// Granularity of progress reports, in percent of outer rows.
    pub progress_step_percent: u32,
}

impl Default for PairwiseConfig {
    fn default() -> Self {
        Self {
            include_diagonal: false,
            missing_threshold: 0.0,
            progress_step_percent: DEFAULT_PROGRESS_STEP_PERCENT,
        }
    }
}

impl PairwiseConfig {
    pub fn with_diagonal(mut self, include_diagonal: bool) -> Self {
        self.include_diagonal = include_diagonal;
        self
    }

    pub fn with_missing_threshold(mut self, missing_threshold: f64) -> Self {
        self.missing_threshold = missing_threshold;
        self
    }

    pub fn with_progress_step(mut self, percent: u32) -> Self {
        self.progress_step_percent = percent;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.missing_threshold) {
            return Err(PairwiseError::Threshold(self.missing_threshold));
        }
        Ok(())
    }
}

fn triangle_len(nr: usize, include_diagonal: bool) -> Result<usize> {
    upper_triangular_len(nr, include_diagonal)
        .ok_or(PairwiseError::DimensionOverflow { rows: nr, cols: nr })
}

/// Drives `eval(j, i)` over every pair of the packed upper triangle and
/// stores each result in its slot of `out`.
///
/// The outer rows run in order on the calling thread; `cancel` is polled
/// before each one and `progress` hears about completed rows through a
/// [`ProgressThrottle`]. The pairs of one outer row occupy a contiguous run
/// of `out`, which is handed to rayon so every slot has exactly one writer.
pub fn evaluate_upper_triangle<T, F, C, P>(
    nr: usize,
    include_diagonal: bool,
    out: &mut [T],
    eval: F,
    cancel: &C,
    progress: &mut P,
    progress_step_percent: u32,
) -> Result<()>
where
    T: Send,
    F: Fn(usize, usize) -> T + Sync,
    C: Cancellation + ?Sized,
    P: ProgressSink + ?Sized,
{
    let expected = triangle_len(nr, include_diagonal)?;
    if out.len() != expected {
        return Err(PairwiseError::OutputLength {
            expected,
            actual: out.len(),
        });
    }
    let dc = usize::from(!include_diagonal);

    let mut throttle = ProgressThrottle::new(progress_step_percent);
    if let Some(fraction) = throttle.observe(0, nr) {
        progress.report(fraction);
    }

    let mut rest = out;
    for j in 0..nr {
        if cancel.is_cancelled() {
            warn!(completed = j, total = nr, "pairwise evaluation cancelled");
            return Err(PairwiseError::Cancelled {
                completed: j,
                total: nr,
            });
        }

        let len = block_len(nr, include_diagonal, j);
        let (block, tail) = std::mem::take(&mut rest).split_at_mut(len);
        rest = tail;
        block
            .par_iter_mut()
            .enumerate()
            .for_each(|(k, cell)| *cell = eval(j, j + dc + k));

        if let Some(fraction) = throttle.observe(j + 1, nr) {
            trace!(row = j, fraction, "progress");
            progress.report(fraction);
        }
    }
    debug_assert!(rest.is_empty());
    Ok(())
}

/// Evaluates every pair with [`pearson_pair_counted`] and stores
/// `cell(r, n)` in its slot; `r` is NaN for pairs that fail the gate.
fn evaluate_pearson<T, F, C, P>(
    matrix: &ColumnMajor<'_>,
    config: &PairwiseConfig,
    out: &mut [T],
    cell: F,
    cancel: &C,
    progress: &mut P,
) -> Result<()>
where
    T: Send,
    F: Fn(f64, usize) -> T + Sync,
    C: Cancellation + ?Sized,
    P: ProgressSink + ?Sized,
{
    config.validate()?;
    let threshold = config.missing_threshold;
    let start = Instant::now();
    debug!(
        rows = matrix.nrows(),
        cols = matrix.ncols(),
        include_diagonal = config.include_diagonal,
        missing_threshold = threshold,
        slots = out.len(),
        "computing pairwise Pearson correlations"
    );

    evaluate_upper_triangle(
        matrix.nrows(),
        config.include_diagonal,
        out,
        |j, i| {
            let (r, n) = pearson_pair_counted(matrix, i, j, threshold);
            cell(r.unwrap_or(f64::NAN), n)
        },
        cancel,
        progress,
        config.progress_step_percent,
    )?;

    info!(
        rows = matrix.nrows(),
        slots = out.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "pairwise correlations complete"
    );
    Ok(())
}

/// Fills `out` with the packed Pearson correlations of `matrix`. Pairs that
/// fail the missing-data gate are stored as NaN.
pub fn correlation_upper_triangle_into<C, P>(
    matrix: &ColumnMajor<'_>,
    config: &PairwiseConfig,
    out: &mut [f64],
    cancel: &C,
    progress: &mut P,
) -> Result<()>
where
    C: Cancellation + ?Sized,
    P: ProgressSink + ?Sized,
{
    evaluate_pearson(matrix, config, out, |r, _| r, cancel, progress)
}

pub fn correlation_upper_triangle_monitored<C, P>(
    matrix: &ColumnMajor<'_>,
    config: &PairwiseConfig,
    cancel: &C,
    progress: &mut P,
) -> Result<PackedTriangle>
where
    C: Cancellation + ?Sized,
    P: ProgressSink + ?Sized,
{
    config.validate()?;
    let len = triangle_len(matrix.nrows(), config.include_diagonal)?;
    let mut values = vec![f64::NAN; len];
    correlation_upper_triangle_into(matrix, config, &mut values, cancel, progress)?;
    PackedTriangle::new(matrix.nrows(), config.include_diagonal, values)
}

pub fn correlation_upper_triangle(
    matrix: &ColumnMajor<'_>,
    config: &PairwiseConfig,
) -> Result<PackedTriangle> {
    correlation_upper_triangle_monitored(matrix, config, &NeverCancel, &mut NoProgress)
}

/// Same as [`correlation_upper_triangle`] for an `ndarray` matrix with rows
/// as entities.
pub fn correlation_upper_triangle_array<S>(
    data: &ArrayBase<S, Ix2>,
    config: &PairwiseConfig,
) -> Result<PackedTriangle>
where
    S: Data<Elem = f64>,
{
    let matrix = ColumnMajor::from_array(data)?;
    correlation_upper_triangle(&matrix, config)
}

/// Pairwise-complete Pearson correlations of the rows of a column-major
/// `nr x nc` buffer, packed in slot order (see [`crate::upper`]). NaN marks
/// pairs with too few shared observations.
pub fn pairwise_correlations(
    data: &[f64],
    nr: usize,
    nc: usize,
    include_diagonal: bool,
    missing_threshold: f64,
) -> Result<Vec<f64>> {
    let matrix = ColumnMajor::new(data, nr, nc)?;
    let config = PairwiseConfig::default()
        .with_diagonal(include_diagonal)
        .with_missing_threshold(missing_threshold);
    correlation_upper_triangle(&matrix, &config).map(PackedTriangle::into_vec)
}

/// Packed correlations plus, in the same slot order, the number of columns
/// present in both rows of each pair. Both come out of a single pass that
/// honours `cancel` and reports to `progress`.
pub fn correlation_upper_triangle_with_counts<C, P>(
    matrix: &ColumnMajor<'_>,
    config: &PairwiseConfig,
    cancel: &C,
    progress: &mut P,
) -> Result<(PackedTriangle, Vec<usize>)>
where
    C: Cancellation + ?Sized,
    P: ProgressSink + ?Sized,
{
    config.validate()?;
    let len = triangle_len(matrix.nrows(), config.include_diagonal)?;
    let mut cells = vec![(f64::NAN, 0usize); len];
    evaluate_pearson(matrix, config, &mut cells, |r, n| (r, n), cancel, progress)?;
    let (values, counts): (Vec<f64>, Vec<usize>) = cells.into_iter().unzip();
    let packed = PackedTriangle::new(matrix.nrows(), config.include_diagonal, values)?;
    Ok((packed, counts))
}
