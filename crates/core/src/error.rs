use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PairwiseError {
    #[error("matrix must have at least one row and one column (got {rows} x {cols})")]
    EmptyMatrix { rows: usize, cols: usize },
    #[error("matrix buffer holds {actual} values but {expected} were expected")]
    DataLength { expected: usize, actual: usize },
    #[error("matrix dimensions {rows} x {cols} overflow the addressable output size")]
    DimensionOverflow { rows: usize, cols: usize },
    #[error("missing-data threshold must lie in [0, 1] (got {0})")]
    Threshold(f64),
    #[error("output buffer holds {actual} slots but the triangle needs {expected}")]
    OutputLength { expected: usize, actual: usize },
    #[error("cancelled after {completed} of {total} outer rows")]
    Cancelled { completed: usize, total: usize },
}

impl PairwiseError {
    /// True for the errors raised before any pair is evaluated.
    pub fn is_invalid_argument(&self) -> bool {
        !matches!(self, PairwiseError::Cancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, PairwiseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_an_argument_error() {
        let cancelled = PairwiseError::Cancelled {
            completed: 3,
            total: 10,
        };
        assert!(!cancelled.is_invalid_argument());
        assert!(PairwiseError::Threshold(1.5).is_invalid_argument());
        assert_eq!(cancelled.to_string(), "cancelled after 3 of 10 outer rows");
    }
}
