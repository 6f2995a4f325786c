//! Pairwise-complete Pearson correlations between the rows of a dense matrix,
//! packed into the upper triangle of the symmetric result.

pub mod error;
pub mod matrix;
pub mod monitor;
pub mod pearson;
pub mod pvalues;
pub mod triangle;
pub mod upper;

pub use error::PairwiseError;
pub use matrix::ColumnMajor;
pub use monitor::{Cancellation, CancelWhen, Deadline, NeverCancel, NoProgress, ProgressSink};
pub use pearson::{pearson_pair, pearson_pair_counted, pearson_slices};
pub use triangle::{
    correlation_upper_triangle, correlation_upper_triangle_array,
    correlation_upper_triangle_into, correlation_upper_triangle_monitored,
    correlation_upper_triangle_with_counts, pairwise_correlations, PairwiseConfig,
};
pub use upper::{pair_at, slot, upper_triangular_len, PackedTriangle};
