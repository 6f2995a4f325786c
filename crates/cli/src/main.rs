// Compute pairwise-complete Pearson correlations between all rows of a matrix
// and write the packed upper triangle.

use std::{
    collections::HashSet,
    fs::File,
    io::{Cursor, Read, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use csv::{ReaderBuilder, WriterBuilder};
use flate2::{
    read::{GzDecoder, MultiGzDecoder},
    write::GzEncoder,
    Compression,
};
use indicatif::{ProgressBar, ProgressStyle};
use strum_macros::{Display, EnumString};
use tar::{Archive, Builder, Header};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use paircor::{
    correlation_upper_triangle_with_counts, pvalues::pairwise_pvalues, Cancellation, ColumnMajor,
    Deadline, NeverCancel, PackedTriangle, PairwiseConfig, PairwiseError, ProgressSink,
};

const PROGRESS_TICKS: u64 = 1000;

#[derive(EnumString, Display, Clone, Copy, Debug, PartialEq)]
#[strum(ascii_case_insensitive)]
enum Layout {
    /// One line per pair with both row ids.
    #[strum(serialize = "pairs")]
    Pairs,
    /// One line per slot, ids implied by the slot order.
    #[strum(serialize = "packed")]
    Packed,
}

#[derive(Parser, Debug)]
#[command(
    name = "paircor",
    version,
    about = "Pairwise-complete Pearson correlations between matrix rows"
)]
struct Args {
    /// Tab-separated matrix (plain, .gz or .tar.gz); first column holds row ids.
    input: PathBuf,

    /// Worker threads (default: all available cores).
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Include each row's correlation with itself.
    #[arg(long)]
    diagonal: bool,

    /// Minimum fraction of columns present in both rows of a pair.
    #[arg(short = 'm', long, default_value_t = 0.5)]
    missing_threshold: f64,

    /// Progress granularity in percent of rows.
    #[arg(long, default_value_t = 2)]
    progress_step: u32,

    /// Add two-sided p-values from each pair's own observation count.
    #[arg(long)]
    pvalues: bool,

    /// Output layout: pairs or packed.
    #[arg(long, default_value_t = Layout::Pairs)]
    layout: Layout,

    /// Directory receiving the .tar.gz result.
    #[arg(short = 'o', long, default_value = ".")]
    output_dir: PathBuf,

    /// Abort the computation after this many seconds.
    #[arg(long, value_name = "SECONDS")]
    time_limit: Option<f64>,

    /// Do not draw a progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Log timing of each phase.
    #[arg(long)]
    time: bool,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("Failed to initialize tracing: {e}"))
}

/// Row ids in file order and their values, column-major.
struct InputMatrix {
    row_ids: Vec<String>,
    n_cols: usize,
    values: Vec<f64>,
}

impl InputMatrix {
    fn view(&self) -> Result<ColumnMajor<'_>, PairwiseError> {
        ColumnMajor::new(&self.values, self.row_ids.len(), self.n_cols)
    }
}

fn read_matrix_data<R: Read>(reader: R) -> Result<InputMatrix> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(reader);

    // row id + at least two samples
    let header_len = rdr.headers()?.len();
    if header_len < 3 {
        bail!("Input file must contain at least two sample columns for correlation analysis");
    }
    let n_cols = header_len - 1;

    let mut row_ids = Vec::new();
    let mut seen = HashSet::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record?;
        let line = idx + 2; // header offset

        let raw_row_id = record.get(0).unwrap_or("").trim();
        if raw_row_id.is_empty() {
            bail!("Empty row ID encountered on line {line}");
        }
        if !seen.insert(raw_row_id.to_string()) {
            bail!("Duplicate row ID '{raw_row_id}' encountered on line {line}");
        }

        // anything unparsable (NA, empty) is missing
        let values: Vec<f64> = record
            .iter()
            .skip(1)
            .map(|s| s.trim().parse().unwrap_or(f64::NAN))
            .collect();
        row_ids.push(raw_row_id.to_string());
        rows.push(values);
    }
    if rows.is_empty() {
        bail!("Input file contains no data rows");
    }

    let n_rows = rows.len();
    let mut values = vec![f64::NAN; n_rows * n_cols];
    for (i, row) in rows.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            values[i + n_rows * j] = v;
        }
    }

    Ok(InputMatrix {
        row_ids,
        n_cols,
        values,
    })
}

fn load_input(path: &Path) -> Result<InputMatrix> {
    let name = path.to_string_lossy();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    if name.ends_with(".tar.gz") {
        let mut archive = Archive::new(GzDecoder::new(file));
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.header().entry_type().is_file() {
                return read_matrix_data(&mut entry);
            }
        }
        bail!("No readable file found in tar archive")
    } else if name.ends_with(".gz") {
        read_matrix_data(MultiGzDecoder::new(file))
    } else {
        read_matrix_data(file)
    }
}

/// Input file name without `.gz`, `.tar` and `.tsv` suffixes.
fn input_basename(path: &Path) -> String {
    let mut stem = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("data")
        .to_string();
    for suffix in [".gz", ".tar", ".tsv", ".txt"] {
        if let Some(stripped) = stem.strip_suffix(suffix) {
            stem = stripped.to_string();
        }
    }
    if stem.is_empty() {
        "data".to_string()
    } else {
        stem
    }
}

/// Correlations and paired observation counts in slot order, plus p-values
/// when requested.
struct Computed {
    correlations: PackedTriangle,
    counts: Vec<usize>,
    pvalues: Option<Vec<f64>>,
}

fn compute<C, P>(
    matrix: &ColumnMajor<'_>,
    config: &PairwiseConfig,
    with_pvalues: bool,
    cancel: &C,
    progress: &mut P,
) -> Result<Computed>
where
    C: Cancellation + ?Sized,
    P: ProgressSink + ?Sized,
{
    let (correlations, counts) =
        correlation_upper_triangle_with_counts(matrix, config, cancel, progress)
            .context("Pearson correlation failed")?;
    let pvalues = if with_pvalues {
        Some(pairwise_pvalues(correlations.as_slice(), &counts)?)
    } else {
        None
    };
    Ok(Computed {
        correlations,
        counts,
        pvalues,
    })
}

struct Report<'a> {
    row_ids: &'a [String],
    correlations: &'a PackedTriangle,
    counts: &'a [usize],
    pvalues: Option<&'a [f64]>,
}

fn write_table<W: Write>(writer: W, layout: Layout, report: &Report<'_>) -> Result<()> {
    let mut wtr = WriterBuilder::new().delimiter(b'\t').from_writer(writer);

    let mut header: Vec<&str> = match layout {
        Layout::Pairs => vec!["row_a", "row_b", "n", "r"],
        Layout::Packed => vec!["n", "r"],
    };
    if report.pvalues.is_some() {
        header.push("p");
    }
    wtr.write_record(&header)?;

    for (slot, (j, i, r)) in report.correlations.iter().enumerate() {
        let mut record: Vec<String> = Vec::with_capacity(header.len());
        if layout == Layout::Pairs {
            record.push(report.row_ids[j].clone());
            record.push(report.row_ids[i].clone());
        }
        record.push(report.counts[slot].to_string());
        record.push(r.to_string());
        if let Some(pvalues) = report.pvalues {
            record.push(pvalues[slot].to_string());
        }
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_tar_gz(path: &Path, entry_name: &str, payload: Vec<u8>) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let enc = GzEncoder::new(file, Compression::default());
    let mut tar_builder = Builder::new(enc);

    let mut header = Header::new_gnu();
    header.set_size(payload.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    tar_builder.append_data(&mut header, entry_name, &mut Cursor::new(payload))?;
    tar_builder.into_inner()?.finish()?;
    Ok(())
}

fn progress_bar() -> Result<ProgressBar> {
    let bar = ProgressBar::new(PROGRESS_TICKS);
    bar.set_style(
        ProgressStyle::with_template("[{bar:50}] {percent:>3}% ({elapsed_precise})")?
            .progress_chars("=> "),
    );
    Ok(bar)
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose)?;

    let config = PairwiseConfig::default()
        .with_diagonal(args.diagonal)
        .with_missing_threshold(args.missing_threshold)
        .with_progress_step(args.progress_step);
    config.validate()?;

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| anyhow!("Failed to set thread pool: {e}"))?;
        info!(threads, "using fixed thread pool");
    } else {
        info!("using all available CPU cores");
    }

    let cancel: Box<dyn Cancellation> = match args.time_limit {
        Some(secs) => Box::new(Deadline::after(
            Duration::try_from_secs_f64(secs).context("Invalid --time-limit")?,
        )),
        None => Box::new(NeverCancel),
    };

    // Data loading
    let load_start = Instant::now();
    let input = load_input(&args.input)?;
    let load_duration = load_start.elapsed();
    info!(
        rows = input.row_ids.len(),
        columns = input.n_cols,
        "matrix loaded"
    );
    if args.time {
        info!("Data loaded in {:.3} seconds.", load_duration.as_secs_f64());
    }
    let matrix = input.view()?;

    // Correlation calculation
    let calc_start = Instant::now();
    let bar = if args.no_progress {
        None
    } else {
        Some(progress_bar()?)
    };
    let mut report_progress = |fraction: f64| {
        if let Some(bar) = &bar {
            bar.set_position((fraction * PROGRESS_TICKS as f64).round() as u64);
        }
    };
    let computed = compute(
        &matrix,
        &config,
        args.pvalues,
        &*cancel,
        &mut report_progress,
    );
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }
    let computed = computed?;
    let calc_duration = calc_start.elapsed();
    if args.time {
        info!(
            "Pearson correlations calculated in {:.3} seconds.",
            calc_duration.as_secs_f64()
        );
    }

    // Output writing
    let output_start = Instant::now();
    let report = Report {
        row_ids: &input.row_ids,
        correlations: &computed.correlations,
        counts: &computed.counts,
        pvalues: computed.pvalues.as_deref(),
    };
    let mut tsv_buf = Vec::<u8>::new();
    write_table(&mut tsv_buf, args.layout, &report)?;

    let output_base = format!("{}_pearson_{}", input_basename(&args.input), args.layout);
    let tar_gz_path = args.output_dir.join(format!("{output_base}.tar.gz"));
    write_tar_gz(&tar_gz_path, &format!("{output_base}.tsv"), tsv_buf)?;
    let output_duration = output_start.elapsed();
    debug!(path = %tar_gz_path.display(), slots = computed.correlations.len(), "output written");
    info!("Results written to {}", tar_gz_path.display());

    if args.time {
        let total_duration = load_duration + calc_duration + output_duration;
        info!("Data loading:            {:8.3} seconds", load_duration.as_secs_f64());
        info!("Correlation calculation: {:8.3} seconds", calc_duration.as_secs_f64());
        info!("Output writing:          {:8.3} seconds", output_duration.as_secs_f64());
        info!("Total time:              {:8.3} seconds", total_duration.as_secs_f64());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paircor::{CancelWhen, NoProgress};
    use std::cell::Cell;

    const SAMPLE: &str = "gene\ts1\ts2\ts3\ts4\n\
                          a\t1\t2\t3\t4\n\
                          b\t4\t3\t2\t1\n\
                          c\t1\tNA\t3\t5\n";

    #[test]
    fn reads_rows_in_file_order_column_major() {
        let input = read_matrix_data(SAMPLE.as_bytes()).expect("parse");
        assert_eq!(input.row_ids, vec!["a", "b", "c"]);
        assert_eq!(input.n_cols, 4);
        let matrix = input.view().expect("shape");
        assert_eq!(matrix.row(1).collect::<Vec<_>>(), vec![4.0, 3.0, 2.0, 1.0]);
        assert!(matrix.get(2, 1).is_nan());
    }

    #[test]
    fn rejects_duplicate_and_empty_ids() {
        let dup = "id\tx\ty\na\t1\t2\na\t3\t4\n";
        let err = read_matrix_data(dup.as_bytes()).err().expect("duplicate");
        assert!(err.to_string().contains("Duplicate row ID 'a'"));

        let empty = "id\tx\ty\n\t1\t2\n";
        let err = read_matrix_data(empty.as_bytes()).err().expect("empty id");
        assert!(err.to_string().contains("line 2"));

        assert!(read_matrix_data("id\tx\na\t1\n".as_bytes()).is_err());
    }

    #[test]
    fn strips_known_suffixes() {
        assert_eq!(input_basename(Path::new("/tmp/expr.tsv.gz")), "expr");
        assert_eq!(input_basename(Path::new("expr.tar.gz")), "expr");
        assert_eq!(input_basename(Path::new("expr")), "expr");
    }

    fn render(layout: Layout, with_pvalues: bool) -> Vec<String> {
        let input = read_matrix_data(SAMPLE.as_bytes()).expect("parse");
        let matrix = input.view().expect("shape");
        let computed = compute(
            &matrix,
            &PairwiseConfig::default(),
            with_pvalues,
            &NeverCancel,
            &mut NoProgress,
        )
        .expect("compute");
        let report = Report {
            row_ids: &input.row_ids,
            correlations: &computed.correlations,
            counts: &computed.counts,
            pvalues: computed.pvalues.as_deref(),
        };
        let mut buf = Vec::new();
        write_table(&mut buf, layout, &report).expect("write");
        String::from_utf8(buf)
            .expect("utf8")
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn pairs_layout_names_both_rows() {
        let lines = render(Layout::Pairs, false);
        assert_eq!(lines[0], "row_a\trow_b\tn\tr");
        assert_eq!(lines[1], "a\tb\t4\t-1");
        assert!(lines[2].starts_with("a\tc\t3\t"));
        assert!(lines[3].starts_with("b\tc\t3\t"));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn count_precedes_correlation_in_both_layouts() {
        assert_eq!(render(Layout::Pairs, true)[0], "row_a\trow_b\tn\tr\tp");
        assert_eq!(render(Layout::Packed, false)[0], "n\tr");

        let packed = render(Layout::Packed, true);
        assert_eq!(packed[0], "n\tr\tp");
        assert_eq!(packed[1], "4\t-1\t0");
        assert!(packed[2].starts_with("3\t"));
        assert_eq!(packed.len(), 4);
    }

    #[test]
    fn time_limit_stops_the_pvalue_run() {
        let data: Vec<f64> = (0..40).map(|v| ((v * 7) % 11) as f64).collect();
        let matrix = ColumnMajor::new(&data, 8, 5).expect("shape");
        let polls = Cell::new(0);
        let cancel = CancelWhen(|| {
            polls.set(polls.get() + 1);
            polls.get() > 3
        });
        let mut seen = Vec::new();
        let mut sink = |f: f64| seen.push(f);

        let err = compute(
            &matrix,
            &PairwiseConfig::default(),
            true,
            &cancel,
            &mut sink,
        )
        .err()
        .expect("cancelled");
        assert_eq!(
            err.downcast_ref::<PairwiseError>(),
            Some(&PairwiseError::Cancelled {
                completed: 3,
                total: 8
            })
        );
        // a single pass: the rows run once, not again for the counts
        assert_eq!(polls.get(), 4);
        assert_eq!(seen, vec![0.0, 0.125, 0.25, 0.375]);
    }

    #[test]
    fn tar_gz_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.tar.gz");
        write_tar_gz(&path, "out.tsv", SAMPLE.as_bytes().to_vec()).expect("write");
        let input = load_input(&path).expect("read back");
        assert_eq!(input.row_ids.len(), 3);
        assert_eq!(input.n_cols, 4);
    }
}
