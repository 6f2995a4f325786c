use paircor::upper::pairs;
use paircor::{pairwise_correlations, pearson_pair, pearson_slices, ColumnMajor};
use proptest::prelude::*;

/// Centered two-pass Pearson over pairwise-complete observations.
fn reference_pearson(x: &[f64], y: &[f64]) -> f64 {
    let (xs, ys): (Vec<f64>, Vec<f64>) = x
        .iter()
        .zip(y)
        .filter(|(a, b)| !a.is_nan() && !b.is_nan())
        .map(|(a, b)| (*a, *b))
        .unzip();
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in xs.iter().zip(&ys) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx) * (a - mx);
        syy += (b - my) * (b - my);
    }
    sxy / (sxx * syy).sqrt()
}

fn well_spread_pair() -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
    (3usize..40).prop_flat_map(|n| {
        (
            prop::collection::vec(-100.0f64..100.0, n),
            prop::collection::vec(-100.0f64..100.0, n),
        )
    })
}

fn spread(v: &[f64]) -> f64 {
    let max = v.iter().copied().fold(f64::MIN, f64::max);
    let min = v.iter().copied().fold(f64::MAX, f64::min);
    max - min
}

proptest! {
    #[test]
    fn matches_two_pass_reference((x, y) in well_spread_pair()) {
        prop_assume!(spread(&x) > 10.0 && spread(&y) > 10.0);
        let r = pearson_slices(&x, &y, 0.0).expect("complete data passes the gate");
        let expected = reference_pearson(&x, &y);
        prop_assert!((r - expected).abs() <= 1e-9 * expected.abs().max(1.0), "{r} vs {expected}");
        prop_assert!(r.abs() <= 1.0 + 1e-9);
    }

    #[test]
    fn symmetric_in_its_rows(
        nc in 2usize..20,
        nr in 2usize..8,
        seed in prop::collection::vec(-50.0f64..50.0, 160),
        holes in prop::collection::vec(any::<bool>(), 160),
        threshold in 0.0f64..=1.0,
    ) {
        let data: Vec<f64> = (0..nr * nc)
            .map(|k| if holes[k] && k % 3 == 0 { f64::NAN } else { seed[k] })
            .collect();
        let matrix = ColumnMajor::new(&data, nr, nc).expect("shape");
        for i in 0..nr {
            for j in 0..nr {
                let a = pearson_pair(&matrix, i, j, threshold);
                let b = pearson_pair(&matrix, j, i, threshold);
                prop_assert_eq!(a.map(f64::to_bits), b.map(f64::to_bits));
            }
        }
    }

    #[test]
    fn packed_output_agrees_with_pair_statistic(
        nc in 2usize..12,
        nr in 1usize..9,
        seed in prop::collection::vec(-10.0f64..10.0, 108),
        include_diagonal in any::<bool>(),
    ) {
        let data: Vec<f64> = seed[..nr * nc].to_vec();
        let matrix = ColumnMajor::new(&data, nr, nc).expect("shape");
        let packed = pairwise_correlations(&data, nr, nc, include_diagonal, 0.0).expect("valid");
        for ((j, i), got) in pairs(nr, include_diagonal).zip(&packed) {
            let want = pearson_pair(&matrix, i, j, 0.0).unwrap_or(f64::NAN);
            prop_assert_eq!(got.to_bits(), want.to_bits());
        }
    }
}
