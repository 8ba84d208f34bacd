use ndarray::{s, Array1, Array2, Array3, Axis};
use planestream::analysis::postprocess::{
    baseline_subtract, cut, make_trialwise, min_subtract, normalize, roll, stim_align,
};
use planestream::analysis::{process, Alignment, Normalizer, PostProcessConfig};

const TOL: f64 = 1e-9;

/// Deterministic, non-trivial traces (cells × frames)
fn traces(cells: usize, frames: usize) -> Array2<f64> {
    Array2::from_shape_fn((cells, frames), |(c, t)| {
        ((c * 7 + t * 13) % 23) as f64 - 5.0 + (t as f64 * 0.37 + c as f64).sin()
    })
}

#[test]
fn test_trialize_reconstructs_prefix() {
    let data = traces(3, 30);
    for lengths in [vec![30], vec![10, 10, 10], vec![12, 9, 9], vec![5, 14, 11]] {
        let trialwise = make_trialwise(data.view(), &lengths);
        let shortest = *lengths.iter().min().unwrap();
        assert_eq!(trialwise.dim(), (lengths.len(), 3, shortest));

        let mut start = 0;
        for (i, length) in lengths.iter().enumerate() {
            let original = data.slice(s![.., start..start + shortest]);
            assert_eq!(trialwise.index_axis(Axis(0), i), original);
            start += length;
        }
    }
}

#[test]
fn test_min_subtract_leaves_zero_minimum() {
    let data = min_subtract(traces(4, 50).view());
    for row in data.rows() {
        let min = row.iter().copied().fold(f64::INFINITY, f64::min);
        assert!(min.abs() < TOL);
    }
}

#[test]
fn test_zscore_rows_have_zero_mean_unit_std() {
    let data = min_subtract(traces(3, 40).view());
    let out = normalize(&data, Normalizer::ZScore);
    for row in out.rows() {
        let n = row.len() as f64;
        let mean = row.sum() / n;
        let std = (row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        assert!(mean.abs() < TOL);
        assert!((std - 1.0).abs() < TOL);
    }
}

#[test]
fn test_normalize_none_is_identity() {
    let data = traces(2, 10);
    assert_eq!(normalize(&data, Normalizer::None), data);
}

#[test]
fn test_roll_is_a_bijection() {
    let x = Array1::from_iter((0..17).map(|v| v as f64 * 1.5));
    for shift in [-40isize, -17, -3, 0, 1, 5, 16, 17, 33] {
        let there = roll(x.view(), shift);
        let back = roll(there.view(), -shift);
        assert_eq!(back, x);
    }
    assert_eq!(roll(x.view(), 1)[1], x[0]);
}

#[test]
fn test_baseline_window_mean_is_zero() {
    let mut trialwise = make_trialwise(traces(3, 60).view(), &[20, 20, 20]);
    baseline_subtract(&mut trialwise, 6);
    for trial in trialwise.outer_iter() {
        for cell in trial.outer_iter() {
            let mean = cell.slice(s![..6]).sum() / 6.0;
            assert!(mean.abs() < TOL);
        }
    }
}

#[test]
fn test_stim_align_mismatched_length_is_unchanged() {
    let trialwise = make_trialwise(traces(3, 40).view(), &[20, 20]);
    let (out, alignment) = stim_align(&trialwise, &[4.0, 5.0, 6.0, 7.0, 8.0], 10);
    assert_eq!(alignment, Alignment::Skipped);
    assert_eq!(out, trialwise);
}

#[test]
fn test_stim_align_per_cell_moves_stimulus_to_offset() {
    let mut trialwise = Array3::zeros((2, 2, 20));
    trialwise[[0, 0, 4]] = 1.0;
    trialwise[[1, 0, 4]] = 1.0;
    trialwise[[0, 1, 15]] = 1.0;
    trialwise[[1, 1, 15]] = 1.0;

    let (out, alignment) = stim_align(&trialwise, &[4.0, 15.0], 10);
    assert_eq!(alignment, Alignment::PerCell);
    for trial in 0..2 {
        for cell in 0..2 {
            assert_eq!(out[[trial, cell, 10]], 1.0);
        }
    }
}

#[test]
fn test_stim_align_per_trial_and_nan() {
    let mut trialwise = Array3::zeros((2, 3, 12));
    trialwise.slice_mut(s![0, .., 2]).fill(1.0);
    trialwise.slice_mut(s![1, .., 7]).fill(1.0);

    let (out, alignment) = stim_align(&trialwise, &[2.0, f64::NAN], 5);
    assert_eq!(alignment, Alignment::PerTrial);
    assert!(out.slice(s![0, .., 5]).iter().all(|v| *v == 1.0));
    // Unstimulated trial is not shifted
    assert!(out.slice(s![1, .., 7]).iter().all(|v| *v == 1.0));
    assert!(out.iter().all(|v| !v.is_nan()));
}

#[test]
fn test_cut_keeps_leading_frames() {
    let trialwise = make_trialwise(traces(2, 40).view(), &[20, 20]);
    let out = cut(&trialwise, 8);
    assert_eq!(out.dim(), (2, 2, 8));
    assert_eq!(out, trialwise.slice(s![.., .., ..8]));
    assert_eq!(cut(&trialwise, 100), trialwise);
}

#[test]
fn test_process_is_rerunnable() {
    let raw = traces(4, 90);
    let config = PostProcessConfig {
        fr: 10.0,
        normalizer: Normalizer::MinMax,
        align_to: 1.0,
        total_length: Some(2.5),
        stim_times: Some(vec![1.2, 1.5, f64::NAN]),
    };

    let first = process(raw.view(), &[30, 30, 30], &config).unwrap();
    let second = process(raw.view(), &[30, 30, 30], &config).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.alignment, Alignment::PerTrial);
    assert_eq!(first.traces.dim(), (4, 90));
    assert_eq!(first.psths.dim(), (3, 4, 25));
}

#[test]
fn test_process_without_stim_times() {
    let raw = traces(2, 40);
    let mut config = PostProcessConfig::new(10.0);
    config.normalizer = Normalizer::Norm;

    let out = process(raw.view(), &[25, 15], &config).unwrap();
    assert_eq!(out.alignment, Alignment::NotRequested);
    assert_eq!(out.psths.dim(), (2, 2, 15));
    for trial in out.psths.outer_iter() {
        for cell in trial.outer_iter() {
            let mean = cell.slice(s![..9]).sum() / 9.0;
            assert!(mean.abs() < TOL);
        }
    }
}

#[test]
fn test_far_off_stim_times_do_not_overflow() {
    let raw = traces(3, 40);
    let mut config = PostProcessConfig::new(10.0);
    config.stim_times = Some(vec![-1e300, 1.0]);

    let out = process(raw.view(), &[20, 20], &config).unwrap();
    assert_eq!(out.alignment, Alignment::PerTrial);
    assert!(out.psths.iter().all(|v| v.is_finite()));

    let trialwise = make_trialwise(traces(2, 40).view(), &[20, 20]);
    let (out, _) = stim_align(&trialwise, &[f64::INFINITY, f64::NEG_INFINITY], 5);
    assert_eq!(out, trialwise);
}

#[test]
fn test_stim_align_wraps_large_shifts() {
    let mut trialwise = Array3::zeros((1, 1, 10));
    trialwise[[0, 0, 3]] = 1.0;
    // 23 frames is 3 frames modulo the trial length
    let (out, _) = stim_align(&trialwise, &[23.0], 5);
    assert_eq!(out[[0, 0, 5]], 1.0);
}
