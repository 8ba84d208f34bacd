//! Post-acquisition processing of concatenated per-cell traces.
//!
//! Every step is a pure function over `ndarray` arrays, so the whole pipeline
//! can be re-run on the same raw inputs (for example from `raw_data.json`)
//! and will produce the same output.

use crate::error::ConfigError;
use log::warn;
use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-cell normalization applied across the full time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalizer {
    /// Leave the min-subtracted traces untouched
    None,
    /// Scale into [0, 1]
    MinMax,
    /// Subtract mean, divide by population standard deviation
    ZScore,
    /// Divide by the L2 norm
    Norm,
    /// Mean/standard-deviation scaling
    Scale,
}

impl Normalizer {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::MinMax => "minmax",
            Self::ZScore => "zscore",
            Self::Norm => "norm",
            Self::Scale => "scale",
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::ZScore
    }
}

impl fmt::Display for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Normalizer {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "minmax" => Ok(Self::MinMax),
            "zscore" => Ok(Self::ZScore),
            "norm" => Ok(Self::Norm),
            "scale" => Ok(Self::Scale),
            other => Err(ConfigError::UnknownNormalizer(other.to_string())),
        }
    }
}

/// Inputs of the pipeline other than the raw traces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostProcessConfig {
    /// Per-plane frame rate in Hz
    pub fr: f64,
    pub normalizer: Normalizer,
    /// Where the stimulus should land after alignment, in seconds
    pub align_to: f64,
    /// Optional PSTH length in seconds
    pub total_length: Option<f64>,
    /// Stimulus times in seconds, one per cell or one per trial; NaN = unstimulated
    pub stim_times: Option<Vec<f64>>,
}

impl PostProcessConfig {
    pub fn new(fr: f64) -> Self {
        Self {
            fr,
            normalizer: Normalizer::default(),
            align_to: 1.0,
            total_length: None,
            stim_times: None,
        }
    }
}

/// How stimulus alignment was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alignment {
    NotRequested,
    PerCell,
    PerTrial,
    /// Stimulus list matched neither the cell nor the trial count
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedOutput {
    /// Normalized traces, cells × frames
    pub traces: Array2<f64>,
    /// Trial-windowed traces, trials × cells × time
    pub psths: Array3<f64>,
    pub alignment: Alignment,
}

/// Run min-subtract → normalize → trialize → align → baseline → cut
pub fn process(
    raw: ArrayView2<'_, f64>,
    trial_lengths: &[usize],
    config: &PostProcessConfig,
) -> Result<ProcessedOutput, ConfigError> {
    if !(config.fr.is_finite() && config.fr > 0.0) {
        return Err(ConfigError::InvalidValue {
            field: "fr",
            reason: format!("frame rate must be positive, got {}", config.fr),
        });
    }

    let data = min_subtract(raw);
    let traces = normalize(&data, config.normalizer);
    let mut trialwise = make_trialwise(traces.view(), trial_lengths);

    let new_start = seconds_to_frames(config.align_to, config.fr);
    let mut alignment = Alignment::NotRequested;
    if let Some(stim_times) = &config.stim_times {
        let stim_frames: Vec<f64> = stim_times.iter().map(|s| s * config.fr).collect();
        let (aligned, mode) = stim_align(&trialwise, &stim_frames, new_start);
        trialwise = aligned;
        alignment = mode;
    }

    baseline_subtract(&mut trialwise, new_start.saturating_sub(1));

    let psths = match config.total_length {
        Some(seconds) => cut(&trialwise, seconds_to_frames(seconds, config.fr)),
        None => trialwise,
    };

    Ok(ProcessedOutput {
        traces,
        psths,
        alignment,
    })
}

fn seconds_to_frames(seconds: f64, fr: f64) -> usize {
    let frames = seconds * fr;
    if frames.is_finite() && frames > 0.0 {
        frames as usize
    } else {
        0
    }
}

/// Subtract each cell's minimum so every row bottoms out at 0
pub fn min_subtract(traces: ArrayView2<'_, f64>) -> Array2<f64> {
    let mut out = traces.to_owned();
    for mut row in out.rows_mut() {
        let min = row.iter().copied().fold(f64::INFINITY, f64::min);
        if min.is_finite() {
            row.mapv_inplace(|v| v - min);
        }
    }
    out
}

/// Normalize each cell (row) independently across time
pub fn normalize(data: &Array2<f64>, method: Normalizer) -> Array2<f64> {
    let mut out = data.clone();
    if method == Normalizer::None || data.ncols() == 0 {
        return out;
    }

    for mut row in out.rows_mut() {
        match method {
            Normalizer::None => {}
            Normalizer::MinMax => {
                let min = row.iter().copied().fold(f64::INFINITY, f64::min);
                let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let range = non_zero(max - min);
                row.mapv_inplace(|v| (v - min) / range);
            }
            Normalizer::ZScore | Normalizer::Scale => {
                let (mean, std) = mean_std(row.view());
                let std = non_zero(std);
                row.mapv_inplace(|v| (v - mean) / std);
            }
            Normalizer::Norm => {
                let l2 = non_zero(row.iter().map(|v| v * v).sum::<f64>().sqrt());
                row.mapv_inplace(|v| v / l2);
            }
        }
    }
    out
}

// Zero scales divide by one instead of producing NaN
fn non_zero(scale: f64) -> f64 {
    if scale == 0.0 || !scale.is_finite() {
        1.0
    } else {
        scale
    }
}

fn mean_std(row: ArrayView1<'_, f64>) -> (f64, f64) {
    let n = row.len() as f64;
    let mean = row.sum() / n;
    let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Split cells × frames into trials × cells × time.
///
/// Split points are the cumulative trial lengths (the last length is
/// implied by the remaining frames). Every trial is truncated to the
/// shortest one.
pub fn make_trialwise(traces: ArrayView2<'_, f64>, trial_lengths: &[usize]) -> Array3<f64> {
    let n_cells = traces.nrows();
    let n_frames = traces.ncols();

    let mut bounds = vec![0usize];
    let mut acc = 0usize;
    for length in trial_lengths.iter().take(trial_lengths.len().saturating_sub(1)) {
        acc += length;
        bounds.push(acc.min(n_frames));
    }
    bounds.push(n_frames);

    let shortest = bounds
        .windows(2)
        .map(|w| w[1].saturating_sub(w[0]))
        .min()
        .unwrap_or(0);

    let n_trials = bounds.len() - 1;
    let mut out = Array3::zeros((n_trials, n_cells, shortest));
    for (i, w) in bounds.windows(2).enumerate() {
        out.index_axis_mut(Axis(0), i)
            .assign(&traces.slice(s![.., w[0]..w[0] + shortest]));
    }
    out
}

/// Circular shift: element `i` moves to `(i + shift) mod len`
pub fn roll(x: ArrayView1<'_, f64>, shift: isize) -> Array1<f64> {
    let len = x.len();
    let mut out = Array1::zeros(len);
    if len == 0 {
        return out;
    }
    let shift = shift.rem_euclid(len as isize) as usize;
    for (i, v) in x.iter().enumerate() {
        out[(i + shift) % len] = *v;
    }
    out
}

/// Roll each cell (or each trial) so its stimulus frame lands on `new_start`.
///
/// `stim_frames` must hold one entry per cell or one per trial; cell count
/// is checked first. NaN and infinite entries are left unshifted. Any other
/// length skips alignment with a warning and returns the input unchanged.
pub fn stim_align(
    trialwise: &Array3<f64>,
    stim_frames: &[f64],
    new_start: usize,
) -> (Array3<f64>, Alignment) {
    let (n_trials, n_cells, time) = trialwise.dim();
    // Reduced modulo the trial length in f64 so far-off stimulus frames cannot overflow
    let shift_for = |stim: f64| -> isize {
        if !stim.is_finite() || time == 0 {
            0
        } else {
            (new_start as f64 - stim.round()).rem_euclid(time as f64) as isize
        }
    };

    let mut aligned = trialwise.clone();
    if stim_frames.len() == n_cells {
        for mut trial in aligned.outer_iter_mut() {
            for (mut cell, stim) in trial.outer_iter_mut().zip(stim_frames) {
                let rolled = roll(cell.view(), shift_for(*stim));
                cell.assign(&rolled);
            }
        }
        (aligned, Alignment::PerCell)
    } else if stim_frames.len() == n_trials {
        for (mut trial, stim) in aligned.outer_iter_mut().zip(stim_frames) {
            let shift = shift_for(*stim);
            for mut cell in trial.outer_iter_mut() {
                let rolled = roll(cell.view(), shift);
                cell.assign(&rolled);
            }
        }
        (aligned, Alignment::PerTrial)
    } else {
        warn!(
            "{} stim times match neither the {} cells nor the {} trials, stim alignment not done",
            stim_frames.len(),
            n_cells,
            n_trials
        );
        (aligned, Alignment::Skipped)
    }
}

/// Subtract the mean of frames `[0, baseline_length)` from every trial/cell
pub fn baseline_subtract(trialwise: &mut Array3<f64>, baseline_length: usize) {
    let time = trialwise.len_of(Axis(2));
    let window = baseline_length.min(time);
    if window == 0 {
        warn!("Baseline window is empty, skipping baseline subtraction");
        return;
    }
    for mut trial in trialwise.outer_iter_mut() {
        for mut cell in trial.outer_iter_mut() {
            let baseline = cell.slice(s![..window]).sum() / window as f64;
            cell.mapv_inplace(|v| v - baseline);
        }
    }
}

/// Keep only the leading `length` frames of every trial
pub fn cut(trialwise: &Array3<f64>, length: usize) -> Array3<f64> {
    let keep = length.min(trialwise.len_of(Axis(2)));
    trialwise.slice(s![.., .., ..keep]).to_owned()
}
