use crate::analysis::Normalizer;
use crate::core::CropWindow;
use crate::engine::FrameErrorPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Rig/operator settings, loaded once at startup from a JSON file.
///
/// Anything the acquisition controller does not send in SETUP falls back to
/// these values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub ip: String,
    pub port: u16,

    /// Extra location for final outputs (they always go to the session folder too)
    pub output_folder: Option<PathBuf>,

    /// Optional spatial seed masks (JSON, per plane list of cells)
    pub mask_path: Option<PathBuf>,

    pub x_start: usize,
    pub x_end: usize,
    pub y_start: usize,
    pub y_end: usize,

    /// Frame geometry of raw stack files
    pub frame_height: usize,
    pub frame_width: usize,

    /// Frame capacity pre-allocated by each plane's estimator
    pub num_frames_max: usize,

    /// Trials with fewer frames per plane are dropped
    pub min_trial_frames: usize,

    /// Candidate files smaller than this are skipped when resolving the latest acquisition
    pub min_acq_file_bytes: u64,

    /// Wait before opening a just-finished acquisition file
    pub acq_settle_ms: u64,

    /// Always ask the operator for seed files instead of globbing the session folder
    pub use_picker: bool,

    /// Log plane throughput every N frames
    pub report_every: usize,

    pub normalizer: Normalizer,
    pub align_to: f64,
    pub total_length: Option<f64>,

    pub frame_error_policy: FrameErrorPolicy,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 6000,
            output_folder: None,
            mask_path: None,
            x_start: 0,
            x_end: 512,
            y_start: 0,
            y_end: 512,
            frame_height: 512,
            frame_width: 512,
            num_frames_max: 200_000,
            min_trial_frames: 15,
            min_acq_file_bytes: 1,
            acq_settle_ms: 500,
            use_picker: false,
            report_every: 500,
            normalizer: Normalizer::ZScore,
            align_to: 1.0,
            total_length: None,
            frame_error_policy: FrameErrorPolicy::Skip,
        }
    }
}

impl ServerSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        let settings: ServerSettings =
            serde_json::from_str(&json).context("Failed to parse settings JSON")?;
        Ok(settings)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn crop(&self) -> CropWindow {
        CropWindow {
            x_start: self.x_start,
            x_end: self.x_end,
            y_start: self.y_start,
            y_end: self.y_end,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.acq_settle_ms)
    }
}
