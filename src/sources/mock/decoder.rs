use crate::core::{FrameStack, PlaneSampling};
use crate::error::SourceError;
use crate::sources::FrameDecoder;
use ndarray::Array3;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// In-memory stand-in for an acquisition file reader.
///
/// Files are registered with a raw (all planes and channels interleaved)
/// frame count and produce deterministic pixel values. Files that were never
/// registered behave like an acquisition the external writer has not
/// finished: they are unreadable.
pub struct SimulatedDecoder {
    rows: usize,
    cols: usize,
    files: Mutex<HashMap<PathBuf, usize>>,
}

impl SimulatedDecoder {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, path: impl Into<PathBuf>, raw_frames: usize) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.into(), raw_frames);
        }
    }

    /// Pixel value of raw frame `index` at (`y`, `x`)
    pub fn pixel(index: usize, y: usize, x: usize) -> f32 {
        100.0 + (index % 7) as f32 * 10.0 + y as f32 + x as f32 * 0.5
    }
}

impl FrameDecoder for SimulatedDecoder {
    fn file_pattern(&self) -> &str {
        "*.sim"
    }

    fn decode(&self, path: &Path, sampling: PlaneSampling) -> Result<FrameStack, SourceError> {
        let total = {
            let files = self.files.lock().map_err(|_| SourceError::Unreadable {
                path: path.to_path_buf(),
                reason: "simulated file table poisoned".to_string(),
            })?;
            *files.get(path).ok_or_else(|| SourceError::Unreadable {
                path: path.to_path_buf(),
                reason: "file is still open in the acquisition writer".to_string(),
            })?
        };

        let indices: Vec<usize> = sampling.indices(total).collect();
        let data = Array3::from_shape_fn((indices.len(), self.rows, self.cols), |(i, y, x)| {
            Self::pixel(indices[i], y, x)
        });
        Ok(FrameStack::new(data))
    }
}
