pub mod discovery;
pub mod masks;
pub mod mock;
pub mod picker;
pub mod raw;
pub mod traits;

pub use masks::SpatialMasks;
pub use picker::ConsolePicker;
pub use raw::RawStackDecoder;
pub use traits::{FilePicker, FrameDecoder};

use crate::core::{FrameStack, PlaneSampling};
use crate::error::SourceError;
use log::warn;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Seed files with fewer frames per plane are ignored
pub const MIN_SEED_FRAMES: usize = 5;

/// Frames of one trial, split per plane
#[derive(Debug, Clone)]
pub struct TrialFrames {
    planes: Vec<FrameStack>,
}

impl TrialFrames {
    /// Frames per plane (taken from the first plane)
    pub fn len(&self) -> usize {
        self.planes.first().map(FrameStack::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn planes(&self) -> &[FrameStack] {
        &self.planes
    }

    pub fn into_planes(self) -> Vec<FrameStack> {
        self.planes
    }
}

/// Turns acquisition files into per-plane frame sequences for one session
#[derive(Clone)]
pub struct FrameSource {
    decoder: Arc<dyn FrameDecoder>,
    nplanes: usize,
    nchannels: usize,
    min_trial_frames: usize,
}

impl FrameSource {
    pub fn new(
        decoder: Arc<dyn FrameDecoder>,
        nplanes: usize,
        nchannels: usize,
        min_trial_frames: usize,
    ) -> Self {
        Self {
            decoder,
            nplanes,
            nchannels,
            min_trial_frames,
        }
    }

    pub fn file_pattern(&self) -> &str {
        self.decoder.file_pattern()
    }

    pub fn sampling(&self, plane: usize) -> PlaneSampling {
        PlaneSampling::for_plane(plane, self.nchannels, self.nplanes)
    }

    pub fn read_plane(&self, path: &Path, plane: usize) -> Result<FrameStack, SourceError> {
        self.decoder.decode(path, self.sampling(plane))
    }

    /// Decode every plane of a finished trial.
    ///
    /// The first plane is decoded and length-checked before the others so a
    /// short trial costs a single read. A partial trailing volume is dropped,
    /// so every plane ends up with the same number of frames.
    pub fn read_trial(&self, path: &Path) -> Result<TrialFrames, SourceError> {
        let first = self.read_plane(path, 0)?;
        self.check_length(first.len())?;

        let mut planes = Vec::with_capacity(self.nplanes);
        planes.push(first);
        for plane in 1..self.nplanes {
            planes.push(self.read_plane(path, plane)?);
        }

        let volumes = planes.iter().map(FrameStack::len).min().unwrap_or(0);
        for stack in planes.iter_mut() {
            stack.truncate(volumes);
        }
        self.check_length(volumes)?;
        Ok(TrialFrames { planes })
    }

    fn check_length(&self, frames: usize) -> Result<(), SourceError> {
        if frames < self.min_trial_frames {
            return Err(SourceError::TooShort {
                frames,
                min: self.min_trial_frames,
            });
        }
        Ok(())
    }

    /// Concatenate one plane's frames from all usable seed files
    pub fn read_seed(&self, files: &[PathBuf], plane: usize) -> Result<FrameStack, SourceError> {
        let mut stacks = Vec::new();
        for file in files {
            let stack = self.read_plane(file, plane)?;
            if stack.len() < MIN_SEED_FRAMES {
                warn!(
                    "Seed file {:?} has only {} frames for plane {}, skipping it",
                    file,
                    stack.len(),
                    plane
                );
                continue;
            }
            stacks.push(stack);
        }

        if stacks.is_empty() {
            let folder = files
                .first()
                .and_then(|f| f.parent())
                .map(Path::to_path_buf)
                .unwrap_or_default();
            return Err(SourceError::NoCandidates(folder));
        }

        FrameStack::concat(&stacks).map_err(|e| SourceError::Unreadable {
            path: files[0].clone(),
            reason: e.to_string(),
        })
    }
}
