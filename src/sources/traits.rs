use crate::core::{FrameStack, PlaneSampling};
use crate::error::SourceError;
use std::path::{Path, PathBuf};

/// Decodes one plane's frames out of an acquisition file
pub trait FrameDecoder: Send + Sync {
    /// Glob pattern (relative to a session folder) matching acquisition files
    fn file_pattern(&self) -> &str;

    /// Read the frames selected by `sampling`, in acquisition order
    fn decode(&self, path: &Path, sampling: PlaneSampling) -> Result<FrameStack, SourceError>;
}

/// Asks the operator for seed files when none can be found automatically
pub trait FilePicker: Send + Sync {
    /// `None` when the operator cancelled or picked nothing
    fn pick_files(&self, hint: &Path) -> Option<Vec<PathBuf>>;
}
