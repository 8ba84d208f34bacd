use super::FrameDecoder;
use crate::core::{FrameStack, PlaneSampling};
use crate::error::SourceError;
use memmap2::Mmap;
use ndarray::Array3;
use std::fs::File;
use std::path::Path;

const BYTES_PER_SAMPLE: usize = 2;

/// Headerless stacks of little-endian `i16` frames with a fixed geometry.
///
/// The file is memory-mapped and only the frames of the requested plane are
/// converted. A size that is not a whole number of frames means the writer
/// has not finished the file yet.
pub struct RawStackDecoder {
    rows: usize,
    cols: usize,
}

impl RawStackDecoder {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    fn frame_bytes(&self) -> usize {
        self.rows * self.cols * BYTES_PER_SAMPLE
    }
}

impl FrameDecoder for RawStackDecoder {
    fn file_pattern(&self) -> &str {
        "*.raw"
    }

    fn decode(&self, path: &Path, sampling: PlaneSampling) -> Result<FrameStack, SourceError> {
        let unreadable = |reason: String| SourceError::Unreadable {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| unreadable(e.to_string()))?;
        // SAFETY: the map is read-only and dropped before returning
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| unreadable(e.to_string()))?;

        let frame_bytes = self.frame_bytes();
        if frame_bytes == 0 {
            return Err(unreadable("frame geometry is empty".to_string()));
        }
        if mmap.len() % frame_bytes != 0 {
            return Err(SourceError::Truncated {
                path: path.to_path_buf(),
            });
        }

        let total = mmap.len() / frame_bytes;
        let count = sampling.count(total);
        let mut data = Array3::<f32>::zeros((count, self.rows, self.cols));

        for (out_idx, raw_idx) in sampling.indices(total).enumerate() {
            let bytes = &mmap[raw_idx * frame_bytes..(raw_idx + 1) * frame_bytes];
            let mut frame = data.index_axis_mut(ndarray::Axis(0), out_idx);
            for (dst, chunk) in frame.iter_mut().zip(bytes.chunks_exact(BYTES_PER_SAMPLE)) {
                *dst = i16::from_le_bytes([chunk[0], chunk[1]]) as f32;
            }
        }

        Ok(FrameStack::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_stack(path: &Path, frames: usize, rows: usize, cols: usize) {
        let mut bytes = Vec::new();
        for f in 0..frames {
            for p in 0..rows * cols {
                bytes.extend_from_slice(&((f * 10 + p) as i16).to_le_bytes());
            }
        }
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_decode_selects_plane_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trial_00001.raw");
        write_stack(&path, 6, 2, 3);

        let decoder = RawStackDecoder::new(2, 3);
        let stack = decoder
            .decode(&path, PlaneSampling::for_plane(1, 1, 2))
            .unwrap();

        assert_eq!(stack.len(), 3);
        assert_eq!(stack.dims(), (2, 3));
        assert_eq!(stack.frame(0)[[0, 0]], 10.0);
        assert_eq!(stack.frame(2)[[1, 2]], 55.0);
    }

    #[test]
    fn test_partial_file_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trial_00002.raw");
        fs::write(&path, vec![0u8; 13]).unwrap();

        let decoder = RawStackDecoder::new(2, 3);
        let err = decoder
            .decode(&path, PlaneSampling::for_plane(0, 1, 1))
            .unwrap_err();
        assert!(matches!(err, SourceError::Truncated { .. }));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let decoder = RawStackDecoder::new(2, 2);
        let err = decoder
            .decode(Path::new("/nonexistent/trial.raw"), PlaneSampling::for_plane(0, 1, 1))
            .unwrap_err();
        assert!(matches!(err, SourceError::Unreadable { .. }));
    }
}
