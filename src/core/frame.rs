use anyhow::{anyhow, Result};
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// A single 2D image sample (rows × columns) for one plane
pub type Frame = Array2<f32>;

/// Time-ordered frames of one plane, stored as frames × rows × columns
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStack {
    data: Array3<f32>,
}

impl FrameStack {
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    pub fn empty(rows: usize, cols: usize) -> Self {
        Self {
            data: Array3::zeros((0, rows, cols)),
        }
    }

    /// Build a stack from individual frames; all frames must share one shape
    pub fn from_frames(frames: &[Frame]) -> Result<Self> {
        let first = frames
            .first()
            .ok_or_else(|| anyhow!("Cannot build a frame stack from zero frames"))?;
        let (rows, cols) = first.dim();
        let mut data = Array3::zeros((frames.len(), rows, cols));
        for (i, frame) in frames.iter().enumerate() {
            if frame.dim() != (rows, cols) {
                return Err(anyhow!(
                    "Frame {} has shape {:?}, expected {:?}",
                    i,
                    frame.dim(),
                    (rows, cols)
                ));
            }
            data.index_axis_mut(Axis(0), i).assign(frame);
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spatial dimensions (rows, columns)
    pub fn dims(&self) -> (usize, usize) {
        let (_, rows, cols) = self.data.dim();
        (rows, cols)
    }

    pub fn frame(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), index)
    }

    pub fn frames(&self) -> impl Iterator<Item = ArrayView2<'_, f32>> {
        self.data.outer_iter()
    }

    pub fn as_array(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn into_array(self) -> Array3<f32> {
        self.data
    }

    /// Keep only the first `len` frames
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.data = self.data.slice(s![..len, .., ..]).to_owned();
        }
    }

    /// Concatenate stacks along the time axis
    pub fn concat(stacks: &[FrameStack]) -> Result<Self> {
        let views: Vec<_> = stacks.iter().map(|s| s.data.view()).collect();
        let data = ndarray::concatenate(Axis(0), &views)
            .map_err(|e| anyhow!("Seed stacks have mismatched frame shapes: {}", e))?;
        Ok(Self { data })
    }

    /// Crop every frame to the window (clamped to the frame bounds)
    pub fn crop(&self, window: &CropWindow) -> Self {
        let (rows, cols) = self.dims();
        let w = window.clamp_to(rows, cols);
        Self {
            data: self
                .data
                .slice(s![.., w.y_start..w.y_end, w.x_start..w.x_end])
                .to_owned(),
        }
    }
}

/// Rectangular spatial crop in full-frame pixel coordinates (half-open ranges)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropWindow {
    pub x_start: usize,
    pub x_end: usize,
    pub y_start: usize,
    pub y_end: usize,
}

impl CropWindow {
    pub fn full(rows: usize, cols: usize) -> Self {
        Self {
            x_start: 0,
            x_end: cols,
            y_start: 0,
            y_end: rows,
        }
    }

    pub fn width(&self) -> usize {
        self.x_end.saturating_sub(self.x_start)
    }

    pub fn height(&self) -> usize {
        self.y_end.saturating_sub(self.y_start)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn clamp_to(&self, rows: usize, cols: usize) -> Self {
        let x_end = self.x_end.min(cols);
        let y_end = self.y_end.min(rows);
        Self {
            x_start: self.x_start.min(x_end),
            x_end,
            y_start: self.y_start.min(y_end),
            y_end,
        }
    }

    /// View of the cropped region of a full frame
    pub fn apply<'a>(&self, frame: ArrayView2<'a, f32>) -> ArrayView2<'a, f32> {
        let (rows, cols) = frame.dim();
        let w = self.clamp_to(rows, cols);
        frame.slice_move(s![w.y_start..w.y_end, w.x_start..w.x_end])
    }
}

/// Which raw frames of an interleaved acquisition belong to one plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneSampling {
    pub offset: usize,
    pub step: usize,
}

impl PlaneSampling {
    /// Frames are interleaved channel-fastest, then plane
    pub fn for_plane(plane: usize, nchannels: usize, nplanes: usize) -> Self {
        Self {
            offset: plane * nchannels,
            step: (nchannels * nplanes).max(1),
        }
    }

    pub fn indices(&self, total: usize) -> impl Iterator<Item = usize> {
        (self.offset..total).step_by(self.step.max(1))
    }

    pub fn count(&self, total: usize) -> usize {
        if total <= self.offset {
            0
        } else {
            (total - self.offset + self.step - 1) / self.step
        }
    }
}

/// Centre of mass of one cell in full-frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub x: f64,
    pub y: f64,
}
