use crate::core::FrameStack;
use crate::sources::SpatialMasks;
use anyhow::Result;
use ndarray::{Array2, ArrayView2};
use serde::Serialize;

/// Snapshot of an estimator's internal state
#[derive(Debug, Clone, Serialize)]
pub struct Estimates {
    /// Denoised traces, cells × frame counter
    pub traces: Array2<f64>,
    /// Raw (undenoised) traces, cells × frame counter
    pub noisy_traces: Array2<f64>,
    /// Background components × frame counter
    pub background: Array2<f64>,
    /// Spatial footprints, pixels (column-major over `dims`) × cells
    pub spatial: Array2<f64>,
    /// Rows, cols of the cropped field of view
    pub dims: (usize, usize),
}

/// Stateful online source-extraction engine for one plane.
///
/// Frames arrive cropped, one at a time, tagged with the plane's frame
/// counter. Calls are blocking and must never run on the async control path.
pub trait Estimator: Send {
    fn fit_next(&mut self, t: usize, frame: ArrayView2<'_, f32>) -> Result<()>;

    fn estimates(&self) -> Estimates;
}

/// Builds an estimator from seed frames
pub trait EstimatorFactory: Send + Sync {
    fn name(&self) -> &str;

    /// One-time initialisation. `seed` is already cropped. Without `masks`
    /// the estimator runs unseeded. `capacity` bounds the frame counter.
    fn initialize(
        &self,
        seed: &FrameStack,
        masks: Option<&SpatialMasks>,
        capacity: usize,
    ) -> Result<Box<dyn Estimator>>;
}
