use super::estimator::{Estimator, EstimatorFactory};
use super::queue::{PlaneMessage, PlaneReceiver};
use crate::analysis::centers_of_mass;
use crate::core::{Centroid, CropWindow, FrameStack};
use crate::observability::PlaneMetrics;
use crate::sources::SpatialMasks;
use crate::storage;
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// What the drain loop does when the estimator rejects a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameErrorPolicy {
    /// Log, count, advance the frame counter and keep draining
    Skip,
    /// Stop draining and fail the plane
    Propagate,
}

impl Default for FrameErrorPolicy {
    fn default() -> Self {
        Self::Skip
    }
}

/// Per-plane worker parameters
#[derive(Debug, Clone)]
pub struct PlaneInit {
    pub plane: usize,
    pub crop: CropWindow,
    pub capacity: usize,
    pub report_every: usize,
    pub error_policy: FrameErrorPolicy,
    /// Where to snapshot estimator state on Stop
    pub state_dir: Option<PathBuf>,
}

/// Final output of one plane
#[derive(Debug, Clone, Serialize)]
pub struct RawResult {
    pub plane: usize,
    /// Frame counter after the last streamed frame
    pub t: usize,
    /// cells × streamed frames
    pub traces: Array2<f64>,
    pub noisy_traces: Array2<f64>,
    pub residuals: Array2<f64>,
    pub background: Array2<f64>,
    pub trial_lengths: Vec<usize>,
    pub dims: (usize, usize),
    pub centroids: Vec<Centroid>,
}

impl RawResult {
    pub fn n_cells(&self) -> usize {
        self.traces.nrows()
    }

    pub fn n_frames(&self) -> usize {
        self.traces.ncols()
    }
}

pub struct PlaneWorker {
    init: PlaneInit,
    crop: CropWindow,
    estimator: Box<dyn Estimator>,
    receiver: PlaneReceiver,
    metrics: Arc<PlaneMetrics>,
    cancel: Arc<AtomicBool>,
    t: usize,
    frame_start: usize,
    trial_start: Option<usize>,
    trial_lengths: Vec<usize>,
}

impl PlaneWorker {
    /// Crop the seed batch and run the estimator's one-time initialisation.
    ///
    /// Blocking and expensive: call from a blocking thread.
    pub fn initialize(
        init: PlaneInit,
        seed: &FrameStack,
        masks: Option<&SpatialMasks>,
        factory: &dyn EstimatorFactory,
        receiver: PlaneReceiver,
        metrics: Arc<PlaneMetrics>,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self> {
        let (rows, cols) = seed.dims();
        let crop = init.crop.clamp_to(rows, cols);
        if crop.is_empty() {
            return Err(anyhow!(
                "Plane {}: crop window {:?} leaves nothing of the {}x{} frames",
                init.plane,
                init.crop,
                rows,
                cols
            ));
        }

        let started = Instant::now();
        let seed = seed.crop(&crop);
        let estimator = factory
            .initialize(&seed, masks, init.capacity)
            .with_context(|| format!("Plane {}: {} initialisation failed", init.plane, factory.name()))?;
        info!(
            "Plane {}: {} initialised from {} seed frames in {:.1}s",
            init.plane,
            factory.name(),
            seed.len(),
            started.elapsed().as_secs_f64()
        );

        let t = seed.len() + 1;
        Ok(Self {
            init,
            crop,
            estimator,
            receiver,
            metrics,
            cancel,
            t,
            frame_start: t,
            trial_start: None,
            trial_lengths: Vec::new(),
        })
    }

    pub fn plane(&self) -> usize {
        self.init.plane
    }

    /// Frame counter the next streamed frame will get
    pub fn t(&self) -> usize {
        self.t
    }

    /// Drain the queue until Stop, then finalize.
    ///
    /// Blocks on the queue; run on a dedicated thread.
    pub fn drain(mut self) -> Result<RawResult> {
        let plane = self.init.plane;
        info!("Plane {}: draining frames from t = {}", plane, self.t);

        let report_every = self.init.report_every.max(1);
        let mut window_start = Instant::now();
        let mut window_frames = 0usize;

        while let Some(msg) = self.receiver.recv() {
            match msg {
                PlaneMessage::Frame { data, index } => {
                    if self.cancel.load(Ordering::Acquire) {
                        self.metrics.record_frame_dropped();
                        continue;
                    }

                    let start = self.metrics.start_processing();
                    let frame = self.crop.apply(data.view());
                    match self.estimator.fit_next(self.t, frame) {
                        Ok(()) => {
                            self.metrics.finish_processing(start);
                            self.metrics.record_frame_processed();
                        }
                        Err(e) => {
                            self.metrics.record_error();
                            match self.init.error_policy {
                                FrameErrorPolicy::Skip => {
                                    warn!("Plane {}: frame {} (t = {}) skipped: {:#}", plane, index, self.t, e)
                                }
                                FrameErrorPolicy::Propagate => {
                                    return Err(e.context(format!(
                                        "Plane {}: frame {} (t = {}) failed",
                                        plane, index, self.t
                                    )));
                                }
                            }
                        }
                    }
                    self.t += 1;

                    window_frames += 1;
                    if window_frames == report_every {
                        let elapsed = window_start.elapsed().as_secs_f64();
                        let per_frame = elapsed / window_frames as f64;
                        info!(
                            "Plane {}: t = {}, {:.1} ms/frame ({:.1} Hz)",
                            plane,
                            self.t,
                            per_frame * 1000.0,
                            if per_frame > 0.0 { 1.0 / per_frame } else { 0.0 }
                        );
                        window_start = Instant::now();
                        window_frames = 0;
                    }
                }
                PlaneMessage::TrialStart => {
                    if self.trial_start.is_some() {
                        warn!("Plane {}: trial started twice, restarting at t = {}", plane, self.t);
                    }
                    self.trial_start = Some(self.t + 1);
                }
                PlaneMessage::TrialEnd => {
                    let end = self.t + 1;
                    match self.trial_start.take() {
                        Some(start) => {
                            let length = end - start;
                            debug!("Plane {}: trial {} ended, {} frames", plane, self.trial_lengths.len(), length);
                            self.trial_lengths.push(length);
                            self.metrics.record_trial();
                        }
                        None => warn!("Plane {}: trial end without a start at t = {}", plane, self.t),
                    }
                }
                PlaneMessage::Stop => {
                    info!("Plane {}: stop received at t = {}", plane, self.t);
                    return Ok(self.finalize());
                }
            }
        }

        Err(anyhow!("Plane {} queue closed before Stop", plane))
    }

    fn finalize(self) -> RawResult {
        let plane = self.init.plane;
        let estimates = self.estimator.estimates();

        if let Some(dir) = &self.init.state_dir {
            match storage::save_engine_state(dir, plane, &estimates) {
                Ok(path) => info!("Plane {}: estimator state saved to {:?}", plane, path),
                Err(e) => warn!("Plane {}: could not save estimator state: {:#}", plane, e),
            }
        }

        let traces = frame_window(&estimates.traces, self.frame_start, self.t);
        let noisy_traces = frame_window(&estimates.noisy_traces, self.frame_start, self.t);
        let residuals = &noisy_traces - &traces;
        let background = frame_window(&estimates.background, self.frame_start, self.t);
        let centroids = centers_of_mass(estimates.spatial.view(), estimates.dims, &self.crop);

        RawResult {
            plane,
            t: self.t,
            traces,
            noisy_traces,
            residuals,
            background,
            trial_lengths: self.trial_lengths,
            dims: estimates.dims,
            centroids,
        }
    }
}

/// Columns `[start, end)`, zero-padded where the estimator has no data
fn frame_window(data: &Array2<f64>, start: usize, end: usize) -> Array2<f64> {
    let width = end.saturating_sub(start);
    let mut out = Array2::zeros((data.nrows(), width));
    let available = data.ncols().min(end);
    if available > start {
        out.slice_mut(s![.., ..available - start])
            .assign(&data.slice(s![.., start..available]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_frame_window_pads_missing_columns() {
        let data = array![[1.0, 2.0, 3.0, 4.0]];
        let out = frame_window(&data, 2, 6);
        assert_eq!(out, array![[3.0, 4.0, 0.0, 0.0]]);
        assert_eq!(frame_window(&data, 5, 3).ncols(), 0);
    }
}
