use super::estimator::{Estimates, Estimator, EstimatorFactory};
use crate::core::FrameStack;
use crate::sources::SpatialMasks;
use anyhow::{anyhow, Result};
use log::{debug, info};
use ndarray::{Array2, ArrayView2};

const DEFAULT_TILE: usize = 32;

/// Reference estimator: each cell's trace is the mean of its pixels minus the
/// mean of all pixels outside every cell.
///
/// With seed masks the masks define the cells, otherwise the field of view is
/// tiled into `tile × tile` squares.
#[derive(Debug, Clone)]
pub struct RoiMeanFactory {
    tile: usize,
}

impl RoiMeanFactory {
    pub fn new(tile: usize) -> Self {
        Self { tile: tile.max(1) }
    }
}

impl Default for RoiMeanFactory {
    fn default() -> Self {
        Self::new(DEFAULT_TILE)
    }
}

impl EstimatorFactory for RoiMeanFactory {
    fn name(&self) -> &str {
        "roi-mean"
    }

    fn initialize(
        &self,
        seed: &FrameStack,
        masks: Option<&SpatialMasks>,
        capacity: usize,
    ) -> Result<Box<dyn Estimator>> {
        let dims = seed.dims();
        if dims.0 == 0 || dims.1 == 0 {
            return Err(anyhow!("Seed frames have an empty field of view"));
        }
        if seed.len() > capacity {
            return Err(anyhow!(
                "{} seed frames exceed the {} frame capacity",
                seed.len(),
                capacity
            ));
        }

        let cells = match masks {
            Some(masks) => {
                let cells: Vec<Vec<(usize, usize)>> = masks
                    .cells()
                    .iter()
                    .map(|pixels| {
                        pixels
                            .iter()
                            .copied()
                            .filter(|(y, x)| *y < dims.0 && *x < dims.1)
                            .collect::<Vec<_>>()
                    })
                    .filter(|pixels| !pixels.is_empty())
                    .collect();
                info!("Seeding with {} masked cells", cells.len());
                cells
            }
            None => tile_cells(dims, self.tile),
        };
        if cells.is_empty() {
            return Err(anyhow!("No cells to track"));
        }

        let mut estimator = RoiMeanEstimator::new(dims, cells, capacity);
        for (t, frame) in seed.frames().enumerate() {
            estimator.fit_next(t, frame)?;
        }
        debug!(
            "Initialised {} cells over {:?} from {} seed frames",
            estimator.cells.len(),
            dims,
            seed.len()
        );
        Ok(Box::new(estimator))
    }
}

fn tile_cells(dims: (usize, usize), tile: usize) -> Vec<Vec<(usize, usize)>> {
    let (rows, cols) = dims;
    let mut cells = Vec::new();
    for x0 in (0..cols).step_by(tile) {
        for y0 in (0..rows).step_by(tile) {
            let mut pixels = Vec::new();
            for x in x0..(x0 + tile).min(cols) {
                for y in y0..(y0 + tile).min(rows) {
                    pixels.push((y, x));
                }
            }
            cells.push(pixels);
        }
    }
    cells
}

#[derive(Debug, Clone, Default)]
struct FrameFit {
    noisy: Vec<f64>,
    background: f64,
}

struct RoiMeanEstimator {
    dims: (usize, usize),
    cells: Vec<Vec<(usize, usize)>>,
    outside: Vec<(usize, usize)>,
    capacity: usize,
    fits: Vec<FrameFit>,
}

impl RoiMeanEstimator {
    fn new(dims: (usize, usize), cells: Vec<Vec<(usize, usize)>>, capacity: usize) -> Self {
        let mut covered = Array2::from_elem(dims, false);
        for &(y, x) in cells.iter().flatten() {
            covered[[y, x]] = true;
        }
        let outside = covered
            .indexed_iter()
            .filter(|(_, c)| !**c)
            .map(|(idx, _)| idx)
            .collect();

        Self {
            dims,
            cells,
            outside,
            capacity,
            fits: Vec::new(),
        }
    }
}

fn mean_of(frame: &ArrayView2<'_, f32>, pixels: &[(usize, usize)]) -> f64 {
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: f64 = pixels.iter().map(|&(y, x)| frame[[y, x]] as f64).sum();
    sum / pixels.len() as f64
}

impl Estimator for RoiMeanEstimator {
    fn fit_next(&mut self, t: usize, frame: ArrayView2<'_, f32>) -> Result<()> {
        if t >= self.capacity {
            return Err(anyhow!(
                "Frame {} exceeds the {} frame capacity",
                t,
                self.capacity
            ));
        }
        if frame.dim() != self.dims {
            return Err(anyhow!(
                "Frame is {:?}, expected {:?}",
                frame.dim(),
                self.dims
            ));
        }

        let fit = FrameFit {
            noisy: self.cells.iter().map(|c| mean_of(&frame, c)).collect(),
            background: mean_of(&frame, &self.outside),
        };
        if t >= self.fits.len() {
            self.fits.resize(t + 1, FrameFit::default());
        }
        self.fits[t] = fit;
        Ok(())
    }

    fn estimates(&self) -> Estimates {
        let n_cells = self.cells.len();
        let n_frames = self.fits.len();
        let mut noisy = Array2::zeros((n_cells, n_frames));
        let mut traces = Array2::zeros((n_cells, n_frames));
        let mut background = Array2::zeros((1, n_frames));

        for (t, fit) in self.fits.iter().enumerate() {
            // Gap columns (counter values never fitted) stay zero
            if fit.noisy.is_empty() {
                continue;
            }
            background[[0, t]] = fit.background;
            for (c, v) in fit.noisy.iter().enumerate() {
                noisy[[c, t]] = *v;
                traces[[c, t]] = v - fit.background;
            }
        }

        let (rows, _) = self.dims;
        let mut spatial = Array2::zeros((self.dims.0 * self.dims.1, n_cells));
        for (c, pixels) in self.cells.iter().enumerate() {
            for &(y, x) in pixels {
                spatial[[x * rows + y, c]] = 1.0;
            }
        }

        Estimates {
            traces,
            noisy_traces: noisy,
            background,
            spatial,
            dims: self.dims,
        }
    }
}
