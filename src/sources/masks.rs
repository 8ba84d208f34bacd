use crate::core::CropWindow;
use anyhow::{anyhow, Context, Result};
use log::info;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct MaskFile {
    /// planes → cells → `[y, x]` full-frame pixels
    planes: Vec<Vec<Vec<[usize; 2]>>>,
}

/// Externally supplied cell footprints for one plane, in cropped coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialMasks {
    dims: (usize, usize),
    cells: Vec<Vec<(usize, usize)>>,
}

impl SpatialMasks {
    pub fn load(path: &Path, plane: usize, crop: &CropWindow) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read spatial masks from {:?}", path))?;
        let file: MaskFile =
            serde_json::from_str(&json).context("Failed to parse spatial mask JSON")?;
        let cells = file
            .planes
            .into_iter()
            .nth(plane)
            .ok_or_else(|| anyhow!("Mask file {:?} has no entry for plane {}", path, plane))?;

        let masks = Self::from_full_frame(cells, crop);
        info!("Plane {}: found {} sources in seed masks", plane, masks.n_cells());
        Ok(masks)
    }

    /// Crop full-frame `[y, x]` footprints; cells left without pixels are dropped
    pub fn from_full_frame(cells: Vec<Vec<[usize; 2]>>, crop: &CropWindow) -> Self {
        let cells = cells
            .into_iter()
            .map(|pixels| {
                pixels
                    .into_iter()
                    .filter(|[y, x]| {
                        (crop.y_start..crop.y_end).contains(y)
                            && (crop.x_start..crop.x_end).contains(x)
                    })
                    .map(|[y, x]| (y - crop.y_start, x - crop.x_start))
                    .collect::<Vec<_>>()
            })
            .filter(|pixels| !pixels.is_empty())
            .collect();

        Self {
            dims: (crop.height(), crop.width()),
            cells,
        }
    }

    pub fn dims(&self) -> (usize, usize) {
        self.dims
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// `(row, col)` pixels of each cell
    pub fn cells(&self) -> &[Vec<(usize, usize)>] {
        &self.cells
    }
}
