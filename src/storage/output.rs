use super::npy::write_npy;
use crate::analysis::ProcessedOutput;
use crate::core::Centroid;
use crate::engine::Estimates;
use anyhow::{Context, Result};
use log::info;
use ndarray::{Array2, Array3, Axis};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const RAW_JSON: &str = "raw_data.json";
pub const RAW_NPY: &str = "traces.npy";
pub const PSTH_JSON: &str = "traces_data.json";
pub const PSTH_NPY: &str = "psths.npy";
pub const NORMALIZED_NPY: &str = "normalized.npy";
pub const CENTROIDS_JSON: &str = "centroids.json";
pub const CENTROIDS_CSV: &str = "centroids.csv";

/// Everything needed to redo post-processing later
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
    /// Concatenated traces, cells × frames
    pub traces: Array2<f64>,
    pub trial_lengths: Vec<usize>,
    /// Time of every accepted trial
    pub trialtimes: Vec<String>,
    /// Time of every ACQDONE, accepted or not
    pub trialtimes_all: Vec<String>,
    /// LOG event values per key, in arrival order
    pub log: BTreeMap<String, Vec<Value>>,
}

#[derive(Serialize)]
struct RawJson<'a> {
    c: Vec<Vec<f64>>,
    splits: &'a [usize],
    trialtimes: &'a [String],
    trialtimes_all: &'a [String],
    log: &'a BTreeMap<String, Vec<Value>>,
}

#[derive(Serialize)]
struct PsthJson {
    traces: Vec<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CentroidRow {
    pub plane: usize,
    pub cell: usize,
    pub x: f64,
    pub y: f64,
}

fn nested2(a: &Array2<f64>) -> Vec<Vec<f64>> {
    a.outer_iter().map(|row| row.to_vec()).collect()
}

fn nested3(a: &Array3<f64>) -> Vec<Vec<Vec<f64>>> {
    a.outer_iter().map(|m| m.outer_iter().map(|row| row.to_vec()).collect()).collect()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string(value).context("Failed to serialize output")?;
    fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create {:?}", path))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write a row to {:?}", path))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {:?}", path))
}

/// Writes session outputs into one or more folders
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dirs: Vec<PathBuf>,
}

impl OutputWriter {
    /// `primary` always receives outputs, `extra` too when set
    pub fn new(primary: PathBuf, extra: Option<PathBuf>) -> Self {
        let mut dirs = vec![primary];
        if let Some(extra) = extra {
            if !dirs.contains(&extra) {
                dirs.push(extra);
            }
        }
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    fn each_dir(&self, mut write: impl FnMut(&Path) -> Result<()>) -> Result<()> {
        for dir in &self.dirs {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
            write(dir)?;
        }
        Ok(())
    }

    pub fn save_raw(&self, raw: &RawOutput) -> Result<()> {
        let json = RawJson {
            c: nested2(&raw.traces),
            splits: &raw.trial_lengths,
            trialtimes: &raw.trialtimes,
            trialtimes_all: &raw.trialtimes_all,
            log: &raw.log,
        };
        self.each_dir(|dir| {
            write_json(&dir.join(RAW_JSON), &json)?;
            write_npy(&dir.join(RAW_NPY), &raw.traces)?;
            info!("Raw traces saved to {:?}", dir);
            Ok(())
        })
    }

    pub fn save_processed(&self, processed: &ProcessedOutput) -> Result<()> {
        let json = PsthJson {
            traces: nested3(&processed.psths),
        };
        self.each_dir(|dir| {
            write_json(&dir.join(PSTH_JSON), &json)?;
            write_npy(&dir.join(PSTH_NPY), &processed.psths)?;
            write_npy(&dir.join(NORMALIZED_NPY), &processed.traces)?;
            info!(
                "PSTHs saved to {:?} ({} trials × {} cells × {} frames)",
                dir,
                processed.psths.len_of(Axis(0)),
                processed.psths.len_of(Axis(1)),
                processed.psths.len_of(Axis(2))
            );
            Ok(())
        })
    }

    /// Centroid table, one row per cell, planes in order
    pub fn save_centroids(&self, planes: &[(usize, Vec<Centroid>)]) -> Result<()> {
        let rows: Vec<CentroidRow> = planes
            .iter()
            .flat_map(|(plane, centroids)| {
                centroids.iter().enumerate().map(move |(cell, c)| CentroidRow {
                    plane: *plane,
                    cell,
                    x: c.x,
                    y: c.y,
                })
            })
            .collect();

        self.each_dir(|dir| {
            write_json(&dir.join(CENTROIDS_JSON), &rows)?;
            write_csv(&dir.join(CENTROIDS_CSV), &rows)
        })
    }
}

/// Snapshot one plane's estimator state as JSON inside `dir`
pub fn save_engine_state(dir: &Path, plane: usize, estimates: &Estimates) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    let path = dir.join(format!("engine_plane_{}.json", plane));
    write_json(&path, estimates)?;
    Ok(path)
}
