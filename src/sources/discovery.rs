use crate::error::SourceError;
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const RUN_FOLDER_PREFIX: &str = "planestream";

fn matching_files(folder: &Path, pattern: &str) -> Result<Vec<PathBuf>, SourceError> {
    let full = folder.join(pattern);
    let full = full.to_string_lossy();
    let paths = glob::glob(&full).map_err(|e| SourceError::Unreadable {
        path: folder.to_path_buf(),
        reason: format!("bad file pattern '{}': {}", pattern, e),
    })?;
    Ok(paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect())
}

/// Acquisition files already present in the session folder, sorted by name
pub fn seed_files(folder: &Path, pattern: &str) -> Result<Vec<PathBuf>, SourceError> {
    let mut files = matching_files(folder, pattern)?;
    files.sort();
    debug!("Found {} seed candidates in {:?}", files.len(), folder);
    Ok(files)
}

/// Most recently modified acquisition file that is at least `min_bytes` long.
///
/// Undersized candidates are skipped in favour of the next-older one.
pub fn latest_acquisition(
    folder: &Path,
    pattern: &str,
    min_bytes: u64,
) -> Result<PathBuf, SourceError> {
    let mut candidates: Vec<(SystemTime, PathBuf)> = matching_files(folder, pattern)?
        .into_iter()
        .filter_map(|p| {
            let modified = fs::metadata(&p).and_then(|m| m.modified()).ok()?;
            Some((modified, p))
        })
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    for (_, path) in candidates {
        let size = fs::metadata(&path)?.len();
        if size < min_bytes {
            warn!(
                "Skipping {:?}: {} bytes is below the {} byte minimum",
                path, size, min_bytes
            );
            continue;
        }
        return Ok(path);
    }

    Err(SourceError::NoCandidates(folder.to_path_buf()))
}

/// Pick a fresh output folder inside the session folder.
///
/// The first run uses `planestream/`, later runs `planestream_002/`,
/// `planestream_003/` and so on, so earlier results are never overwritten.
pub fn run_folder(session_folder: &Path) -> Result<PathBuf, SourceError> {
    let highest = fs::read_dir(session_folder)?
        .filter_map(|e| e.ok())
        .filter_map(|e| run_number(&e.file_name().to_string_lossy()))
        .max();

    let name = match highest {
        None => RUN_FOLDER_PREFIX.to_string(),
        Some(n) => format!("{}_{:03}", RUN_FOLDER_PREFIX, n + 1),
    };
    Ok(session_folder.join(name))
}

/// `planestream` is run 1, `planestream_NNN` is run NNN
fn run_number(name: &str) -> Option<usize> {
    let rest = name.strip_prefix(RUN_FOLDER_PREFIX)?;
    if rest.is_empty() {
        return Some(1);
    }
    rest.strip_prefix('_')?.parse().ok()
}
