use super::FilePicker;
use log::warn;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

/// Prompts on the terminal for a comma-separated list of seed files
pub struct ConsolePicker;

impl FilePicker for ConsolePicker {
    fn pick_files(&self, hint: &Path) -> Option<Vec<PathBuf>> {
        eprint!("Select seed image file(s) near {:?} (comma separated): ", hint);
        let _ = io::stderr().flush();

        let mut line = String::new();
        if let Err(e) = io::stdin().lock().read_line(&mut line) {
            warn!("Could not read seed file selection: {}", e);
            return None;
        }

        let files: Vec<PathBuf> = line
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();

        if files.is_empty() {
            None
        } else {
            Some(files)
        }
    }
}
