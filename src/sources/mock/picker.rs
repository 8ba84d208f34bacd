use crate::sources::FilePicker;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Answers every pick request with a fixed selection
pub struct StaticPicker {
    selection: Option<Vec<PathBuf>>,
    calls: AtomicUsize,
}

impl StaticPicker {
    pub fn new(selection: Option<Vec<PathBuf>>) -> Self {
        Self {
            selection,
            calls: AtomicUsize::new(0),
        }
    }

    /// Picker that behaves like an operator closing the dialog
    pub fn cancelled() -> Self {
        Self::new(None)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl FilePicker for StaticPicker {
    fn pick_files(&self, _hint: &Path) -> Option<Vec<PathBuf>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.selection.clone()
    }
}
