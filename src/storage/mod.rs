pub mod npy;
pub mod output;

pub use npy::write_npy;
pub use output::{save_engine_state, CentroidRow, OutputWriter, RawOutput};
