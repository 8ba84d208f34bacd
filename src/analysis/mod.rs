pub mod postprocess;
pub mod spatial;

pub use postprocess::{process, Alignment, Normalizer, PostProcessConfig, ProcessedOutput};
pub use spatial::centers_of_mass;
