pub mod decoder;
pub mod picker;

pub use decoder::SimulatedDecoder;
pub use picker::StaticPicker;
