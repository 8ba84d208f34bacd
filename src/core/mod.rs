pub mod frame;

pub use frame::{Centroid, CropWindow, Frame, FrameStack, PlaneSampling};
