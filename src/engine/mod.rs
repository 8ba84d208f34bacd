pub mod estimator;
pub mod queue;
pub mod roi;
pub mod worker;

pub use estimator::{Estimates, Estimator, EstimatorFactory};
pub use queue::{plane_queue, PlaneMessage, PlaneReceiver, PlaneSender};
pub use roi::RoiMeanFactory;
pub use worker::{FrameErrorPolicy, PlaneInit, PlaneWorker, RawResult};
