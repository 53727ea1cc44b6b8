pub mod http_sender;
pub mod pacing;
pub mod pool;
pub mod status;

pub use http_sender::HttpMessageSender;
pub use pacing::{DelaySource, PacingPolicy, RandomDelaySource, SeededDelaySource};
pub use pool::{DispatchWorkerPool, DispatchWorkerPoolBuilder, NO_DEVICE_REASON};
pub use status::WorkerStatusBoard;
