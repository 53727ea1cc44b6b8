pub mod broadcast;
pub mod device;
pub mod flow_job;
pub mod job;
pub mod sequence;
pub mod window;
pub mod worker_status;

pub use broadcast::{BroadcastMessage, BroadcastStatus};
pub use device::{DeviceInfo, DeviceLoad, DeviceStats, DeviceStatus};
pub use flow_job::{DueFlowJob, FlowJob, FlowJobStatus, FAR_FUTURE_TRIGGER_TIME};
pub use job::{DispatchJob, JobContext, MessagePayload, PacingRange, QueueKind};
pub use sequence::{entry_step, join_triggers, split_triggers, Contact, Sequence, SequenceStep};
pub use window::WindowKind;
pub use worker_status::{WorkerActivity, WorkerStatus};
