//! 分发调度层
//!
//! - [`DeviceReservationService`] - 首选设备优先、按负载排序的设备预约
//! - [`DeviceDirectory`] / [`DeviceCache`] - 定期刷新的在线设备缓存
//! - [`DeviceHealthMonitor`] - 高负载设备的临时禁用
//! - [`SequenceStepScheduler`] / [`SequenceOutcomeHandler`] - 序列入组、认领派发与链式推进
//! - [`CampaignDispatcher`] / [`CampaignOutcomeHandler`] - 活动广播消息的认领与回写
//! - [`run_periodic`] - 可取消的周期任务驱动

pub mod campaign;
pub mod device_cache;
pub mod health;
pub mod periodic;
pub mod reservation;
pub mod selection;
pub mod sequence;

pub use campaign::{CampaignDispatcher, CampaignOutcomeHandler};
pub use device_cache::{DeviceCache, DeviceDirectory};
pub use health::{DeviceHealthMonitor, HealthReport};
pub use periodic::{run_periodic, PeriodicTask};
pub use reservation::DeviceReservationService;
pub use selection::{DeviceLoadTable, DeviceSelector};
pub use sequence::{SequenceOutcomeHandler, SequenceStepScheduler, TickReport};
