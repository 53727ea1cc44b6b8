use async_trait::async_trait;

use crate::errors::DispatchResult;
use crate::models::DispatchJob;
use crate::reservation::Reservation;

/// 设备预约服务
#[async_trait]
pub trait DeviceReserver: Send + Sync {
    async fn reserve(&self, preferred_device_id: Option<&str>) -> DispatchResult<Reservation>;
}

/// 发送结果回写
#[async_trait]
pub trait JobOutcomeHandler: Send + Sync {
    async fn on_sent(&self, job: &DispatchJob, device_id: &str) -> DispatchResult<()>;

    async fn on_failed(&self, job: &DispatchJob, reason: &str) -> DispatchResult<()>;
}

/// 任务投递入口
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn submit(&self, job: DispatchJob) -> DispatchResult<()>;

    /// 当前可立即开始处理的任务数。调度器每个周期最多认领这么多记录，
    /// 认领时间因此与实际处理时间一致，不会在队列中等待到超时。
    fn available_slots(&self) -> usize;
}
