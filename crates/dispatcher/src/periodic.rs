use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use dispatch_core::errors::DispatchResult;

/// 可被周期调度的单步任务
///
/// `run_once` 执行一次完整的工作，测试中直接调用即可得到确定的结果；
/// [`run_periodic`] 负责按间隔驱动并响应关闭信号。
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_once(&self) -> DispatchResult<()>;
}

/// 按固定间隔驱动任务，直到收到关闭信号
///
/// 单次执行失败只记录日志，下一个周期继续。正在执行的一次不会被打断，
/// 关闭信号在下一次循环时生效。
pub async fn run_periodic(
    task: Arc<dyn PeriodicTask>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let name = task.name();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(task = name, "周期任务启动，间隔 {:?}", period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                debug!(task = name, "执行周期任务");
                if let Err(e) = task.run_once().await {
                    error!(task = name, "周期任务执行失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!(task = name, "周期任务收到关闭信号");
                break;
            }
        }
    }
}
