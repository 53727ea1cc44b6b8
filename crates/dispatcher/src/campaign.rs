//! 活动广播消息的派发
//!
//! 与序列调度共用相同的周期和超时配置：先把超时的处理中消息标记为失败，
//! 再按计划时间认领到期消息并提交到活动发送队列。

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use dispatch_core::{
    config::SchedulerConfig,
    errors::{DispatchError, DispatchResult},
    models::DispatchJob,
    traits::{BroadcastRepository, JobOutcomeHandler, JobSink},
};

use crate::periodic::PeriodicTask;
use crate::sequence::TickReport;

pub struct CampaignDispatcher {
    repo: Arc<dyn BroadcastRepository>,
    sink: Arc<dyn JobSink>,
    config: SchedulerConfig,
}

impl CampaignDispatcher {
    pub fn new(
        repo: Arc<dyn BroadcastRepository>,
        sink: Arc<dyn JobSink>,
        config: SchedulerConfig,
    ) -> Self {
        Self { repo, sink, config }
    }

    pub async fn tick(&self) -> DispatchResult<TickReport> {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> DispatchResult<TickReport> {
        let started = Instant::now();
        let mut report = TickReport::default();

        let cutoff = now - ChronoDuration::seconds(self.config.stuck_timeout_seconds);
        match self.repo.release_stuck_messages(cutoff).await {
            Ok(count) => report.recovered = count,
            Err(e) => {
                error!("清理超时广播消息失败: {}", e);
                report.errors += 1;
            }
        }

        let slots = self.sink.available_slots();
        if slots == 0 {
            debug!("活动发送队列没有空闲槽位，本周期不认领");
            return Ok(report);
        }
        let limit = self
            .config
            .batch_size
            .min(i64::try_from(slots).unwrap_or(i64::MAX));
        let due = self.repo.find_due_messages(now, limit).await?;
        for message in due {
            match self.repo.claim_message(&message.id, now).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(message_id = %message.id, "消息已被其他进程认领");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(message_id = %message.id, "认领广播消息失败: {}", e);
                    report.errors += 1;
                    continue;
                }
            }

            if let Err(e) = self.sink.submit(DispatchJob::from_broadcast(&message)).await {
                warn!(message_id = %message.id, "提交到发送队列失败: {}", e);
                if let Err(mark_err) = self
                    .repo
                    .mark_message_failed(&message.id, &e.to_string())
                    .await
                {
                    error!(message_id = %message.id, "回写失败状态失败: {}", mark_err);
                }
                report.errors += 1;
                if matches!(e, DispatchError::PoolClosed(_)) {
                    break;
                }
                continue;
            }
            report.claimed += 1;
        }

        metrics::counter!("dispatch_jobs_claimed_total", "queue" => "campaign")
            .increment(report.claimed);
        metrics::histogram!("dispatch_tick_duration_ms", "queue" => "campaign")
            .record(started.elapsed().as_millis() as f64);
        Ok(report)
    }
}

#[async_trait]
impl PeriodicTask for CampaignDispatcher {
    fn name(&self) -> &'static str {
        "campaign_dispatcher"
    }

    async fn run_once(&self) -> DispatchResult<()> {
        let report = self.tick().await?;
        if !report.is_idle() {
            info!(
                recovered = report.recovered,
                claimed = report.claimed,
                skipped = report.skipped,
                errors = report.errors,
                "广播派发周期完成"
            );
        }
        Ok(())
    }
}

/// 广播消息的结果回写
pub struct CampaignOutcomeHandler {
    repo: Arc<dyn BroadcastRepository>,
}

impl CampaignOutcomeHandler {
    pub fn new(repo: Arc<dyn BroadcastRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl JobOutcomeHandler for CampaignOutcomeHandler {
    async fn on_sent(&self, job: &DispatchJob, device_id: &str) -> DispatchResult<()> {
        self.repo
            .mark_message_sent(&job.id, device_id, Utc::now())
            .await?;
        Ok(())
    }

    async fn on_failed(&self, job: &DispatchJob, reason: &str) -> DispatchResult<()> {
        self.repo.mark_message_failed(&job.id, reason).await?;
        Ok(())
    }
}
