use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use dispatch_core::{
    config::{RateLimitConfig, SchedulerConfig},
    errors::{DispatchError, DispatchResult},
    models::{entry_step, DispatchJob, Sequence},
    traits::{CoordinationStore, FlowJobRepository, JobSink},
};

use crate::device_cache::DeviceDirectory;
use crate::periodic::PeriodicTask;
use crate::selection::{DeviceLoadTable, DeviceSelector};

/// 单次调度周期的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// 本周期新入组的联系人数
    pub enrolled: u64,
    /// 超时被回收为失败的认领
    pub recovered: u64,
    pub claimed: u64,
    /// 无可用设备或被其他进程抢先认领的记录
    pub skipped: u64,
    pub errors: u64,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        *self == TickReport::default()
    }
}

/// 序列步骤调度器
///
/// 每个周期依次执行：入组、卡住认领的清理、负载快照、到期记录的认领与派发。
/// 多个进程可以同时运行，互斥只依赖持久化存储的条件更新。
pub struct SequenceStepScheduler {
    repo: Arc<dyn FlowJobRepository>,
    store: Arc<dyn CoordinationStore>,
    directory: Arc<DeviceDirectory>,
    sink: Arc<dyn JobSink>,
    selector: DeviceSelector,
    config: SchedulerConfig,
}

impl SequenceStepScheduler {
    pub fn new(
        repo: Arc<dyn FlowJobRepository>,
        store: Arc<dyn CoordinationStore>,
        directory: Arc<DeviceDirectory>,
        sink: Arc<dyn JobSink>,
        rate_limit: &RateLimitConfig,
        config: SchedulerConfig,
    ) -> Self {
        let selector = DeviceSelector::new(
            rate_limit.hourly_limit,
            rate_limit.daily_limit,
            config.preferred_soft_limit,
        );
        Self {
            repo,
            store,
            directory,
            sink,
            selector,
            config,
        }
    }

    pub async fn tick(&self) -> DispatchResult<TickReport> {
        self.tick_at(Utc::now()).await
    }

    #[instrument(skip(self))]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> DispatchResult<TickReport> {
        let started = Instant::now();
        let mut report = TickReport::default();

        self.enroll(now, &mut report).await;
        self.recover_stuck(now, &mut report).await;

        let in_flight = self.repo.in_flight_counts().await?;
        let mut loads =
            DeviceLoadTable::capture(&self.directory, self.store.as_ref(), &in_flight, now).await?;
        self.dispatch_due(now, &mut loads, &mut report).await?;

        metrics::histogram!("dispatch_tick_duration_ms", "queue" => "sequence")
            .record(started.elapsed().as_millis() as f64);
        Ok(report)
    }

    async fn enroll(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let sequences = match self.repo.active_sequences().await {
            Ok(sequences) => sequences,
            Err(e) => {
                error!("加载活跃序列失败: {}", e);
                report.errors += 1;
                return;
            }
        };

        for sequence in sequences {
            if !sequence.is_within_schedule(now, self.config.schedule_tolerance_minutes) {
                debug!(sequence_id = %sequence.id, "不在调度时间窗口内，跳过入组");
                continue;
            }
            if let Err(e) = self.enroll_sequence(&sequence, now, report).await {
                error!(sequence_id = %sequence.id, "序列入组失败: {}", e);
                report.errors += 1;
            }
        }
    }

    async fn enroll_sequence(
        &self,
        sequence: &Sequence,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> DispatchResult<()> {
        let steps = self.repo.sequence_steps(&sequence.id).await?;
        let Some(entry) = entry_step(&steps) else {
            debug!(sequence_id = %sequence.id, "序列没有步骤");
            return Ok(());
        };

        let candidates = self
            .repo
            .find_enrollment_candidates(&sequence.id, &entry.trigger)
            .await?;
        let mut enrolled = 0;
        for contact in candidates {
            match self
                .repo
                .enroll_contact(&sequence.id, &steps, &contact, now)
                .await
            {
                Ok(0) => {}
                Ok(_) => enrolled += 1,
                Err(e) => {
                    error!(sequence_id = %sequence.id, contact = %contact.phone, "联系人入组失败: {}", e);
                    report.errors += 1;
                }
            }
        }
        if enrolled > 0 {
            info!(sequence_id = %sequence.id, enrolled, "联系人已入组");
        }
        report.enrolled += enrolled;
        Ok(())
    }

    async fn recover_stuck(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let cutoff = now - ChronoDuration::seconds(self.config.stuck_timeout_seconds);
        match self.repo.release_stuck_claims(cutoff).await {
            Ok(count) => report.recovered += count,
            Err(e) => {
                error!("清理超时认领失败: {}", e);
                report.errors += 1;
            }
        }
    }

    async fn dispatch_due(
        &self,
        now: DateTime<Utc>,
        loads: &mut DeviceLoadTable,
        report: &mut TickReport,
    ) -> DispatchResult<()> {
        let slots = self.sink.available_slots() as u64;
        if slots == 0 {
            debug!("发送队列没有空闲槽位，本周期不认领");
            return Ok(());
        }
        let due = self.repo.find_due_jobs(now, self.config.batch_size).await?;
        if due.is_empty() {
            return Ok(());
        }
        debug!(due = due.len(), slots, devices = loads.len(), "开始派发到期记录");

        let mut taken = 0u64;
        for job in due {
            if taken >= slots {
                break;
            }
            let Some(device_id) = self
                .selector
                .select(loads, job.preferred_device_id.as_deref())
            else {
                report.skipped += 1;
                continue;
            };

            match self.repo.claim_job(&job.id, &device_id, now).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(job_id = %job.id, "记录已被其他进程认领");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(job_id = %job.id, "认领记录失败: {}", e);
                    report.errors += 1;
                    continue;
                }
            }
            loads.record_claim(&device_id);
            taken += 1;

            let dispatch_job = DispatchJob::from_flow_job(&job, &device_id);
            if let Err(e) = self.sink.submit(dispatch_job).await {
                warn!(job_id = %job.id, "提交到发送队列失败: {}", e);
                if let Err(mark_err) = self
                    .repo
                    .mark_failed(&job.id, &device_id, &e.to_string())
                    .await
                {
                    error!(job_id = %job.id, "回写失败状态失败: {}", mark_err);
                }
                report.errors += 1;
                if matches!(e, DispatchError::PoolClosed(_)) {
                    break;
                }
                continue;
            }
            report.claimed += 1;
        }

        metrics::counter!("dispatch_jobs_claimed_total", "queue" => "sequence")
            .increment(report.claimed);
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for SequenceStepScheduler {
    fn name(&self) -> &'static str {
        "sequence_scheduler"
    }

    async fn run_once(&self) -> DispatchResult<()> {
        let report = self.tick().await?;
        if !report.is_idle() {
            info!(
                enrolled = report.enrolled,
                recovered = report.recovered,
                claimed = report.claimed,
                skipped = report.skipped,
                errors = report.errors,
                "序列调度周期完成"
            );
        }
        Ok(())
    }
}
