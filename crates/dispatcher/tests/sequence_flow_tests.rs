mod support;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dispatch_core::{
    errors::{DispatchError, DispatchResult},
    models::{
        Contact, DispatchJob, DueFlowJob, FlowJob, FlowJobStatus, JobContext, MessagePayload,
        QueueKind, Sequence, SequenceStep,
    },
    traits::{FlowJobRepository, HealthFlagStore, JobOutcomeHandler, MessageSender},
};
use dispatch_dispatcher::{SequenceOutcomeHandler, SequenceStepScheduler, TickReport};
use dispatch_infrastructure::{DatabaseManager, InMemoryCoordinationStore, SqlFlowJobRepository};
use dispatch_worker::{DispatchWorkerPool, PacingPolicy};
use chrono::DateTime;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use support::{
    database, directory, rate_limit, reservation_service, scheduler_config, RecordingSender,
    RecordingSink, SEED,
};

struct Harness {
    _db: DatabaseManager,
    repo: Arc<SqlFlowJobRepository>,
    store: Arc<InMemoryCoordinationStore>,
    sink: Arc<RecordingSink>,
    scheduler: SequenceStepScheduler,
    handler: SequenceOutcomeHandler,
}

async fn harness() -> Result<Harness> {
    let db = database(SEED).await?;
    let repo = db.flow_job_repository();
    let store = Arc::new(InMemoryCoordinationStore::new());
    let sink = Arc::new(RecordingSink::default());
    let scheduler = SequenceStepScheduler::new(
        repo.clone(),
        store.clone(),
        directory(&["dev-a", "dev-b"]),
        sink.clone(),
        &rate_limit(80, 800),
        scheduler_config(),
    );
    let handler = SequenceOutcomeHandler::new(repo.clone());
    Ok(Harness {
        _db: db,
        repo,
        store,
        sink,
        scheduler,
        handler,
    })
}

fn sequence_of(job: &DispatchJob) -> &str {
    match &job.context {
        JobContext::Sequence { sequence_id, .. } => sequence_id,
        JobContext::Campaign { .. } => panic!("unexpected campaign job"),
    }
}

/// 按派发时选中的设备确认发送成功
async fn confirm_all(handler: &SequenceOutcomeHandler, jobs: &[DispatchJob]) -> Result<()> {
    for job in jobs {
        let device = job.preferred_device_id.as_deref().expect("device");
        handler.on_sent(job, device).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_tick_enrolls_and_dispatches_entry_steps() -> Result<()> {
    let h = harness().await?;

    let report = h.scheduler.tick().await?;
    assert_eq!(report.enrolled, 2);
    assert_eq!(report.claimed, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.errors, 0);

    let jobs = h.sink.take();
    assert_eq!(jobs.len(), 2);
    for job in &jobs {
        assert_eq!(job.queue, QueueKind::Sequence);
        assert_eq!(sequence_of(job), "seq-a");
        assert_eq!(job.payload.content, "hello");
        let stored = h.repo.get_job(&job.id).await?.expect("job");
        assert_eq!(stored.status, FlowJobStatus::Active);
        assert_eq!(stored.processing_device_id, job.preferred_device_id);
    }

    // 历史设备优先，其余联系人分配到负载最低的设备
    let bob = jobs.iter().find(|j| j.recipient == "60200").expect("bob");
    assert_eq!(bob.preferred_device_id.as_deref(), Some("dev-b"));
    let alice = jobs.iter().find(|j| j.recipient == "60100").expect("alice");
    assert_eq!(alice.preferred_device_id.as_deref(), Some("dev-a"));

    // 已认领的记录不会重复派发，也不会重复入组
    assert!(h.scheduler.tick().await?.is_idle());
    assert!(h.sink.take().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_jobs_wait_when_no_device_has_capacity() -> Result<()> {
    let h = harness().await?;
    let ttl = std::time::Duration::from_secs(60);
    h.store.disable("dev-a", ttl).await?;
    h.store.disable("dev-b", ttl).await?;

    let report = h.scheduler.tick().await?;
    assert_eq!(report.enrolled, 2);
    assert_eq!(report.claimed, 0);
    assert_eq!(report.skipped, 2);
    assert!(h.sink.take().is_empty());

    let due = h.repo.find_due_jobs(Utc::now(), 100).await?;
    assert_eq!(due.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_stuck_claims_recovered_as_failed() -> Result<()> {
    let h = harness().await?;
    let now = Utc::now();
    assert_eq!(h.scheduler.tick_at(now).await?.claimed, 2);
    let jobs = h.sink.take();

    let later = h.scheduler.tick_at(now + Duration::minutes(6)).await?;
    assert_eq!(
        later,
        TickReport {
            recovered: 2,
            ..TickReport::default()
        }
    );

    for job in &jobs {
        let stored = h.repo.get_job(&job.id).await?.expect("job");
        assert_eq!(stored.status, FlowJobStatus::Failed);
        assert_eq!(stored.processing_device_id, None);
        assert_eq!(stored.error_message.as_deref(), Some("processing timeout"));
    }
    Ok(())
}

#[tokio::test]
async fn test_claims_limited_to_free_slots() -> Result<()> {
    let h = harness().await?;
    h.sink.set_slots(1);

    let report = h.scheduler.tick().await?;
    assert_eq!(report.enrolled, 2);
    assert_eq!(report.claimed, 1);
    assert_eq!(h.sink.take().len(), 1);
    assert_eq!(h.repo.find_due_jobs(Utc::now(), 100).await?.len(), 1);

    // 没有空闲槽位时不认领，记录保持未认领状态
    h.sink.set_slots(0);
    assert!(h.scheduler.tick().await?.is_idle());
    assert!(h.sink.take().is_empty());

    h.sink.set_slots(4);
    assert_eq!(h.scheduler.tick().await?.claimed, 1);
    Ok(())
}

#[tokio::test]
async fn test_late_outcome_after_recovery_does_not_chain() -> Result<()> {
    let h = harness().await?;
    let now = Utc::now();
    assert_eq!(h.scheduler.tick_at(now).await?.claimed, 2);
    let jobs = h.sink.take();
    assert_eq!(h.scheduler.tick_at(now + Duration::minutes(6)).await?.recovered, 2);

    confirm_all(&h.handler, &jobs).await?;
    h.handler.on_failed(&jobs[0], "gateway error").await?;

    for job in &jobs {
        let stored = h.repo.get_job(&job.id).await?.expect("job");
        assert_eq!(stored.status, FlowJobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("processing timeout"));
        assert_eq!(stored.sent_device_id, None);
    }
    assert!(h.repo.find_due_jobs(now + Duration::days(2), 100).await?.is_empty());
    let alice = h.repo.get_contact("60100").await?.expect("alice");
    assert_eq!(alice.triggers, "welcome");
    assert_eq!(alice.preferred_device_id, None);
    Ok(())
}

/// 发送阻塞在闸门上，直到测试放行
struct GatedSender {
    gate: Semaphore,
    sent: Mutex<Vec<String>>,
}

impl GatedSender {
    fn closed() -> Self {
        Self {
            gate: Semaphore::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MessageSender for GatedSender {
    async fn send(
        &self,
        _device_id: &str,
        recipient: &str,
        _payload: &MessagePayload,
    ) -> DispatchResult<()> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        self.sent.lock().unwrap().push(recipient.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_busy_pool_never_lets_queued_claims_time_out() -> Result<()> {
    let db = database(SEED).await?;
    let repo = db.flow_job_repository();
    let store = Arc::new(InMemoryCoordinationStore::new());
    let devices = directory(&["dev-a", "dev-b"]);
    let limits = rate_limit(80, 800);
    let sender = Arc::new(GatedSender::closed());

    let pool = Arc::new(
        DispatchWorkerPool::builder(QueueKind::Sequence)
            .workers(1)
            .pacing(PacingPolicy::none())
            .build(
                Arc::new(reservation_service(store.clone(), devices.clone(), &limits)),
                sender.clone(),
                Arc::new(SequenceOutcomeHandler::new(repo.clone())),
            ),
    );
    pool.start();
    let scheduler = SequenceStepScheduler::new(
        repo.clone(),
        store.clone(),
        devices,
        pool.clone(),
        &limits,
        scheduler_config(),
    );

    // 单个 worker 只认领一条，另一条留在数据库中
    let now = Utc::now();
    let report = scheduler.tick_at(now).await?;
    assert_eq!(report.enrolled, 2);
    assert_eq!(report.claimed, 1);

    // 正在发送的认领超时被回收，worker 仍忙，不再认领
    let later = scheduler.tick_at(now + Duration::minutes(6)).await?;
    assert_eq!(later.recovered, 1);
    assert_eq!(later.claimed, 0);

    sender.gate.add_permits(8);
    pool.shutdown().await;

    let sent = sender.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);

    // 迟到的发送结果不覆盖失败状态，也不推进到第二步
    let waiting = repo.find_due_jobs(now + Duration::days(2), 100).await?;
    assert_eq!(waiting.len(), 1);
    assert_ne!(waiting[0].contact_phone, sent[0]);
    assert_eq!(waiting[0].current_trigger, "welcome");
    assert!(repo.in_flight_counts().await?.is_empty());
    let recovered = repo.get_contact(&sent[0]).await?.expect("contact");
    assert!(recovered.has_trigger("welcome"));
    Ok(())
}

#[tokio::test]
async fn test_failed_send_is_recorded() -> Result<()> {
    let h = harness().await?;
    h.scheduler.tick().await?;
    let job = h.sink.take().remove(0);

    h.handler.on_failed(&job, "no available device").await?;

    let stored = h.repo.get_job(&job.id).await?.expect("job");
    assert_eq!(stored.status, FlowJobStatus::Failed);
    assert_eq!(stored.processing_device_id, None);
    assert_eq!(stored.error_message.as_deref(), Some("no available device"));
    Ok(())
}

#[tokio::test]
async fn test_chaining_hands_off_to_next_sequence_once() -> Result<()> {
    let h = harness().await?;

    // 第一步
    h.scheduler.tick().await?;
    let first = h.sink.take();
    confirm_all(&h.handler, &first).await?;
    let alice = h.repo.get_contact("60100").await?.expect("alice");
    assert_eq!(alice.preferred_device_id.as_deref(), Some("dev-a"));

    // 同一序列的下一步立即到期
    let report = h.scheduler.tick().await?;
    assert_eq!(report.enrolled, 0);
    assert_eq!(report.claimed, 2);
    let second = h.sink.take();
    assert!(second.iter().all(|j| j.payload.content == "day two"));
    confirm_all(&h.handler, &second).await?;

    let alice = h.repo.get_contact("60100").await?.expect("alice");
    assert_eq!(alice.triggers, "followup");
    let bob = h.repo.get_contact("60200").await?.expect("bob");
    assert_eq!(bob.triggers, "promo,followup");
    for job in first.iter().chain(second.iter()) {
        let stored = h.repo.get_job(&job.id).await?.expect("job");
        assert_eq!(stored.status, FlowJobStatus::Sent);
    }

    // 下一个周期转入 seq-b
    let report = h.scheduler.tick().await?;
    assert_eq!(report.enrolled, 2);
    assert_eq!(report.claimed, 2);
    let third = h.sink.take();
    assert!(third.iter().all(|j| sequence_of(j) == "seq-b"));
    confirm_all(&h.handler, &third).await?;

    let alice = h.repo.get_contact("60100").await?.expect("alice");
    assert_eq!(alice.triggers, "");
    let bob = h.repo.get_contact("60200").await?.expect("bob");
    assert_eq!(bob.triggers, "promo");

    // 不会再次入组
    assert!(h.scheduler.tick().await?.is_idle());
    assert!(h
        .repo
        .find_enrollment_candidates("seq-b", "followup")
        .await?
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn test_worker_pool_drives_jobs_to_sent() -> Result<()> {
    let db = database(SEED).await?;
    let repo = db.flow_job_repository();
    let store = Arc::new(InMemoryCoordinationStore::new());
    let devices = directory(&["dev-a", "dev-b"]);
    let limits = rate_limit(80, 800);
    let sender = Arc::new(RecordingSender::default());

    let pool = Arc::new(
        DispatchWorkerPool::builder(QueueKind::Sequence)
            .workers(2)
            .pacing(PacingPolicy::none())
            .build(
                Arc::new(reservation_service(store.clone(), devices.clone(), &limits)),
                sender.clone(),
                Arc::new(SequenceOutcomeHandler::new(repo.clone())),
            ),
    );
    pool.start();

    let scheduler = SequenceStepScheduler::new(
        repo.clone(),
        store.clone(),
        devices,
        pool.clone(),
        &limits,
        scheduler_config(),
    );
    let report = scheduler.tick().await?;
    assert_eq!(report.claimed, 2);
    pool.shutdown().await;

    let mut sent = sender.sent.lock().unwrap().clone();
    sent.sort();
    assert_eq!(
        sent,
        vec![
            ("dev-a".to_string(), "60100".to_string()),
            ("dev-b".to_string(), "60200".to_string()),
        ]
    );

    // 第二步已激活，可在下一个周期派发
    let due = repo.find_due_jobs(Utc::now(), 100).await?;
    assert_eq!(due.len(), 2);
    assert!(due.iter().all(|j| j.current_trigger == "welcome_day2"));
    Ok(())
}

/// 为指定联系人入组时返回数据库错误，其余委托给真实仓储
struct FailingEnrollment {
    inner: Arc<SqlFlowJobRepository>,
    broken_phone: &'static str,
}

#[async_trait]
impl FlowJobRepository for FailingEnrollment {
    async fn active_sequences(&self) -> DispatchResult<Vec<Sequence>> {
        self.inner.active_sequences().await
    }

    async fn sequence_steps(&self, sequence_id: &str) -> DispatchResult<Vec<SequenceStep>> {
        self.inner.sequence_steps(sequence_id).await
    }

    async fn find_enrollment_candidates(
        &self,
        sequence_id: &str,
        entry_trigger: &str,
    ) -> DispatchResult<Vec<Contact>> {
        self.inner
            .find_enrollment_candidates(sequence_id, entry_trigger)
            .await
    }

    async fn enroll_contact(
        &self,
        sequence_id: &str,
        steps: &[SequenceStep],
        contact: &Contact,
        now: DateTime<Utc>,
    ) -> DispatchResult<u64> {
        if contact.phone == self.broken_phone {
            return Err(DispatchError::Internal("deadlock detected".to_string()));
        }
        self.inner.enroll_contact(sequence_id, steps, contact, now).await
    }

    async fn release_stuck_claims(&self, cutoff: DateTime<Utc>) -> DispatchResult<u64> {
        self.inner.release_stuck_claims(cutoff).await
    }

    async fn in_flight_counts(&self) -> DispatchResult<HashMap<String, i64>> {
        self.inner.in_flight_counts().await
    }

    async fn find_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> DispatchResult<Vec<DueFlowJob>> {
        self.inner.find_due_jobs(now, limit).await
    }

    async fn claim_job(&self, id: &str, device_id: &str, now: DateTime<Utc>) -> DispatchResult<bool> {
        self.inner.claim_job(id, device_id, now).await
    }

    async fn mark_sent(
        &self,
        id: &str,
        claimed_device_id: &str,
        sent_device_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        self.inner
            .mark_sent(id, claimed_device_id, sent_device_id, now)
            .await
    }

    async fn mark_failed(&self, id: &str, claimed_device_id: &str, reason: &str) -> DispatchResult<bool> {
        self.inner.mark_failed(id, claimed_device_id, reason).await
    }

    async fn activate_next_step(
        &self,
        sequence_id: &str,
        contact_phone: &str,
        next_trigger: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        self.inner
            .activate_next_step(sequence_id, contact_phone, next_trigger, now)
            .await
    }

    async fn complete_contact(
        &self,
        sequence_id: &str,
        contact_phone: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<u64> {
        self.inner.complete_contact(sequence_id, contact_phone, now).await
    }

    async fn get_contact(&self, phone: &str) -> DispatchResult<Option<Contact>> {
        self.inner.get_contact(phone).await
    }

    async fn update_contact_triggers(&self, phone: &str, triggers: &str) -> DispatchResult<()> {
        self.inner.update_contact_triggers(phone, triggers).await
    }

    async fn find_entry_sequence(&self, trigger: &str) -> DispatchResult<Option<Sequence>> {
        self.inner.find_entry_sequence(trigger).await
    }

    async fn get_job(&self, id: &str) -> DispatchResult<Option<FlowJob>> {
        self.inner.get_job(id).await
    }
}

#[tokio::test]
async fn test_enrollment_error_skips_only_that_contact() -> Result<()> {
    let db = database(SEED).await?;
    let repo = Arc::new(FailingEnrollment {
        inner: db.flow_job_repository(),
        broken_phone: "60100",
    });
    let sink = Arc::new(RecordingSink::default());
    let scheduler = SequenceStepScheduler::new(
        repo.clone(),
        Arc::new(InMemoryCoordinationStore::new()),
        directory(&["dev-a", "dev-b"]),
        sink.clone(),
        &rate_limit(80, 800),
        scheduler_config(),
    );

    let report = scheduler.tick().await?;
    assert_eq!(report.enrolled, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(report.claimed, 1);
    let jobs = sink.take();
    assert_eq!(jobs[0].recipient, "60200");
    Ok(())
}
