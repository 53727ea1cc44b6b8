use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use dispatch_core::{
    errors::{DispatchError, DispatchResult},
    models::{DispatchJob, JobContext, MessagePayload, PacingRange, QueueKind},
    traits::{
        CoordinationStore, DeviceLock, DeviceReserver, JobOutcomeHandler, JobSink, MessageSender,
        ReservationScript, ReserveRequest,
    },
    Reservation,
};
use dispatch_infrastructure::InMemoryCoordinationStore;
use dispatch_worker::{DispatchWorkerPool, PacingPolicy, SeededDelaySource, NO_DEVICE_REASON};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Tries the preferred device, then the listed devices in order
struct FakeReserver {
    store: Arc<InMemoryCoordinationStore>,
    devices: Vec<String>,
}

#[async_trait]
impl DeviceReserver for FakeReserver {
    async fn reserve(&self, preferred: Option<&str>) -> DispatchResult<Reservation> {
        let candidates = preferred
            .map(str::to_string)
            .into_iter()
            .chain(self.devices.iter().cloned());
        for device_id in candidates {
            let request = ReserveRequest {
                device_id: device_id.clone(),
                token: Uuid::new_v4().to_string(),
                lock_ttl: Duration::from_secs(30),
                hourly_limit: 1000,
                daily_limit: 10_000,
                at: Utc::now(),
            };
            if self.store.try_reserve(&request).await?.is_reserved() {
                let store: Arc<dyn CoordinationStore> = self.store.clone();
                return Ok(Reservation::new(
                    device_id,
                    request.token,
                    Utc::now(),
                    0,
                    0,
                    store,
                ));
            }
        }
        Err(DispatchError::NoDeviceAvailable("all devices busy".to_string()))
    }
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
    fail_for: Option<String>,
    panic_for: Option<String>,
    delay: Duration,
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(
        &self,
        device_id: &str,
        recipient: &str,
        _payload: &MessagePayload,
    ) -> DispatchResult<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panic_for.as_deref() == Some(recipient) {
            panic!("sender crashed");
        }
        if self.fail_for.as_deref() == Some(recipient) {
            return Err(DispatchError::Transport("gateway rejected".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((device_id.to_string(), recipient.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingOutcome {
    sent: Mutex<Vec<(String, String)>>,
    failed: Mutex<Vec<(String, String)>>,
    calls: AtomicUsize,
}

#[async_trait]
impl JobOutcomeHandler for RecordingOutcome {
    async fn on_sent(&self, job: &DispatchJob, device_id: &str) -> DispatchResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap()
            .push((job.id.clone(), device_id.to_string()));
        Ok(())
    }

    async fn on_failed(&self, job: &DispatchJob, reason: &str) -> DispatchResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.failed
            .lock()
            .unwrap()
            .push((job.id.clone(), reason.to_string()));
        Ok(())
    }
}

fn job(id: &str, recipient: &str, preferred: Option<&str>) -> DispatchJob {
    DispatchJob {
        id: id.to_string(),
        queue: QueueKind::Campaign,
        recipient: recipient.to_string(),
        recipient_name: None,
        preferred_device_id: preferred.map(str::to_string),
        payload: MessagePayload {
            message_type: "text".to_string(),
            content: "hello".to_string(),
            media_url: None,
        },
        pacing: None,
        context: JobContext::Campaign {
            campaign_id: "c1".to_string(),
        },
    }
}

struct Harness {
    store: Arc<InMemoryCoordinationStore>,
    sender: Arc<RecordingSender>,
    outcome: Arc<RecordingOutcome>,
    pool: DispatchWorkerPool,
}

fn harness(devices: &[&str], sender: RecordingSender, workers: usize) -> Harness {
    let store = Arc::new(InMemoryCoordinationStore::new());
    let reserver = Arc::new(FakeReserver {
        store: Arc::clone(&store),
        devices: devices.iter().map(|d| d.to_string()).collect(),
    });
    let sender = Arc::new(sender);
    let outcome = Arc::new(RecordingOutcome::default());
    let pool = DispatchWorkerPool::builder(QueueKind::Campaign)
        .workers(workers)
        .capacity(8)
        .pacing(PacingPolicy::none())
        .build(reserver, sender.clone(), outcome.clone());
    Harness {
        store,
        sender,
        outcome,
        pool,
    }
}

#[tokio::test]
async fn test_job_sent_on_preferred_device_and_released() -> Result<()> {
    let h = harness(&["d1", "d2"], RecordingSender::default(), 1);
    h.pool.start();
    h.pool.submit(job("j1", "60100", Some("d2"))).await?;
    h.pool.shutdown().await;

    assert_eq!(
        *h.sender.sent.lock().unwrap(),
        vec![("d2".to_string(), "60100".to_string())]
    );
    assert_eq!(
        *h.outcome.sent.lock().unwrap(),
        vec![("j1".to_string(), "d2".to_string())]
    );
    assert!(!h.store.is_held("d2").await?);

    let statuses = h.pool.statuses().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].device_id, "d2");
    assert_eq!(statuses[0].processed_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_no_device_reports_failure_without_sending() -> Result<()> {
    let h = harness(&[], RecordingSender::default(), 2);
    h.pool.start();
    h.pool.submit(job("j1", "60100", None)).await?;
    h.pool.shutdown().await;

    assert!(h.sender.sent.lock().unwrap().is_empty());
    assert_eq!(
        *h.outcome.failed.lock().unwrap(),
        vec![("j1".to_string(), NO_DEVICE_REASON.to_string())]
    );
    Ok(())
}

#[tokio::test]
async fn test_send_failure_releases_lock_and_reports() -> Result<()> {
    let sender = RecordingSender {
        fail_for: Some("60100".to_string()),
        ..Default::default()
    };
    let h = harness(&["d1"], sender, 1);
    h.pool.start();
    h.pool.submit(job("j1", "60100", None)).await?;
    h.pool.submit(job("j2", "60200", None)).await?;
    h.pool.shutdown().await;

    let failed = h.outcome.failed.lock().unwrap().clone();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "j1");
    assert!(failed[0].1.contains("gateway rejected"));
    assert_eq!(h.outcome.sent.lock().unwrap().len(), 1);
    assert!(!h.store.is_held("d1").await?);

    let status = &h.pool.statuses().await[0];
    assert_eq!(status.failed_count, 1);
    assert_eq!(status.processed_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_close_then_join_drains_queue() -> Result<()> {
    let sender = RecordingSender {
        delay: Duration::from_millis(5),
        ..Default::default()
    };
    let h = harness(&["d1", "d2", "d3"], sender, 3);
    h.pool.start();
    for i in 0..30 {
        h.pool
            .submit(job(&format!("j{i}"), &format!("6010{i}"), None))
            .await?;
    }
    h.pool.close();
    h.pool.join().await;

    // 设备被占用时预约失败直接记为失败，不做同步重试
    assert_eq!(h.outcome.calls.load(Ordering::SeqCst), 30);
    assert!(!h.store.is_held("d1").await?);
    assert!(!h.store.is_held("d2").await?);
    assert!(!h.store.is_held("d3").await?);
    Ok(())
}

#[tokio::test]
async fn test_available_slots_follow_outstanding_jobs() -> Result<()> {
    let sender = RecordingSender {
        delay: Duration::from_millis(100),
        ..Default::default()
    };
    let h = harness(&["d1", "d2"], sender, 2);
    h.pool.start();
    assert_eq!(h.pool.available_slots(), 2);

    h.pool.submit(job("j1", "60100", None)).await?;
    assert_eq!(h.pool.available_slots(), 1);
    h.pool.submit(job("j2", "60200", None)).await?;
    let sink: &dyn JobSink = &h.pool;
    assert_eq!(sink.available_slots(), 0);

    // 任务结束后槽位归还
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.outcome.sent.lock().unwrap().len(), 2);
    assert_eq!(h.pool.available_slots(), 2);

    h.pool.close();
    assert_eq!(h.pool.available_slots(), 0);
    h.pool.join().await;
    Ok(())
}

#[tokio::test]
async fn test_submit_after_close_is_rejected() -> Result<()> {
    let h = harness(&["d1"], RecordingSender::default(), 1);
    h.pool.start();
    h.pool.close();
    assert!(h.pool.is_closed());

    let err = h.pool.submit(job("j1", "60100", None)).await.unwrap_err();
    assert!(matches!(err, DispatchError::PoolClosed(_)));

    // 通过 JobSink 接口提交同样被拒绝
    let sink: &dyn JobSink = &h.pool;
    assert!(sink.submit(job("j2", "60100", None)).await.is_err());
    h.pool.join().await;
    Ok(())
}

#[tokio::test]
async fn test_sender_panic_does_not_stop_worker() -> Result<()> {
    let sender = RecordingSender {
        panic_for: Some("60100".to_string()),
        ..Default::default()
    };
    let h = harness(&["d1"], sender, 1);
    h.pool.start();
    h.pool.submit(job("j1", "60100", None)).await?;
    // panic 路径上的预约由 Drop 补偿释放
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!h.store.is_held("d1").await?);

    h.pool.submit(job("j2", "60200", None)).await?;
    h.pool.shutdown().await;

    assert_eq!(
        *h.outcome.sent.lock().unwrap(),
        vec![("j2".to_string(), "d1".to_string())]
    );
    Ok(())
}

#[tokio::test]
async fn test_job_pacing_uses_delay_source() -> Result<()> {
    let store = Arc::new(InMemoryCoordinationStore::new());
    let reserver = Arc::new(FakeReserver {
        store: Arc::clone(&store),
        devices: vec!["d1".to_string()],
    });
    let outcome = Arc::new(RecordingOutcome::default());
    let pool = DispatchWorkerPool::builder(QueueKind::Sequence)
        .workers(1)
        .pacing(PacingPolicy::new(
            PacingRange::new(0, 0),
            Arc::new(SeededDelaySource::new(7)),
        ))
        .build(reserver, Arc::new(RecordingSender::default()), outcome.clone());
    pool.start();

    let mut paced = job("j1", "60100", None);
    paced.pacing = Some(PacingRange::new(0, 0));
    pool.submit(paced).await?;
    pool.shutdown().await;

    assert_eq!(outcome.sent.lock().unwrap().len(), 1);
    Ok(())
}
