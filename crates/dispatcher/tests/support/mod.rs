#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::{
    config::{RateLimitConfig, ReservationConfig, SchedulerConfig},
    errors::{DispatchError, DispatchResult},
    models::{DeviceInfo, DispatchJob, MessagePayload, WindowKind},
    traits::{
        CoordinationStore, DeviceLock, HealthFlagStore, JobSink, MessageSender, RateWindowStore,
        ReservationScript, ReserveAttempt, ReserveRequest,
    },
};
use dispatch_dispatcher::{DeviceDirectory, DeviceReservationService};
use dispatch_infrastructure::{DatabaseManager, InMemoryCoordinationStore, InMemoryDeviceCatalog};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SEED: &str = r#"
INSERT INTO devices (id, name, status) VALUES
    ('dev-a', 'A', 'online'), ('dev-b', 'B', 'online');

INSERT INTO sequences (id, name, is_active, schedule_time, priority) VALUES
    ('seq-a', 'welcome', TRUE, NULL, 1),
    ('seq-b', 'follow up', TRUE, NULL, 5);

INSERT INTO sequence_steps (id, sequence_id, step_order, trigger_name, next_trigger, delay_hours,
                            is_entry_point, message_type, content)
VALUES
    ('a1', 'seq-a', 1, 'welcome', 'welcome_day2', 0, TRUE, 'text', 'hello'),
    ('a2', 'seq-a', 2, 'welcome_day2', 'followup', 0, FALSE, 'text', 'day two'),
    ('b1', 'seq-b', 1, 'followup', NULL, 0, TRUE, 'text', 'follow up');

INSERT INTO contacts (phone, name, preferred_device_id, triggers) VALUES
    ('60100', 'Alice', NULL, 'welcome'),
    ('60200', 'Bob', 'dev-b', 'promo,welcome');
"#;

pub async fn database(seed: &str) -> Result<DatabaseManager> {
    let db = DatabaseManager::new("sqlite::memory:", 1).await?;
    db.migrate().await?;
    db.pool().execute_script(seed).await?;
    Ok(db)
}

pub fn directory(devices: &[&str]) -> Arc<DeviceDirectory> {
    let catalog = InMemoryDeviceCatalog::new(
        devices
            .iter()
            .map(|id| DeviceInfo::online(*id, 0, 0))
            .collect(),
    );
    Arc::new(DeviceDirectory::new(Arc::new(catalog)))
}

pub fn rate_limit(hourly_limit: i64, daily_limit: i64) -> RateLimitConfig {
    RateLimitConfig {
        hourly_limit,
        daily_limit,
    }
}

pub fn reservation_service(
    store: Arc<InMemoryCoordinationStore>,
    directory: Arc<DeviceDirectory>,
    rate_limit: &RateLimitConfig,
) -> DeviceReservationService {
    DeviceReservationService::new(store, directory, rate_limit, &ReservationConfig::default())
}

pub fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig::default()
}

/// 预先写入设备当前小时的计数
pub async fn preload_hour(
    store: &InMemoryCoordinationStore,
    device_id: &str,
    count: i64,
) -> Result<()> {
    let now = chrono::Utc::now();
    for _ in 0..count {
        store.increment(device_id, WindowKind::Hour, now).await?;
    }
    Ok(())
}

/// 只记录提交的任务，不真正发送
pub struct RecordingSink {
    jobs: Mutex<Vec<DispatchJob>>,
    slots: AtomicUsize,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::with_slots(usize::MAX)
    }
}

impl RecordingSink {
    pub fn with_slots(slots: usize) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            slots: AtomicUsize::new(slots),
        }
    }

    pub fn set_slots(&self, slots: usize) {
        self.slots.store(slots, Ordering::SeqCst);
    }

    pub fn take(&self) -> Vec<DispatchJob> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }
}

#[async_trait]
impl JobSink for RecordingSink {
    async fn submit(&self, job: DispatchJob) -> DispatchResult<()> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }

    fn available_slots(&self) -> usize {
        self.slots.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(
        &self,
        device_id: &str,
        recipient: &str,
        _payload: &MessagePayload,
    ) -> DispatchResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((device_id.to_string(), recipient.to_string()));
        Ok(())
    }
}

/// 对指定设备的读写返回存储错误，其余委托给内存实现
pub struct FlakyStore {
    inner: InMemoryCoordinationStore,
    broken_device: String,
    broken: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: InMemoryCoordinationStore, broken_device: &str) -> Self {
        Self {
            inner,
            broken_device: broken_device.to_string(),
            broken: AtomicBool::new(true),
        }
    }

    pub fn inner(&self) -> &InMemoryCoordinationStore {
        &self.inner
    }

    /// 恢复或再次中断对该设备的访问
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    fn check(&self, device_id: &str) -> DispatchResult<()> {
        if device_id == self.broken_device && self.broken.load(Ordering::SeqCst) {
            return Err(DispatchError::store("connection reset"));
        }
        Ok(())
    }
}

#[async_trait]
impl RateWindowStore for FlakyStore {
    async fn increment(&self, device_id: &str, kind: WindowKind, at: DateTime<Utc>) -> DispatchResult<i64> {
        self.check(device_id)?;
        self.inner.increment(device_id, kind, at).await
    }

    async fn decrement(&self, device_id: &str, kind: WindowKind, at: DateTime<Utc>) -> DispatchResult<i64> {
        self.check(device_id)?;
        self.inner.decrement(device_id, kind, at).await
    }

    async fn get(&self, device_id: &str, kind: WindowKind, at: DateTime<Utc>) -> DispatchResult<i64> {
        self.check(device_id)?;
        self.inner.get(device_id, kind, at).await
    }

    async fn reset(&self, device_id: &str, at: DateTime<Utc>) -> DispatchResult<()> {
        self.check(device_id)?;
        self.inner.reset(device_id, at).await
    }
}

#[async_trait]
impl DeviceLock for FlakyStore {
    async fn try_acquire(&self, device_id: &str, token: &str, ttl: Duration) -> DispatchResult<bool> {
        self.check(device_id)?;
        self.inner.try_acquire(device_id, token, ttl).await
    }

    async fn release(&self, device_id: &str, token: &str) -> DispatchResult<bool> {
        self.check(device_id)?;
        self.inner.release(device_id, token).await
    }

    async fn is_held(&self, device_id: &str) -> DispatchResult<bool> {
        self.check(device_id)?;
        self.inner.is_held(device_id).await
    }
}

#[async_trait]
impl ReservationScript for FlakyStore {
    async fn try_reserve(&self, request: &ReserveRequest) -> DispatchResult<ReserveAttempt> {
        self.check(&request.device_id)?;
        self.inner.try_reserve(request).await
    }
}

#[async_trait]
impl HealthFlagStore for FlakyStore {
    async fn record_failure(&self, device_id: &str, ttl: Duration) -> DispatchResult<i64> {
        self.check(device_id)?;
        self.inner.record_failure(device_id, ttl).await
    }

    async fn reset_failures(&self, device_id: &str) -> DispatchResult<()> {
        self.check(device_id)?;
        self.inner.reset_failures(device_id).await
    }

    async fn disable(&self, device_id: &str, ttl: Duration) -> DispatchResult<()> {
        self.check(device_id)?;
        self.inner.disable(device_id, ttl).await
    }

    async fn is_disabled(&self, device_id: &str) -> DispatchResult<bool> {
        self.check(device_id)?;
        self.inner.is_disabled(device_id).await
    }
}

impl CoordinationStore for FlakyStore {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
