//! 设备预约服务
//!
//! 预约流程：先尝试首选设备；失败后在线且未被健康检查禁用的设备按当前小时计数
//! 升序（相同时按天计数）逐个尝试。单个设备的加锁、计数与超限回滚由协调存储的
//! [`ReservationScript`] 原子完成，锁竞争和超限只是普通返回值。

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use dispatch_core::{
    config::{RateLimitConfig, ReservationConfig},
    errors::{DispatchError, DispatchResult},
    models::{DeviceStats, WindowKind},
    traits::{CoordinationStore, DeviceReserver, ReserveAttempt, ReserveRequest},
    Reservation,
};

use crate::device_cache::DeviceDirectory;

/// 参与排序的候选设备
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    device_id: String,
    hour_count: i64,
    day_count: i64,
}

pub struct DeviceReservationService {
    store: Arc<dyn CoordinationStore>,
    directory: Arc<DeviceDirectory>,
    hourly_limit: i64,
    daily_limit: i64,
    lock_ttl: Duration,
    instance_id: String,
}

impl DeviceReservationService {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        directory: Arc<DeviceDirectory>,
        rate_limit: &RateLimitConfig,
        reservation: &ReservationConfig,
    ) -> Self {
        Self {
            store,
            directory,
            hourly_limit: rate_limit.hourly_limit,
            daily_limit: rate_limit.daily_limit,
            lock_ttl: reservation.lock_ttl(),
            instance_id: instance_id(),
        }
    }

    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        Arc::clone(&self.store)
    }

    /// 锁令牌：实例标识加随机后缀，跨进程唯一
    fn new_token(&self) -> String {
        format!("{}:{}", self.instance_id, Uuid::new_v4())
    }

    /// 对单个设备执行一次原子预约
    async fn try_device(&self, device_id: &str) -> DispatchResult<Option<Reservation>> {
        let now = Utc::now();
        let request = ReserveRequest {
            device_id: device_id.to_string(),
            token: self.new_token(),
            lock_ttl: self.lock_ttl,
            hourly_limit: self.hourly_limit,
            daily_limit: self.daily_limit,
            at: now,
        };

        let attempt = self.store.try_reserve(&request).await?;
        metrics::counter!("dispatch_reservations_total", "outcome" => attempt.label())
            .increment(1);

        match attempt {
            ReserveAttempt::Reserved {
                hour_count,
                day_count,
            } => {
                debug!(
                    device_id,
                    hour_count, day_count, "设备预约成功"
                );
                let ttl = ChronoDuration::from_std(self.lock_ttl).unwrap_or(ChronoDuration::zero());
                Ok(Some(Reservation::new(
                    device_id,
                    request.token,
                    now + ttl,
                    hour_count,
                    day_count,
                    Arc::clone(&self.store),
                )))
            }
            ReserveAttempt::LockHeld => {
                debug!(device_id, "设备正被其他任务占用");
                Ok(None)
            }
            ReserveAttempt::OverLimit {
                hour_count,
                day_count,
            } => {
                debug!(device_id, hour_count, day_count, "设备已达发送上限");
                Ok(None)
            }
        }
    }

    /// 在线、未禁用且未达上限的设备，按 (小时计数, 天计数, id) 升序
    async fn candidates(&self, exclude: Option<&str>) -> DispatchResult<Vec<Candidate>> {
        let now = Utc::now();
        let mut candidates = Vec::new();
        for device in self.directory.online_devices().await? {
            if Some(device.id.as_str()) == exclude {
                continue;
            }
            if self.store.is_disabled(&device.id).await? {
                debug!(device_id = %device.id, "设备已被健康检查禁用，跳过");
                continue;
            }
            let hour_count = self.store.get(&device.id, WindowKind::Hour, now).await?;
            let day_count = self.store.get(&device.id, WindowKind::Day, now).await?;
            if hour_count >= self.hourly_limit || day_count >= self.daily_limit {
                continue;
            }
            candidates.push(Candidate {
                device_id: device.id,
                hour_count,
                day_count,
            });
        }
        candidates.sort_by(|a, b| {
            (a.hour_count, a.day_count, &a.device_id).cmp(&(b.hour_count, b.day_count, &b.device_id))
        });
        Ok(candidates)
    }

    /// 单个设备的实时统计
    pub async fn device_stats(&self, device_id: &str) -> DispatchResult<DeviceStats> {
        let now = Utc::now();
        Ok(DeviceStats {
            device_id: device_id.to_string(),
            hour_count: self.store.get(device_id, WindowKind::Hour, now).await?,
            day_count: self.store.get(device_id, WindowKind::Day, now).await?,
            is_locked: self.store.is_held(device_id).await?,
            disabled: self.store.is_disabled(device_id).await?,
            timestamp: now,
        })
    }

    pub async fn all_device_stats(&self) -> DispatchResult<Vec<DeviceStats>> {
        let mut stats = Vec::new();
        for device in self.directory.online_devices().await? {
            stats.push(self.device_stats(&device.id).await?);
        }
        Ok(stats)
    }

    /// 手动清零设备当前小时和当天的计数
    #[instrument(skip(self))]
    pub async fn reset_device_counters(&self, device_id: &str) -> DispatchResult<()> {
        self.store.reset(device_id, Utc::now()).await?;
        info!(device_id, "设备计数已重置");
        Ok(())
    }
}

#[async_trait]
impl DeviceReserver for DeviceReservationService {
    async fn reserve(&self, preferred_device_id: Option<&str>) -> DispatchResult<Reservation> {
        if let Some(preferred) = preferred_device_id {
            if let Some(reservation) = self.try_device(preferred).await? {
                return Ok(reservation);
            }
        }

        let candidates = self.candidates(preferred_device_id).await?;
        let tried = candidates.len();
        for candidate in candidates {
            if let Some(reservation) = self.try_device(&candidate.device_id).await? {
                return Ok(reservation);
            }
        }

        debug!(tried, "所有候选设备均不可用");
        Err(DispatchError::NoDeviceAvailable(format!(
            "已尝试 {} 个候选设备",
            tried + usize::from(preferred_device_id.is_some())
        )))
    }
}

fn instance_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "dispatch".to_string())
}
