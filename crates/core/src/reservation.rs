use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::DispatchResult;
use crate::traits::CoordinationStore;

/// 成功预约的设备
///
/// 持有者在发送结束后调用 [`Reservation::release`]。释放是比较后删除：
/// 锁已过期或被他人持有时不会误删。释放最多生效一次；若持有者从未释放
/// （例如任务 panic），`Drop` 会在当前 tokio 运行时上补做一次释放。
pub struct Reservation {
    device_id: String,
    lock_token: String,
    expires_at: DateTime<Utc>,
    hour_count: i64,
    day_count: i64,
    store: Arc<dyn CoordinationStore>,
    released: AtomicBool,
}

impl Reservation {
    pub fn new(
        device_id: impl Into<String>,
        lock_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        hour_count: i64,
        day_count: i64,
        store: Arc<dyn CoordinationStore>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            lock_token: lock_token.into(),
            expires_at,
            hour_count,
            day_count,
            store,
            released: AtomicBool::new(false),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn lock_token(&self) -> &str {
        &self.lock_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// 预约成功后该设备当前小时的计数
    pub fn hour_count(&self) -> i64 {
        self.hour_count
    }

    pub fn day_count(&self) -> i64 {
        self.day_count
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// 释放设备锁，返回本次调用是否真正删除了锁。
    /// 存储出错时保持未释放状态，可以重试，`Drop` 也会再补做一次。
    pub async fn release(&self) -> DispatchResult<bool> {
        if self.is_released() {
            return Ok(false);
        }
        let deleted = self
            .store
            .release(&self.device_id, &self.lock_token)
            .await?;
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        if !deleted {
            debug!(
                device_id = %self.device_id,
                "锁已过期或已被其他持有者获取，跳过释放"
            );
        }
        Ok(deleted)
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("device_id", &self.device_id)
            .field("expires_at", &self.expires_at)
            .field("hour_count", &self.hour_count)
            .field("day_count", &self.day_count)
            .field("released", &self.is_released())
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let store = Arc::clone(&self.store);
        let device_id = std::mem::take(&mut self.device_id);
        let token = std::mem::take(&mut self.lock_token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release(&device_id, &token).await {
                        warn!(device_id = %device_id, error = %e, "未释放的预约补偿释放失败");
                    }
                });
            }
            Err(_) => {
                warn!(device_id = %device_id, "无可用运行时，预约锁将等待过期");
            }
        }
    }
}
