//! 协调存储接口
//!
//! 多个进程共享同一个协调存储（生产环境为 Redis），设备锁与限流计数的
//! 正确性只依赖这里定义的原子操作：
//! - `RateWindowStore` - 按小时/天分桶的发送计数
//! - `DeviceLock` - 每个设备至多一个有效锁，比较后删除释放
//! - `ReservationScript` - 加锁、计数、超限回滚在一次原子调用中完成
//! - `HealthFlagStore` - 健康检查的失败计数与临时禁用标记

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::errors::DispatchResult;
use crate::models::WindowKind;

#[async_trait]
pub trait RateWindowStore: Send + Sync {
    /// 原子自增，桶首次写入时设置过期时间，返回自增后的值
    async fn increment(
        &self,
        device_id: &str,
        kind: WindowKind,
        at: DateTime<Utc>,
    ) -> DispatchResult<i64>;

    /// 回滚一次自增
    async fn decrement(
        &self,
        device_id: &str,
        kind: WindowKind,
        at: DateTime<Utc>,
    ) -> DispatchResult<i64>;

    /// 读取当前桶的计数，不存在时为0
    async fn get(&self, device_id: &str, kind: WindowKind, at: DateTime<Utc>)
        -> DispatchResult<i64>;

    /// 清空设备当前小时与当天的计数
    async fn reset(&self, device_id: &str, at: DateTime<Utc>) -> DispatchResult<()>;
}

#[async_trait]
pub trait DeviceLock: Send + Sync {
    async fn try_acquire(&self, device_id: &str, token: &str, ttl: Duration)
        -> DispatchResult<bool>;

    /// 仅当锁仍由 `token` 持有时删除；不匹配或已过期返回 false
    async fn release(&self, device_id: &str, token: &str) -> DispatchResult<bool>;

    async fn is_held(&self, device_id: &str) -> DispatchResult<bool>;
}

/// 单设备预约请求
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub device_id: String,
    pub token: String,
    pub lock_ttl: Duration,
    pub hourly_limit: i64,
    pub daily_limit: i64,
    pub at: DateTime<Utc>,
}

/// 单设备预约结果。锁竞争与超限是正常结果，不是错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveAttempt {
    Reserved { hour_count: i64, day_count: i64 },
    LockHeld,
    OverLimit { hour_count: i64, day_count: i64 },
}

impl ReserveAttempt {
    pub fn is_reserved(&self) -> bool {
        matches!(self, ReserveAttempt::Reserved { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReserveAttempt::Reserved { .. } => "reserved",
            ReserveAttempt::LockHeld => "lock_held",
            ReserveAttempt::OverLimit { .. } => "over_limit",
        }
    }
}

#[async_trait]
pub trait ReservationScript: Send + Sync {
    /// 加锁 → 小时/天计数自增 → 任一超限则回滚两个计数并删锁
    async fn try_reserve(&self, request: &ReserveRequest) -> DispatchResult<ReserveAttempt>;
}

#[async_trait]
pub trait HealthFlagStore: Send + Sync {
    /// 失败计数自增并刷新过期时间，返回当前失败次数
    async fn record_failure(&self, device_id: &str, ttl: Duration) -> DispatchResult<i64>;

    async fn reset_failures(&self, device_id: &str) -> DispatchResult<()>;

    async fn disable(&self, device_id: &str, ttl: Duration) -> DispatchResult<()>;

    async fn is_disabled(&self, device_id: &str) -> DispatchResult<bool>;
}

/// 完整的协调存储
pub trait CoordinationStore:
    RateWindowStore + DeviceLock + ReservationScript + HealthFlagStore
{
    fn backend_name(&self) -> &'static str;
}
