use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use dispatch_core::{
    errors::DispatchResult,
    models::{DeviceInfo, DeviceStatus},
    traits::DeviceCatalog,
};

use super::DatabasePool;
use crate::on_pool;

/// 基于 `devices` 表的设备目录
///
/// 负载是当前小时/当天已发送的消息数（步骤记录与广播消息合计），
/// 只用于候选设备排序，真正的限流以协调存储为准。
pub struct SqlDeviceCatalog {
    pool: DatabasePool,
}

impl SqlDeviceCatalog {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn list_online_at(&self, now: DateTime<Utc>) -> DispatchResult<Vec<DeviceInfo>> {
        let hour_start = start_of_hour(now);
        let day_start = start_of_day(now);
        let sql = "SELECT d.id, d.status, \
                   (SELECT COUNT(*) FROM flow_jobs f WHERE f.sent_device_id = d.id AND f.sent_at >= $1) \
                   + (SELECT COUNT(*) FROM broadcast_messages b WHERE b.sent_device_id = d.id AND b.sent_at >= $2) \
                   AS hour_load, \
                   (SELECT COUNT(*) FROM flow_jobs f WHERE f.sent_device_id = d.id AND f.sent_at >= $3) \
                   + (SELECT COUNT(*) FROM broadcast_messages b WHERE b.sent_device_id = d.id AND b.sent_at >= $4) \
                   AS day_load \
                   FROM devices d WHERE d.status = $5 ORDER BY d.id";

        let rows: Vec<(String, String, i64, i64)> = on_pool!(&self.pool, |pool| {
            sqlx::query_as(sql)
                .bind(hour_start)
                .bind(hour_start)
                .bind(day_start)
                .bind(day_start)
                .bind(DeviceStatus::Online.as_str())
                .fetch_all(pool)
                .await?
        });

        Ok(rows
            .into_iter()
            .map(|(id, status, hour_load, day_load)| DeviceInfo {
                id,
                status: DeviceStatus::parse(&status),
                hour_load,
                day_load,
            })
            .collect())
    }
}

fn start_of_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    start_of_hour(now).with_hour(0).unwrap_or(now)
}

#[async_trait]
impl DeviceCatalog for SqlDeviceCatalog {
    async fn list_online(&self) -> DispatchResult<Vec<DeviceInfo>> {
        self.list_online_at(Utc::now()).await
    }
}
