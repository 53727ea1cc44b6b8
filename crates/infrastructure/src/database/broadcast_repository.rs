use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::{
    errors::DispatchResult,
    models::{BroadcastMessage, BroadcastStatus},
    traits::BroadcastRepository,
};
use tracing::{instrument, warn};

use super::mapping::BroadcastRow;
use super::DatabasePool;
use crate::on_pool;

const BROADCAST_COLUMNS: &str = "id, campaign_id, preferred_device_id, recipient_phone, \
     recipient_name, message_type, content, media_url, min_delay_seconds, max_delay_seconds, \
     status, scheduled_at, processing_device_id, processing_started_at, error_message, sent_at";

/// 活动广播消息仓储（PostgreSQL / SQLite）
pub struct SqlBroadcastRepository {
    pool: DatabasePool,
}

impl SqlBroadcastRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BroadcastRepository for SqlBroadcastRepository {
    #[instrument(skip(self))]
    async fn release_stuck_messages(&self, cutoff: DateTime<Utc>) -> DispatchResult<u64> {
        let sql = "UPDATE broadcast_messages SET status = $1, error_message = $2, \
                   processing_device_id = NULL, processing_started_at = NULL \
                   WHERE status = $3 AND processing_started_at < $4";
        let affected = on_pool!(&self.pool, |pool| {
            sqlx::query(sql)
                .bind(BroadcastStatus::Failed.as_str())
                .bind("processing timeout")
                .bind(BroadcastStatus::Processing.as_str())
                .bind(cutoff)
                .execute(pool)
                .await?
                .rows_affected()
        });
        Ok(affected)
    }

    #[instrument(skip(self))]
    async fn find_due_messages(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> DispatchResult<Vec<BroadcastMessage>> {
        let sql = format!(
            "SELECT {BROADCAST_COLUMNS} FROM broadcast_messages \
             WHERE status = $1 AND scheduled_at <= $2 \
             ORDER BY scheduled_at ASC, id LIMIT $3"
        );
        let rows: Vec<BroadcastRow> = on_pool!(&self.pool, |pool| {
            sqlx::query_as(&sql)
                .bind(BroadcastStatus::Pending.as_str())
                .bind(now)
                .bind(limit)
                .fetch_all(pool)
                .await?
        });
        rows.into_iter().map(BroadcastMessage::try_from).collect()
    }

    async fn claim_message(&self, id: &str, now: DateTime<Utc>) -> DispatchResult<bool> {
        let sql = "UPDATE broadcast_messages SET status = $1, processing_started_at = $2 \
                   WHERE id = $3 AND status = $4";
        let affected = on_pool!(&self.pool, |pool| {
            sqlx::query(sql)
                .bind(BroadcastStatus::Processing.as_str())
                .bind(now)
                .bind(id)
                .bind(BroadcastStatus::Pending.as_str())
                .execute(pool)
                .await?
                .rows_affected()
        });
        Ok(affected == 1)
    }

    #[instrument(skip(self))]
    async fn mark_message_sent(
        &self,
        id: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        let sql = "UPDATE broadcast_messages SET status = $1, sent_device_id = $2, sent_at = $3, \
                   processing_device_id = NULL, processing_started_at = NULL, error_message = NULL \
                   WHERE id = $4 AND status = $5";
        let affected = on_pool!(&self.pool, |pool| {
            sqlx::query(sql)
                .bind(BroadcastStatus::Sent.as_str())
                .bind(device_id)
                .bind(now)
                .bind(id)
                .bind(BroadcastStatus::Processing.as_str())
                .execute(pool)
                .await?
                .rows_affected()
        });
        if affected == 0 {
            warn!(id, "消息已不在处理中，忽略发送结果");
        }
        Ok(affected == 1)
    }

    #[instrument(skip(self))]
    async fn mark_message_failed(&self, id: &str, reason: &str) -> DispatchResult<bool> {
        let sql = "UPDATE broadcast_messages SET status = $1, error_message = $2, \
                   processing_device_id = NULL, processing_started_at = NULL \
                   WHERE id = $3 AND status = $4";
        let affected = on_pool!(&self.pool, |pool| {
            sqlx::query(sql)
                .bind(BroadcastStatus::Failed.as_str())
                .bind(reason)
                .bind(id)
                .bind(BroadcastStatus::Processing.as_str())
                .execute(pool)
                .await?
                .rows_affected()
        });
        Ok(affected == 1)
    }

    async fn get_message(&self, id: &str) -> DispatchResult<Option<BroadcastMessage>> {
        let sql = format!("SELECT {BROADCAST_COLUMNS} FROM broadcast_messages WHERE id = $1");
        let row: Option<BroadcastRow> = on_pool!(&self.pool, |pool| {
            sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?
        });
        row.map(BroadcastMessage::try_from).transpose()
    }
}
