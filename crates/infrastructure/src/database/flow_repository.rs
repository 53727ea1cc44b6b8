use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dispatch_core::{
    errors::DispatchResult,
    models::{entry_step, Contact, DueFlowJob, FlowJob, FlowJobStatus, Sequence, SequenceStep},
    traits::FlowJobRepository,
};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::mapping::{ContactRow, DueFlowJobRow, FlowJobRow, SequenceRow, SequenceStepRow};
use super::DatabasePool;
use crate::on_pool;

const PROCESSING_TIMEOUT_MESSAGE: &str = "processing timeout";

const SEQUENCE_COLUMNS: &str = "s.id, s.name, s.is_active, s.schedule_time, s.priority";

const STEP_COLUMNS: &str = "id, sequence_id, step_order, trigger_name, next_trigger, delay_hours, \
     is_entry_point, message_type, content, media_url, min_delay_seconds, max_delay_seconds";

const FLOW_JOB_COLUMNS: &str = "id, sequence_id, step_id, contact_phone, contact_name, \
     current_trigger, next_trigger, next_trigger_time, status, processing_device_id, \
     processing_started_at, sent_device_id, error_message, sent_at, completed_at, created_at";

/// 序列步骤记录仓储（PostgreSQL / SQLite）
pub struct SqlFlowJobRepository {
    pool: DatabasePool,
}

impl SqlFlowJobRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FlowJobRepository for SqlFlowJobRepository {
    async fn active_sequences(&self) -> DispatchResult<Vec<Sequence>> {
        let sql = format!(
            "SELECT {SEQUENCE_COLUMNS} FROM sequences s WHERE s.is_active = TRUE \
             ORDER BY s.priority DESC, s.id"
        );
        let rows: Vec<SequenceRow> = on_pool!(&self.pool, |pool| {
            sqlx::query_as(&sql).fetch_all(pool).await?
        });
        Ok(rows.into_iter().map(Sequence::from).collect())
    }

    async fn sequence_steps(&self, sequence_id: &str) -> DispatchResult<Vec<SequenceStep>> {
        let sql = format!(
            "SELECT {STEP_COLUMNS} FROM sequence_steps WHERE sequence_id = $1 ORDER BY step_order"
        );
        let rows: Vec<SequenceStepRow> = on_pool!(&self.pool, |pool| {
            sqlx::query_as(&sql).bind(sequence_id).fetch_all(pool).await?
        });
        Ok(rows.into_iter().map(SequenceStep::from).collect())
    }

    #[instrument(skip(self))]
    async fn find_enrollment_candidates(
        &self,
        sequence_id: &str,
        entry_trigger: &str,
    ) -> DispatchResult<Vec<Contact>> {
        // LIKE 只做粗筛，精确匹配在下面按逗号拆分后完成
        let pattern = format!("%{entry_trigger}%");
        let sql = "SELECT c.phone, c.name, c.preferred_device_id, c.triggers FROM contacts c \
                   WHERE c.triggers LIKE $1 \
                   AND NOT EXISTS (SELECT 1 FROM flow_jobs f \
                                   WHERE f.sequence_id = $2 AND f.contact_phone = c.phone) \
                   ORDER BY c.phone";
        let rows: Vec<ContactRow> = on_pool!(&self.pool, |pool| {
            sqlx::query_as(sql)
                .bind(&pattern)
                .bind(sequence_id)
                .fetch_all(pool)
                .await?
        });
        Ok(rows
            .into_iter()
            .map(Contact::from)
            .filter(|c| c.has_trigger(entry_trigger))
            .collect())
    }

    #[instrument(skip(self, steps, contact), fields(contact = %contact.phone))]
    async fn enroll_contact(
        &self,
        sequence_id: &str,
        steps: &[SequenceStep],
        contact: &Contact,
        now: DateTime<Utc>,
    ) -> DispatchResult<u64> {
        let Some(entry) = entry_step(steps) else {
            warn!(sequence_id, "序列没有任何步骤，跳过入组");
            return Ok(0);
        };
        let entry_id = entry.id.clone();
        let far_future = FlowJob::far_future();

        let sql = "INSERT INTO flow_jobs (id, sequence_id, step_id, contact_phone, contact_name, \
                   current_trigger, next_trigger, next_trigger_time, status, created_at) \
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                   ON CONFLICT (sequence_id, contact_phone, step_id) DO NOTHING";

        let inserted = on_pool!(&self.pool, |pool| {
            let mut tx = pool.begin().await?;
            let mut inserted = 0u64;
            for step in steps {
                let is_entry = step.id == entry_id;
                let (status, trigger_time) = if is_entry {
                    (FlowJobStatus::Active, now)
                } else {
                    (FlowJobStatus::Pending, far_future)
                };
                let result = sqlx::query(sql)
                    .bind(Uuid::new_v4().to_string())
                    .bind(sequence_id)
                    .bind(&step.id)
                    .bind(&contact.phone)
                    .bind(&contact.name)
                    .bind(&step.trigger)
                    .bind(&step.next_trigger)
                    .bind(trigger_time)
                    .bind(status.as_str())
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                inserted += result.rows_affected();
            }
            tx.commit().await?;
            inserted
        });

        debug!(sequence_id, inserted, "联系人入组完成");
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn release_stuck_claims(&self, cutoff: DateTime<Utc>) -> DispatchResult<u64> {
        let sql = "UPDATE flow_jobs SET status = $1, error_message = $2, \
                   processing_device_id = NULL, processing_started_at = NULL \
                   WHERE status = $3 AND processing_device_id IS NOT NULL \
                   AND processing_started_at < $4";
        let affected = on_pool!(&self.pool, |pool| {
            sqlx::query(sql)
                .bind(FlowJobStatus::Failed.as_str())
                .bind(PROCESSING_TIMEOUT_MESSAGE)
                .bind(FlowJobStatus::Active.as_str())
                .bind(cutoff)
                .execute(pool)
                .await?
                .rows_affected()
        });
        Ok(affected)
    }

    async fn in_flight_counts(&self) -> DispatchResult<HashMap<String, i64>> {
        let sql = "SELECT processing_device_id, COUNT(*) FROM flow_jobs \
                   WHERE status = $1 AND processing_device_id IS NOT NULL \
                   GROUP BY processing_device_id";
        let rows: Vec<(String, i64)> = on_pool!(&self.pool, |pool| {
            sqlx::query_as(sql)
                .bind(FlowJobStatus::Active.as_str())
                .fetch_all(pool)
                .await?
        });
        Ok(rows.into_iter().collect())
    }

    #[instrument(skip(self))]
    async fn find_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> DispatchResult<Vec<DueFlowJob>> {
        let sql = "SELECT f.id, f.sequence_id, f.step_id, f.contact_phone, f.contact_name, \
                   f.current_trigger, f.next_trigger, f.next_trigger_time, s.priority, \
                   st.message_type, st.content, st.media_url, st.min_delay_seconds, \
                   st.max_delay_seconds, c.preferred_device_id \
                   FROM flow_jobs f \
                   JOIN sequences s ON s.id = f.sequence_id \
                   JOIN sequence_steps st ON st.id = f.step_id \
                   LEFT JOIN contacts c ON c.phone = f.contact_phone \
                   WHERE f.status = $1 AND f.processing_device_id IS NULL \
                   AND f.next_trigger_time <= $2 AND s.is_active = TRUE \
                   ORDER BY s.priority DESC, f.next_trigger_time ASC, f.id \
                   LIMIT $3";
        let rows: Vec<DueFlowJobRow> = on_pool!(&self.pool, |pool| {
            sqlx::query_as(sql)
                .bind(FlowJobStatus::Active.as_str())
                .bind(now)
                .bind(limit)
                .fetch_all(pool)
                .await?
        });
        Ok(rows.into_iter().map(DueFlowJob::from).collect())
    }

    async fn claim_job(
        &self,
        id: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        let sql = "UPDATE flow_jobs SET processing_device_id = $1, processing_started_at = $2 \
                   WHERE id = $3 AND status = $4 AND processing_device_id IS NULL";
        let affected = on_pool!(&self.pool, |pool| {
            sqlx::query(sql)
                .bind(device_id)
                .bind(now)
                .bind(id)
                .bind(FlowJobStatus::Active.as_str())
                .execute(pool)
                .await?
                .rows_affected()
        });
        Ok(affected == 1)
    }

    #[instrument(skip(self))]
    async fn mark_sent(
        &self,
        id: &str,
        claimed_device_id: &str,
        sent_device_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        let sql = "UPDATE flow_jobs SET status = $1, sent_device_id = $2, sent_at = $3, \
                   processing_device_id = NULL, processing_started_at = NULL, error_message = NULL \
                   WHERE id = $4 AND status = $5 AND processing_device_id = $6";
        // 首次发送的设备成为联系人的历史设备
        let contact_sql = "UPDATE contacts SET preferred_device_id = $1 \
                           WHERE preferred_device_id IS NULL \
                           AND phone = (SELECT contact_phone FROM flow_jobs WHERE id = $2)";
        let updated = on_pool!(&self.pool, |pool| {
            let affected = sqlx::query(sql)
                .bind(FlowJobStatus::Sent.as_str())
                .bind(sent_device_id)
                .bind(now)
                .bind(id)
                .bind(FlowJobStatus::Active.as_str())
                .bind(claimed_device_id)
                .execute(pool)
                .await?
                .rows_affected();
            if affected == 1 {
                sqlx::query(contact_sql)
                    .bind(sent_device_id)
                    .bind(id)
                    .execute(pool)
                    .await?;
            }
            affected == 1
        });
        if !updated {
            warn!(id, claimed_device_id, "认领已失效，忽略发送结果");
        }
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn mark_failed(
        &self,
        id: &str,
        claimed_device_id: &str,
        reason: &str,
    ) -> DispatchResult<bool> {
        let sql = "UPDATE flow_jobs SET status = $1, error_message = $2, \
                   processing_device_id = NULL, processing_started_at = NULL \
                   WHERE id = $3 AND status = $4 AND processing_device_id = $5";
        let affected = on_pool!(&self.pool, |pool| {
            sqlx::query(sql)
                .bind(FlowJobStatus::Failed.as_str())
                .bind(reason)
                .bind(id)
                .bind(FlowJobStatus::Active.as_str())
                .bind(claimed_device_id)
                .execute(pool)
                .await?
                .rows_affected()
        });
        if affected == 0 {
            debug!(id, claimed_device_id, "认领已失效，忽略失败结果");
        }
        Ok(affected == 1)
    }

    #[instrument(skip(self))]
    async fn activate_next_step(
        &self,
        sequence_id: &str,
        contact_phone: &str,
        next_trigger: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        let find_sql = "SELECT f.id, st.delay_hours FROM flow_jobs f \
                        JOIN sequence_steps st ON st.id = f.step_id \
                        WHERE f.sequence_id = $1 AND f.contact_phone = $2 \
                        AND f.current_trigger = $3 AND f.status = $4 \
                        ORDER BY st.step_order LIMIT 1";
        let update_sql = "UPDATE flow_jobs SET status = $1, next_trigger_time = $2 \
                          WHERE id = $3 AND status = $4";

        let activated = on_pool!(&self.pool, |pool| {
            let sibling: Option<(String, i64)> = sqlx::query_as(find_sql)
                .bind(sequence_id)
                .bind(contact_phone)
                .bind(next_trigger)
                .bind(FlowJobStatus::Pending.as_str())
                .fetch_optional(pool)
                .await?;
            match sibling {
                Some((id, delay_hours)) => {
                    let due_at = now + Duration::hours(delay_hours.max(0));
                    sqlx::query(update_sql)
                        .bind(FlowJobStatus::Active.as_str())
                        .bind(due_at)
                        .bind(&id)
                        .bind(FlowJobStatus::Pending.as_str())
                        .execute(pool)
                        .await?
                        .rows_affected()
                        == 1
                }
                None => false,
            }
        });
        Ok(activated)
    }

    #[instrument(skip(self))]
    async fn complete_contact(
        &self,
        sequence_id: &str,
        contact_phone: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<u64> {
        let sql = "UPDATE flow_jobs SET status = $1, completed_at = $2 \
                   WHERE sequence_id = $3 AND contact_phone = $4 AND status IN ($5, $6) \
                   AND processing_device_id IS NULL";
        let affected = on_pool!(&self.pool, |pool| {
            sqlx::query(sql)
                .bind(FlowJobStatus::Completed.as_str())
                .bind(now)
                .bind(sequence_id)
                .bind(contact_phone)
                .bind(FlowJobStatus::Pending.as_str())
                .bind(FlowJobStatus::Active.as_str())
                .execute(pool)
                .await?
                .rows_affected()
        });
        Ok(affected)
    }

    async fn get_contact(&self, phone: &str) -> DispatchResult<Option<Contact>> {
        let sql = "SELECT phone, name, preferred_device_id, triggers FROM contacts WHERE phone = $1";
        let row: Option<ContactRow> = on_pool!(&self.pool, |pool| {
            sqlx::query_as(sql).bind(phone).fetch_optional(pool).await?
        });
        Ok(row.map(Contact::from))
    }

    async fn update_contact_triggers(&self, phone: &str, triggers: &str) -> DispatchResult<()> {
        let sql = "UPDATE contacts SET triggers = $1 WHERE phone = $2";
        on_pool!(&self.pool, |pool| {
            sqlx::query(sql).bind(triggers).bind(phone).execute(pool).await?;
        });
        Ok(())
    }

    async fn find_entry_sequence(&self, trigger: &str) -> DispatchResult<Option<Sequence>> {
        let sql = format!(
            "SELECT {SEQUENCE_COLUMNS} FROM sequences s \
             JOIN sequence_steps st ON st.sequence_id = s.id \
             WHERE st.trigger_name = $1 AND st.is_entry_point = TRUE AND s.is_active = TRUE \
             ORDER BY s.priority DESC, s.id LIMIT 1"
        );
        let row: Option<SequenceRow> = on_pool!(&self.pool, |pool| {
            sqlx::query_as(&sql).bind(trigger).fetch_optional(pool).await?
        });
        Ok(row.map(Sequence::from))
    }

    async fn get_job(&self, id: &str) -> DispatchResult<Option<FlowJob>> {
        let sql = format!("SELECT {FLOW_JOB_COLUMNS} FROM flow_jobs WHERE id = $1");
        let row: Option<FlowJobRow> = on_pool!(&self.pool, |pool| {
            sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?
        });
        row.map(FlowJob::try_from).transpose()
    }
}
