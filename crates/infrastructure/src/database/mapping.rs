//! 行结构到领域模型的转换
//!
//! 行结构通过 `sqlx::FromRow` 派生，对 PostgreSQL 与 SQLite 通用；
//! 状态列以文本存储，在这里解析。

use chrono::{DateTime, Utc};
use dispatch_core::{
    errors::{DispatchError, DispatchResult},
    models::{
        BroadcastMessage, BroadcastStatus, Contact, DueFlowJob, FlowJob, FlowJobStatus, Sequence,
        SequenceStep,
    },
};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SequenceRow {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub schedule_time: Option<String>,
    pub priority: i64,
}

impl From<SequenceRow> for Sequence {
    fn from(row: SequenceRow) -> Self {
        Sequence {
            id: row.id,
            name: row.name,
            is_active: row.is_active,
            schedule_time: row.schedule_time,
            priority: row.priority,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SequenceStepRow {
    pub id: String,
    pub sequence_id: String,
    pub step_order: i64,
    pub trigger_name: String,
    pub next_trigger: Option<String>,
    pub delay_hours: i64,
    pub is_entry_point: bool,
    pub message_type: String,
    pub content: String,
    pub media_url: Option<String>,
    pub min_delay_seconds: i64,
    pub max_delay_seconds: i64,
}

impl From<SequenceStepRow> for SequenceStep {
    fn from(row: SequenceStepRow) -> Self {
        SequenceStep {
            id: row.id,
            sequence_id: row.sequence_id,
            step_order: row.step_order,
            trigger: row.trigger_name,
            next_trigger: row.next_trigger.filter(|t| !t.trim().is_empty()),
            delay_hours: row.delay_hours,
            is_entry_point: row.is_entry_point,
            message_type: row.message_type,
            content: row.content,
            media_url: row.media_url,
            min_delay_seconds: row.min_delay_seconds,
            max_delay_seconds: row.max_delay_seconds,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ContactRow {
    pub phone: String,
    pub name: Option<String>,
    pub preferred_device_id: Option<String>,
    pub triggers: String,
}

impl From<ContactRow> for Contact {
    fn from(row: ContactRow) -> Self {
        Contact {
            phone: row.phone,
            name: row.name,
            preferred_device_id: row.preferred_device_id,
            triggers: row.triggers,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FlowJobRow {
    pub id: String,
    pub sequence_id: String,
    pub step_id: String,
    pub contact_phone: String,
    pub contact_name: Option<String>,
    pub current_trigger: String,
    pub next_trigger: Option<String>,
    pub next_trigger_time: DateTime<Utc>,
    pub status: String,
    pub processing_device_id: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub sent_device_id: Option<String>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<FlowJobRow> for FlowJob {
    type Error = DispatchError;

    fn try_from(row: FlowJobRow) -> DispatchResult<Self> {
        let status = FlowJobStatus::parse(&row.status).ok_or_else(|| {
            DispatchError::Serialization(format!("未知的步骤记录状态: {}", row.status))
        })?;
        Ok(FlowJob {
            id: row.id,
            sequence_id: row.sequence_id,
            step_id: row.step_id,
            contact_phone: row.contact_phone,
            contact_name: row.contact_name,
            current_trigger: row.current_trigger,
            next_trigger: row.next_trigger,
            next_trigger_time: row.next_trigger_time,
            status,
            processing_device_id: row.processing_device_id,
            processing_started_at: row.processing_started_at,
            sent_device_id: row.sent_device_id,
            error_message: row.error_message,
            sent_at: row.sent_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DueFlowJobRow {
    pub id: String,
    pub sequence_id: String,
    pub step_id: String,
    pub contact_phone: String,
    pub contact_name: Option<String>,
    pub current_trigger: String,
    pub next_trigger: Option<String>,
    pub next_trigger_time: DateTime<Utc>,
    pub priority: i64,
    pub message_type: String,
    pub content: String,
    pub media_url: Option<String>,
    pub min_delay_seconds: i64,
    pub max_delay_seconds: i64,
    pub preferred_device_id: Option<String>,
}

impl From<DueFlowJobRow> for DueFlowJob {
    fn from(row: DueFlowJobRow) -> Self {
        DueFlowJob {
            id: row.id,
            sequence_id: row.sequence_id,
            step_id: row.step_id,
            contact_phone: row.contact_phone,
            contact_name: row.contact_name,
            current_trigger: row.current_trigger,
            next_trigger: row.next_trigger,
            next_trigger_time: row.next_trigger_time,
            priority: row.priority,
            message_type: row.message_type,
            content: row.content,
            media_url: row.media_url,
            min_delay_seconds: row.min_delay_seconds,
            max_delay_seconds: row.max_delay_seconds,
            preferred_device_id: row.preferred_device_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BroadcastRow {
    pub id: String,
    pub campaign_id: String,
    pub preferred_device_id: Option<String>,
    pub recipient_phone: String,
    pub recipient_name: Option<String>,
    pub message_type: String,
    pub content: String,
    pub media_url: Option<String>,
    pub min_delay_seconds: i64,
    pub max_delay_seconds: i64,
    pub status: String,
    pub scheduled_at: DateTime<Utc>,
    pub processing_device_id: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<BroadcastRow> for BroadcastMessage {
    type Error = DispatchError;

    fn try_from(row: BroadcastRow) -> DispatchResult<Self> {
        let status = BroadcastStatus::parse(&row.status).ok_or_else(|| {
            DispatchError::Serialization(format!("未知的广播消息状态: {}", row.status))
        })?;
        Ok(BroadcastMessage {
            id: row.id,
            campaign_id: row.campaign_id,
            preferred_device_id: row.preferred_device_id,
            recipient_phone: row.recipient_phone,
            recipient_name: row.recipient_name,
            message_type: row.message_type,
            content: row.content,
            media_url: row.media_url,
            min_delay_seconds: row.min_delay_seconds,
            max_delay_seconds: row.max_delay_seconds,
            status,
            scheduled_at: row.scheduled_at,
            processing_device_id: row.processing_device_id,
            processing_started_at: row.processing_started_at,
            error_message: row.error_message,
            sent_at: row.sent_at,
        })
    }
}
