use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{BroadcastMessage, DueFlowJob};

/// 逻辑队列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Campaign,
    Sequence,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Campaign => "campaign",
            QueueKind::Sequence => "sequence",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 交给发送器的消息内容，核心不解析
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message_type: String,
    pub content: String,
    pub media_url: Option<String>,
}

/// 发送前的随机延迟区间（秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingRange {
    pub min_seconds: u64,
    pub max_seconds: u64,
}

impl PacingRange {
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            max_seconds,
        }
    }

    /// 两端均为0或负数时视为未设置
    pub fn from_job_settings(min_seconds: i64, max_seconds: i64) -> Option<Self> {
        if min_seconds <= 0 && max_seconds <= 0 {
            return None;
        }
        Some(Self::new(min_seconds.max(0) as u64, max_seconds.max(0) as u64))
    }

    pub fn is_fixed(&self) -> bool {
        self.min_seconds >= self.max_seconds
    }

    pub fn min(&self) -> Duration {
        Duration::from_secs(self.min_seconds)
    }
}

/// 任务来源上下文，结果处理器据此回写持久化记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobContext {
    Sequence {
        sequence_id: String,
        contact_phone: String,
        current_trigger: String,
        next_trigger: Option<String>,
        /// 认领时写入 `processing_device_id` 的设备，回写时据此确认认领仍然有效
        claimed_device_id: String,
    },
    Campaign {
        campaign_id: String,
    },
}

/// 工作池中的一个发送任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchJob {
    /// 持久化记录 ID（步骤记录或广播消息）
    pub id: String,
    pub queue: QueueKind,
    pub recipient: String,
    pub recipient_name: Option<String>,
    pub preferred_device_id: Option<String>,
    pub payload: MessagePayload,
    pub pacing: Option<PacingRange>,
    pub context: JobContext,
}

impl DispatchJob {
    pub fn from_flow_job(job: &DueFlowJob, claimed_device_id: &str) -> Self {
        Self {
            id: job.id.clone(),
            queue: QueueKind::Sequence,
            recipient: job.contact_phone.clone(),
            recipient_name: job.contact_name.clone(),
            preferred_device_id: Some(claimed_device_id.to_string()),
            payload: MessagePayload {
                message_type: job.message_type.clone(),
                content: job.content.clone(),
                media_url: job.media_url.clone(),
            },
            pacing: PacingRange::from_job_settings(job.min_delay_seconds, job.max_delay_seconds),
            context: JobContext::Sequence {
                sequence_id: job.sequence_id.clone(),
                contact_phone: job.contact_phone.clone(),
                current_trigger: job.current_trigger.clone(),
                next_trigger: job.next_trigger.clone(),
                claimed_device_id: claimed_device_id.to_string(),
            },
        }
    }

    pub fn from_broadcast(message: &BroadcastMessage) -> Self {
        Self {
            id: message.id.clone(),
            queue: QueueKind::Campaign,
            recipient: message.recipient_phone.clone(),
            recipient_name: message.recipient_name.clone(),
            preferred_device_id: message.preferred_device_id.clone(),
            payload: MessagePayload {
                message_type: message.message_type.clone(),
                content: message.content.clone(),
                media_url: message.media_url.clone(),
            },
            pacing: PacingRange::from_job_settings(
                message.min_delay_seconds,
                message.max_delay_seconds,
            ),
            context: JobContext::Campaign {
                campaign_id: message.campaign_id.clone(),
            },
        }
    }
}
