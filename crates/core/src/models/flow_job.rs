use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// 尚未激活的步骤记录使用的触发时间占位值（9999-12-31）
pub const FAR_FUTURE_TRIGGER_TIME: i64 = 253_402_214_400;

/// 序列步骤与联系人的执行记录
///
/// 每个 (sequence, step, contact) 对应一行，记录永不物理删除。
///
/// # 字段说明
///
/// - `current_trigger`: 当前步骤的触发器
/// - `next_trigger`: 完成后要激活的下一个触发器，为空表示序列结束
/// - `next_trigger_time`: 到期时间，未激活的步骤为远期占位值
/// - `processing_device_id` / `processing_started_at`: 认领标记，认领成功后才会写入
/// - `sent_device_id`: 实际发送的设备，用于后续的设备亲和
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowJob {
    pub id: String,
    pub sequence_id: String,
    pub step_id: String,
    pub contact_phone: String,
    pub contact_name: Option<String>,
    pub current_trigger: String,
    pub next_trigger: Option<String>,
    pub next_trigger_time: DateTime<Utc>,
    pub status: FlowJobStatus,
    pub processing_device_id: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub sent_device_id: Option<String>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl FlowJob {
    pub fn is_claimed(&self) -> bool {
        self.processing_device_id.is_some()
    }

    pub fn far_future() -> DateTime<Utc> {
        Utc.timestamp_opt(FAR_FUTURE_TRIGGER_TIME, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// 步骤记录状态
///
/// ```rust
/// use dispatch_core::models::FlowJobStatus;
///
/// assert_eq!(FlowJobStatus::parse("active"), Some(FlowJobStatus::Active));
/// assert_eq!(FlowJobStatus::Sent.as_str(), "sent");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowJobStatus {
    Pending,
    Active,
    Sent,
    Failed,
    Completed,
}

impl FlowJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowJobStatus::Pending => "pending",
            FlowJobStatus::Active => "active",
            FlowJobStatus::Sent => "sent",
            FlowJobStatus::Failed => "failed",
            FlowJobStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(FlowJobStatus::Pending),
            "active" => Some(FlowJobStatus::Active),
            "sent" => Some(FlowJobStatus::Sent),
            "failed" => Some(FlowJobStatus::Failed),
            "completed" => Some(FlowJobStatus::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowJobStatus::Sent | FlowJobStatus::Failed | FlowJobStatus::Completed
        )
    }
}

impl std::fmt::Display for FlowJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 到期可认领的步骤记录，连同步骤内容与联系人偏好设备
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DueFlowJob {
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
    /// 联系人的历史设备
    pub preferred_device_id: Option<String>,
}
