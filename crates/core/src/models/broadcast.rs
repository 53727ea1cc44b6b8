use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 活动广播消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
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
    pub status: BroadcastStatus,
    pub scheduled_at: DateTime<Utc>,
    pub processing_device_id: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastStatus::Pending => "pending",
            BroadcastStatus::Processing => "processing",
            BroadcastStatus::Sent => "sent",
            BroadcastStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(BroadcastStatus::Pending),
            "processing" => Some(BroadcastStatus::Processing),
            "sent" => Some(BroadcastStatus::Sent),
            "failed" => Some(BroadcastStatus::Failed),
            _ => None,
        }
    }
}
