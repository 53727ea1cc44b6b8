use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerActivity {
    Idle,
    Processing,
}

/// 每个设备的发送状态快照，仅用于监控
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub device_id: String,
    pub status: WorkerActivity,
    pub queue_size: usize,
    pub processed_count: u64,
    pub failed_count: u64,
    pub last_activity: DateTime<Utc>,
}

impl WorkerStatus {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            status: WorkerActivity::Idle,
            queue_size: 0,
            processed_count: 0,
            failed_count: 0,
            last_activity: Utc::now(),
        }
    }
}
