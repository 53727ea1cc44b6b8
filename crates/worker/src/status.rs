use chrono::Utc;
use dispatch_core::models::{WorkerActivity, WorkerStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Per-device send status, for monitoring only
#[derive(Debug, Default)]
pub struct WorkerStatusBoard {
    statuses: RwLock<HashMap<String, WorkerStatus>>,
}

impl WorkerStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn begin(&self, device_id: &str) {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .entry(device_id.to_string())
            .or_insert_with(|| WorkerStatus::new(device_id));
        status.queue_size += 1;
        status.status = WorkerActivity::Processing;
        status.last_activity = Utc::now();
    }

    pub async fn finish(&self, device_id: &str, success: bool) {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .entry(device_id.to_string())
            .or_insert_with(|| WorkerStatus::new(device_id));
        status.queue_size = status.queue_size.saturating_sub(1);
        if success {
            status.processed_count += 1;
        } else {
            status.failed_count += 1;
        }
        if status.queue_size == 0 {
            status.status = WorkerActivity::Idle;
        }
        status.last_activity = Utc::now();
    }

    pub async fn get(&self, device_id: &str) -> Option<WorkerStatus> {
        self.statuses.read().await.get(device_id).cloned()
    }

    /// Snapshot sorted by device id
    pub async fn snapshot(&self) -> Vec<WorkerStatus> {
        let mut all: Vec<_> = self.statuses.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        all
    }
}
