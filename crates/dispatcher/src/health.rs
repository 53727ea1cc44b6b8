use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use dispatch_core::{
    config::{HealthConfig, RateLimitConfig},
    errors::DispatchResult,
    models::WindowKind,
    traits::CoordinationStore,
};

use crate::device_cache::DeviceDirectory;
use crate::periodic::PeriodicTask;

/// 一次健康检查的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub checked: usize,
    /// 本次超过负载阈值、失败计数加一的设备
    pub flagged: Vec<String>,
    /// 本次被临时禁用的设备
    pub disabled: Vec<String>,
    /// 协调存储出错而跳过的设备数
    pub errors: usize,
}

enum DeviceHealth {
    Healthy,
    Flagged,
    Disabled,
}

/// 设备健康监控
///
/// 小时计数达到上限的一定比例时累加失败计数，连续超过阈值则临时禁用设备；
/// 负载恢复后清零失败计数。禁用标记只影响候选排序，不阻止首选设备的预约。
pub struct DeviceHealthMonitor {
    store: Arc<dyn CoordinationStore>,
    directory: Arc<DeviceDirectory>,
    hourly_limit: i64,
    config: HealthConfig,
}

impl DeviceHealthMonitor {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        directory: Arc<DeviceDirectory>,
        rate_limit: &RateLimitConfig,
        config: HealthConfig,
    ) -> Self {
        Self {
            store,
            directory,
            hourly_limit: rate_limit.hourly_limit,
            config,
        }
    }

    fn load_threshold(&self) -> f64 {
        self.hourly_limit as f64 * self.config.load_ratio
    }

    pub async fn check_once(&self) -> DispatchResult<HealthReport> {
        let now = Utc::now();
        let mut report = HealthReport::default();

        for device in self.directory.online_devices().await? {
            report.checked += 1;
            match self.check_device(&device.id, now).await {
                Ok(DeviceHealth::Healthy) => {}
                Ok(DeviceHealth::Flagged) => report.flagged.push(device.id),
                Ok(DeviceHealth::Disabled) => {
                    report.flagged.push(device.id.clone());
                    report.disabled.push(device.id);
                }
                Err(e) => {
                    error!(device_id = %device.id, "设备健康检查失败: {}", e);
                    report.errors += 1;
                }
            }
        }

        if !report.flagged.is_empty() || report.errors > 0 {
            info!(
                checked = report.checked,
                flagged = report.flagged.len(),
                disabled = report.disabled.len(),
                errors = report.errors,
                "设备健康检查完成"
            );
        }
        Ok(report)
    }

    async fn check_device(&self, device_id: &str, now: DateTime<Utc>) -> DispatchResult<DeviceHealth> {
        let hour_count = self.store.get(device_id, WindowKind::Hour, now).await?;
        if (hour_count as f64) < self.load_threshold() {
            self.store.reset_failures(device_id).await?;
            return Ok(DeviceHealth::Healthy);
        }

        let failure_ttl = Duration::from_secs(self.config.failure_ttl_seconds);
        let failures = self.store.record_failure(device_id, failure_ttl).await?;
        debug!(device_id, hour_count, failures, "设备负载过高");
        if failures <= self.config.failure_threshold {
            return Ok(DeviceHealth::Flagged);
        }

        let disable_ttl = Duration::from_secs(self.config.disable_ttl_seconds);
        self.store.disable(device_id, disable_ttl).await?;
        metrics::counter!("dispatch_devices_disabled_total").increment(1);
        warn!(
            device_id,
            failures,
            "设备连续高负载，临时禁用 {} 秒",
            self.config.disable_ttl_seconds
        );
        Ok(DeviceHealth::Disabled)
    }
}

#[async_trait]
impl PeriodicTask for DeviceHealthMonitor {
    fn name(&self) -> &'static str {
        "device_health"
    }

    async fn run_once(&self) -> DispatchResult<()> {
        self.check_once().await.map(|_| ())
    }
}
