use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 每个设备的发送上限
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub hourly_limit: i64,
    pub daily_limit: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            hourly_limit: 80,
            daily_limit: 800,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hourly_limit <= 0 || self.daily_limit <= 0 {
            return Err(anyhow::anyhow!("发送上限必须大于0"));
        }
        if self.hourly_limit > self.daily_limit {
            return Err(anyhow::anyhow!("小时上限不能大于每日上限"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    pub lock_ttl_seconds: u64,
    pub device_cache_refresh_seconds: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            lock_ttl_seconds: 30,
            device_cache_refresh_seconds: 5,
        }
    }
}

impl ReservationConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lock_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("设备锁TTL必须大于0"));
        }
        if self.device_cache_refresh_seconds == 0 {
            return Err(anyhow::anyhow!("设备缓存刷新间隔必须大于0"));
        }
        Ok(())
    }
}

/// 设备健康检查
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// 小时计数达到上限的该比例时记一次失败
    pub load_ratio: f64,
    pub failure_threshold: i64,
    pub failure_ttl_seconds: u64,
    pub disable_ttl_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            load_ratio: 0.9,
            failure_threshold: 5,
            failure_ttl_seconds: 3600,
            disable_ttl_seconds: 1800,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("健康检查间隔必须大于0"));
        }
        if !(self.load_ratio > 0.0 && self.load_ratio <= 1.0) {
            return Err(anyhow::anyhow!("健康检查负载比例必须在(0, 1]之间"));
        }
        if self.failure_threshold <= 0 {
            return Err(anyhow::anyhow!("健康检查失败阈值必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub campaign_workers: usize,
    pub sequence_workers: usize,
    pub queue_capacity: usize,
    pub min_delay_seconds: u64,
    pub max_delay_seconds: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            campaign_workers: 10,
            sequence_workers: 10,
            queue_capacity: 1000,
            min_delay_seconds: 10,
            max_delay_seconds: 30,
        }
    }
}

impl WorkerPoolConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.campaign_workers == 0 || self.sequence_workers == 0 {
            return Err(anyhow::anyhow!("工作协程数量必须大于0"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow::anyhow!("队列容量必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub campaign_enabled: bool,
    pub tick_interval_seconds: u64,
    pub batch_size: i64,
    pub stuck_timeout_seconds: i64,
    pub schedule_tolerance_minutes: i64,
    /// 历史设备小时负载低于该值时优先使用
    pub preferred_soft_limit: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            campaign_enabled: true,
            tick_interval_seconds: 10,
            batch_size: 10_000,
            stuck_timeout_seconds: 300,
            schedule_tolerance_minutes: 10,
            preferred_soft_limit: 50,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_seconds == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }
        if self.batch_size <= 0 {
            return Err(anyhow::anyhow!("批次大小必须大于0"));
        }
        if self.stuck_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("处理超时时间必须大于0"));
        }
        Ok(())
    }
}

/// HTTP 发送网关
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3000".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(anyhow::anyhow!("发送网关地址必须是HTTP(S) URL"));
        }
        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("发送超时时间必须大于0"));
        }
        Ok(())
    }
}
