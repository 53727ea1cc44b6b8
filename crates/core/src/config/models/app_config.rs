use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    coordination::CoordinationConfig,
    database::DatabaseConfig,
    dispatch::{
        HealthConfig, RateLimitConfig, ReservationConfig, SchedulerConfig, SenderConfig,
        WorkerPoolConfig,
    },
    observability::ObservabilityConfig,
};

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/dispatch.toml",
    "dispatch.toml",
    "/etc/dispatch/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub coordination: CoordinationConfig,
    pub rate_limit: RateLimitConfig,
    pub reservation: ReservationConfig,
    pub health: HealthConfig,
    pub worker_pool: WorkerPoolConfig,
    pub scheduler: SchedulerConfig,
    pub sender: SenderConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default values
    /// 2. Config file (TOML format), explicit path or the first default path found
    /// 3. Environment variable overrides (prefix: DISPATCH_)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("DISPATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.coordination
            .validate()
            .context("协调存储配置验证失败")?;
        self.rate_limit.validate().context("限流配置验证失败")?;
        self.reservation.validate().context("预约配置验证失败")?;
        self.health.validate().context("健康检查配置验证失败")?;
        self.worker_pool.validate().context("工作池配置验证失败")?;
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.sender.validate().context("发送网关配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}
