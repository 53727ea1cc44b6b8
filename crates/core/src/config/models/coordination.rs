use serde::{Deserialize, Serialize};

/// 协调存储后端
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationBackend {
    #[default]
    Redis,
    /// 进程内存储，仅适用于单进程部署和测试
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CoordinationConfig {
    pub backend: CoordinationBackend,
    pub redis: RedisConfig,
}

impl CoordinationConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == CoordinationBackend::Redis {
            self.redis.validate()?;
        }
        Ok(())
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub database: i64,
    pub password: Option<String>,
    pub connection_timeout_seconds: u64,
    /// 所有协调键的前缀，多个环境共用一个 Redis 时使用
    pub key_prefix: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            connection_timeout_seconds: 5,
            key_prefix: None,
        }
    }
}

impl RedisConfig {
    /// Validate Redis configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("Redis主机地址不能为空"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("Redis端口必须大于0"));
        }

        if self.database < 0 {
            return Err(anyhow::anyhow!("Redis数据库索引不能为负数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Redis连接超时时间必须大于0"));
        }

        Ok(())
    }

    /// Build Redis connection URL
    pub fn build_url(&self) -> String {
        let auth = if let Some(password) = &self.password {
            format!(":{password}@")
        } else {
            String::new()
        };
        format!(
            "redis://{}{}:{}/{}",
            auth, self.host, self.port, self.database
        )
    }
}
