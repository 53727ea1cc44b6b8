use chrono::{DateTime, Utc};
use dispatch_core::models::WindowKind;

/// 协调存储键约定
///
/// - `lock:<device>`
/// - `rate:hour:<device>:<YYYYMMDDHH>` / `rate:day:<device>:<YYYYMMDD>`
/// - `health:fail:<device>` / `health:disabled:<device>`
#[derive(Debug, Clone, Default)]
pub struct KeyBuilder {
    prefix: Option<String>,
}

impl KeyBuilder {
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()),
        }
    }

    fn build(&self, key: String) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key,
        }
    }

    pub fn lock(&self, device_id: &str) -> String {
        self.build(format!("lock:{device_id}"))
    }

    pub fn rate(&self, device_id: &str, kind: WindowKind, at: DateTime<Utc>) -> String {
        self.build(format!(
            "rate:{}:{}:{}",
            kind.as_str(),
            device_id,
            kind.bucket(at)
        ))
    }

    pub fn health_failures(&self, device_id: &str) -> String {
        self.build(format!("health:fail:{device_id}"))
    }

    pub fn health_disabled(&self, device_id: &str) -> String {
        self.build(format!("health:disabled:{device_id}"))
    }
}
