use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 限流窗口类型
///
/// 窗口按时间分桶（小时: `YYYYMMDDHH`，天: `YYYYMMDD`），桶会自然滚动，
/// 不需要滑动窗口计算。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Hour,
    Day,
}

impl WindowKind {
    pub const ALL: [WindowKind; 2] = [WindowKind::Hour, WindowKind::Day];

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Hour => "hour",
            WindowKind::Day => "day",
        }
    }

    /// 计算给定时间所在的桶键（UTC）
    pub fn bucket(&self, at: DateTime<Utc>) -> String {
        match self {
            WindowKind::Hour => at.format("%Y%m%d%H").to_string(),
            WindowKind::Day => at.format("%Y%m%d").to_string(),
        }
    }

    /// 桶的过期时间：小时桶2小时，天桶25小时
    pub fn ttl(&self) -> Duration {
        match self {
            WindowKind::Hour => Duration::from_secs(2 * 60 * 60),
            WindowKind::Day => Duration::from_secs(25 * 60 * 60),
        }
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
