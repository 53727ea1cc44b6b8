use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 设备在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("online") {
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        }
    }
}

/// 设备目录返回的设备信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub status: DeviceStatus,
    pub hour_load: i64,
    pub day_load: i64,
}

impl DeviceInfo {
    pub fn online(id: impl Into<String>, hour_load: i64, day_load: i64) -> Self {
        Self {
            id: id.into(),
            status: DeviceStatus::Online,
            hour_load,
            day_load,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }
}

/// 分发时用于设备偏好的负载快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceLoad {
    pub device_id: String,
    pub status: DeviceStatus,
    pub hour_load: i64,
    pub day_load: i64,
    pub in_flight: i64,
    /// 未被健康检查临时禁用
    pub available: bool,
}

impl DeviceLoad {
    /// 设备是否还有余量
    pub fn has_capacity(&self, hourly_limit: i64, daily_limit: i64) -> bool {
        self.available
            && self.status == DeviceStatus::Online
            && self.hour_load < hourly_limit
            && self.day_load < daily_limit
    }

    /// 加权负载分数：0.7 * 小时负载 + 0.3 * 处理中数量
    pub fn weighted_score(&self) -> f64 {
        0.7 * self.hour_load as f64 + 0.3 * self.in_flight as f64
    }
}

/// 设备当前统计（来自协调存储）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStats {
    pub device_id: String,
    pub hour_count: i64,
    pub day_count: i64,
    pub is_locked: bool,
    pub disabled: bool,
    pub timestamp: DateTime<Utc>,
}
