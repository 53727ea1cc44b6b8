//! 派发时的设备偏好选择
//!
//! 每个调度周期先拍一次负载快照，再为每条到期记录挑选首选设备：
//! 联系人的历史设备在软上限以内时优先使用，否则选加权负载最低的设备。
//! 选出的只是偏好，真正的占用仍由预约服务决定。

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use dispatch_core::{
    errors::DispatchResult,
    models::{DeviceLoad, WindowKind},
    traits::CoordinationStore,
};

use crate::device_cache::DeviceDirectory;

/// 一个调度周期内的设备负载快照
#[derive(Debug, Clone, Default)]
pub struct DeviceLoadTable {
    loads: HashMap<String, DeviceLoad>,
}

impl DeviceLoadTable {
    pub fn from_loads(loads: impl IntoIterator<Item = DeviceLoad>) -> Self {
        Self {
            loads: loads
                .into_iter()
                .map(|load| (load.device_id.clone(), load))
                .collect(),
        }
    }

    /// 小时/天计数与禁用标记取自协调存储，在途认领数取自持久化存储
    pub async fn capture(
        directory: &DeviceDirectory,
        store: &dyn CoordinationStore,
        in_flight: &HashMap<String, i64>,
        now: DateTime<Utc>,
    ) -> DispatchResult<Self> {
        let mut loads = Vec::new();
        for device in directory.online_devices().await? {
            let hour_load = store.get(&device.id, WindowKind::Hour, now).await?;
            let day_load = store.get(&device.id, WindowKind::Day, now).await?;
            let available = !store.is_disabled(&device.id).await?;
            loads.push(DeviceLoad {
                in_flight: in_flight.get(&device.id).copied().unwrap_or(0),
                device_id: device.id,
                status: device.status,
                hour_load,
                day_load,
                available,
            });
        }
        Ok(Self::from_loads(loads))
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceLoad> {
        self.loads.get(device_id)
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    /// 同一周期内后续的选择要看到刚刚认领的记录
    pub fn record_claim(&mut self, device_id: &str) {
        if let Some(load) = self.loads.get_mut(device_id) {
            load.in_flight += 1;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceSelector {
    hourly_limit: i64,
    daily_limit: i64,
    soft_limit: i64,
}

impl DeviceSelector {
    pub fn new(hourly_limit: i64, daily_limit: i64, soft_limit: i64) -> Self {
        Self {
            hourly_limit,
            daily_limit,
            soft_limit,
        }
    }

    pub fn select(&self, table: &DeviceLoadTable, historical: Option<&str>) -> Option<String> {
        if let Some(load) = historical.and_then(|id| table.get(id)) {
            if load.hour_load < self.soft_limit
                && load.has_capacity(self.hourly_limit, self.daily_limit)
            {
                return Some(load.device_id.clone());
            }
        }

        table
            .loads
            .values()
            .filter(|load| load.has_capacity(self.hourly_limit, self.daily_limit))
            .min_by(|a, b| {
                a.weighted_score()
                    .total_cmp(&b.weighted_score())
                    .then_with(|| a.device_id.cmp(&b.device_id))
            })
            .map(|load| load.device_id.clone())
    }
}
