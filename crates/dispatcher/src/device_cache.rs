use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use dispatch_core::{errors::DispatchResult, models::DeviceInfo, traits::DeviceCatalog};

use crate::periodic::PeriodicTask;

/// 在线设备的本地缓存
///
/// 只作为提示使用，设备能否发送始终以协调存储的预约结果为准。
#[derive(Debug, Default)]
pub struct DeviceCache {
    devices: RwLock<HashMap<String, DeviceInfo>>,
    refreshed_at: RwLock<Option<DateTime<Utc>>>,
}

impl DeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, device_id: &str) -> Option<DeviceInfo> {
        self.devices.read().await.get(device_id).cloned()
    }

    pub async fn put(&self, device: DeviceInfo) {
        self.devices.write().await.insert(device.id.clone(), device);
    }

    /// 所有缓存的设备，按 id 排序
    pub async fn range(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<_> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// 用一次完整的目录快照替换缓存内容
    pub async fn replace_all(&self, devices: Vec<DeviceInfo>) {
        let fresh: HashMap<_, _> = devices.into_iter().map(|d| (d.id.clone(), d)).collect();
        *self.devices.write().await = fresh;
        *self.refreshed_at.write().await = Some(Utc::now());
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    pub async fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        *self.refreshed_at.read().await
    }
}

/// 设备目录：优先读缓存，缓存为空时回退到设备目录服务
pub struct DeviceDirectory {
    catalog: Arc<dyn DeviceCatalog>,
    cache: Arc<DeviceCache>,
}

impl DeviceDirectory {
    pub fn new(catalog: Arc<dyn DeviceCatalog>) -> Self {
        Self {
            catalog,
            cache: Arc::new(DeviceCache::new()),
        }
    }

    pub fn with_cache(catalog: Arc<dyn DeviceCatalog>, cache: Arc<DeviceCache>) -> Self {
        Self { catalog, cache }
    }

    pub fn cache(&self) -> Arc<DeviceCache> {
        Arc::clone(&self.cache)
    }

    /// 从目录服务重新加载在线设备，返回加载的数量
    pub async fn refresh(&self) -> DispatchResult<usize> {
        let devices = self.catalog.list_online().await?;
        let count = devices.len();
        self.cache.replace_all(devices).await;
        debug!("设备缓存已刷新，在线设备 {} 个", count);
        Ok(count)
    }

    pub async fn online_devices(&self) -> DispatchResult<Vec<DeviceInfo>> {
        let cached = self.cache.range().await;
        if !cached.is_empty() {
            return Ok(cached.into_iter().filter(DeviceInfo::is_online).collect());
        }

        let mut devices = self.catalog.list_online().await?;
        devices.retain(DeviceInfo::is_online);
        if devices.is_empty() {
            warn!("设备目录中没有在线设备");
        }
        Ok(devices)
    }
}

#[async_trait]
impl PeriodicTask for DeviceDirectory {
    fn name(&self) -> &'static str {
        "device_cache_refresh"
    }

    async fn run_once(&self) -> DispatchResult<()> {
        self.refresh().await.map(|_| ())
    }
}
