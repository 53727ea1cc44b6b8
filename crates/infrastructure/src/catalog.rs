use async_trait::async_trait;
use dispatch_core::{errors::DispatchResult, models::DeviceInfo, traits::DeviceCatalog};
use std::sync::RwLock;

/// 进程内设备目录，设备列表由调用方维护
#[derive(Debug, Default)]
pub struct InMemoryDeviceCatalog {
    devices: RwLock<Vec<DeviceInfo>>,
}

impl InMemoryDeviceCatalog {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices: RwLock::new(devices),
        }
    }

    pub fn set_devices(&self, devices: Vec<DeviceInfo>) {
        if let Ok(mut guard) = self.devices.write() {
            *guard = devices;
        }
    }
}

#[async_trait]
impl DeviceCatalog for InMemoryDeviceCatalog {
    async fn list_online(&self) -> DispatchResult<Vec<DeviceInfo>> {
        let devices = self
            .devices
            .read()
            .map(|guard| guard.iter().filter(|d| d.is_online()).cloned().collect())
            .unwrap_or_default();
        Ok(devices)
    }
}
