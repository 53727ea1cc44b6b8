use async_trait::async_trait;

use crate::errors::DispatchResult;
use crate::models::DeviceInfo;

/// 设备目录（只读）
#[async_trait]
pub trait DeviceCatalog: Send + Sync {
    async fn list_online(&self) -> DispatchResult<Vec<DeviceInfo>>;
}
