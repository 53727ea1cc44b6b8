use async_trait::async_trait;

use crate::errors::DispatchResult;
use crate::models::MessagePayload;

/// 消息发送器，传输协议对核心不透明
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(
        &self,
        device_id: &str,
        recipient: &str,
        payload: &MessagePayload,
    ) -> DispatchResult<()>;
}
