use async_trait::async_trait;
use dispatch_core::{
    errors::{DispatchError, DispatchResult},
    models::MessagePayload,
    traits::MessageSender,
    SenderConfig,
};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    device_id: &'a str,
    recipient: &'a str,
    message_type: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_url: Option<&'a str>,
}

/// Posts messages to an HTTP gateway that owns the device sessions
pub struct HttpMessageSender {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMessageSender {
    pub fn new(config: &SenderConfig) -> DispatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| DispatchError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn send_url(&self) -> String {
        format!("{}/send", self.endpoint)
    }
}

#[async_trait]
impl MessageSender for HttpMessageSender {
    async fn send(
        &self,
        device_id: &str,
        recipient: &str,
        payload: &MessagePayload,
    ) -> DispatchResult<()> {
        let body = SendRequest {
            device_id,
            recipient,
            message_type: &payload.message_type,
            content: &payload.content,
            media_url: payload.media_url.as_deref(),
        };

        let response = self
            .client
            .post(self.send_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DispatchError::Transport(format!(
                "gateway returned {status}: {text}"
            )));
        }

        debug!(device_id, recipient, "Message accepted by gateway");
        Ok(())
    }
}
