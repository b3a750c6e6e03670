//! REST calls managing the tenant's WhatsApp channel connection.

use std::sync::Arc;

use {
    engage_client::{ApiClient, ApiError, RequestOptions},
    engage_protocol::paths,
    reqwest::Method,
    serde::{Deserialize, Serialize},
};

use crate::pairing::{PairingHandle, PairingListener, PairingStream};

pub const STATUS_PAIRING_REQUIRED: &str = "pairing_required";
pub const STATUS_CONNECTED: &str = "connected";
pub const STATUS_ALREADY_CONNECTED: &str = "already_connected";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
}

impl ConnectResponse {
    /// The device must be paired through the pairing stream.
    pub fn needs_pairing(&self) -> bool {
        self.status == STATUS_PAIRING_REQUIRED
    }

    /// The channel is usable without pairing.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.status.as_str(),
            STATUS_CONNECTED | STATUS_ALREADY_CONNECTED
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub is_connected: bool,
    #[serde(default)]
    pub jid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    pub recipient_jid: &'a str,
    pub message: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub success: bool,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct WhatsAppApi {
    client: ApiClient,
}

impl WhatsAppApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub async fn connect(&self) -> Result<ConnectResponse, ApiError> {
        self.client
            .send(paths::WHATSAPP_CONNECT, RequestOptions::new(Method::POST))
            .await
    }

    pub async fn disconnect(&self) -> Result<DisconnectResponse, ApiError> {
        self.client.delete(paths::WHATSAPP_DISCONNECT).await
    }

    pub async fn status(&self) -> Result<ChannelStatus, ApiError> {
        self.client.get(paths::WHATSAPP_STATUS).await
    }

    pub async fn send_message(
        &self,
        recipient_jid: &str,
        message: &str,
    ) -> Result<SendMessageResponse, ApiError> {
        self.client
            .post(paths::WHATSAPP_SEND, &SendMessageRequest {
                recipient_jid,
                message,
            })
            .await
    }

    /// Start a pairing attempt on the event stream.
    pub fn pair(&self, listener: Arc<dyn PairingListener>) -> PairingHandle {
        PairingStream::start(&self.client, listener)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn connect_response(value: serde_json::Value) -> ConnectResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn connect_status_drives_next_step() {
        let fresh = connect_response(serde_json::json!({"status": "connected"}));
        assert!(fresh.is_connected());
        assert!(!fresh.needs_pairing());

        let existing = connect_response(serde_json::json!({
            "status": "already_connected",
            "message": "WhatsApp already connected",
        }));
        assert!(existing.is_connected());

        let pairing = connect_response(serde_json::json!({
            "status": "pairing_required",
            "stream_url": "/api/whatsapp/qr/stream?tenant_id=t1",
        }));
        assert!(pairing.needs_pairing());
        assert!(!pairing.is_connected());
        assert_eq!(pairing.message, "");
    }
}
