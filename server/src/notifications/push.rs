//! Mobile push delivery.
//!
//! The dispatcher only sees [`PushGateway`]; which service sits behind it is
//! decided once at startup from the `[push]` config section.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PushConfig;

/// Content of one push notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    /// Flat string map; push services reject nested data values
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("push service rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// A service able to deliver a push to one device registration.
#[async_trait::async_trait]
pub trait PushGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, registration_id: &str, message: &PushMessage) -> Result<(), PushError>;
}

pub type SharedPushGateway = Arc<dyn PushGateway>;

/// Firebase Cloud Messaging, legacy HTTP API.
pub struct FcmGateway {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct FcmRequest<'a> {
    to: &'a str,
    notification: FcmNotification<'a>,
    data: &'a BTreeMap<String, String>,
}

impl FcmGateway {
    pub fn new(endpoint: String, server_key: String, timeout: Duration) -> Result<Self, PushError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            server_key,
        })
    }
}

#[async_trait::async_trait]
impl PushGateway for FcmGateway {
    fn name(&self) -> &str {
        "fcm"
    }

    async fn send(&self, registration_id: &str, message: &PushMessage) -> Result<(), PushError> {
        let body = FcmRequest {
            to: registration_id,
            notification: FcmNotification {
                title: &message.title,
                body: &message.body,
            },
            data: &message.data,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("key={}", self.server_key),
            )
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Used when push is not configured: logs and reports success.
pub struct DisabledGateway;

#[async_trait::async_trait]
impl PushGateway for DisabledGateway {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn send(&self, registration_id: &str, message: &PushMessage) -> Result<(), PushError> {
        tracing::debug!(
            registration_id = %registration_id,
            title = %message.title,
            "Push disabled, message not sent"
        );
        Ok(())
    }
}

/// Build the gateway selected by configuration.
pub fn build_gateway(config: Option<&PushConfig>) -> Result<SharedPushGateway, PushError> {
    match config {
        Some(push) if push.enabled && !push.server_key.is_empty() => {
            tracing::info!(endpoint = %push.endpoint, "Push delivery: fcm");
            Ok(Arc::new(FcmGateway::new(
                push.endpoint.clone(),
                push.server_key.clone(),
                Duration::from_secs(push.timeout_secs),
            )?))
        }
        Some(push) if push.enabled => {
            tracing::warn!("Push enabled without a server key, push delivery disabled");
            Ok(Arc::new(DisabledGateway))
        }
        _ => {
            tracing::info!("Push delivery: disabled");
            Ok(Arc::new(DisabledGateway))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fcm_request_shape() {
        let mut data = BTreeMap::new();
        data.insert("type".to_string(), "chat".to_string());
        let message = PushMessage {
            title: "New message".to_string(),
            body: "Ana sent you a message".to_string(),
            data,
        };
        let body = FcmRequest {
            to: "device-token",
            notification: FcmNotification {
                title: &message.title,
                body: &message.body,
            },
            data: &message.data,
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["to"], "device-token");
        assert_eq!(value["notification"]["title"], "New message");
        assert_eq!(value["data"]["type"], "chat");
    }

    #[test]
    fn test_gateway_selection() {
        assert_eq!(build_gateway(None).unwrap().name(), "disabled");

        let mut config = PushConfig::default();
        config.enabled = true;
        assert_eq!(build_gateway(Some(&config)).unwrap().name(), "disabled");

        config.server_key = "secret".to_string();
        assert_eq!(build_gateway(Some(&config)).unwrap().name(), "fcm");
    }
}
