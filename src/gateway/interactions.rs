//! HTTP interactions client: `ProtocolGateway` over the service's REST endpoint.
//!
//! Commands and button presses are JSON interaction payloads posted with the
//! identity's user token, optionally through the identity's proxy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::json;

use super::{OutboundCommand, ProtocolGateway};
use crate::error::ProtocolError;
use crate::worker::identity::BotIdentity;

const DEFAULT_ENDPOINT: &str = "https://discord.com/api/v9/interactions";
const APPLICATION_ID: &str = "936929561302675456";

/// Attempts made for a rate-limited request before giving up.
pub const MAX_TRIALS: u32 = 3;

pub struct InteractionsClient {
    client: reqwest::Client,
    endpoint: String,
    identity: Arc<BotIdentity>,
    session_id: String,
    backoff: Duration,
}

impl InteractionsClient {
    pub fn new(identity: Arc<BotIdentity>) -> Result<Self, ProtocolError> {
        Self::with_endpoint(identity, DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(
        identity: Arc<BotIdentity>,
        endpoint: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
        if let Some(proxy) = &identity.proxy {
            let proxy = reqwest::Proxy::all(format!("http://{proxy}"))
                .map_err(|e| ProtocolError::Transport(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            identity,
            session_id: uuid::Uuid::new_v4().simple().to_string(),
            backoff: Duration::from_secs(1),
        })
    }

    /// Base delay of the 429 backoff; doubled per trial.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn command_payload(&self, command: &OutboundCommand) -> serde_json::Value {
        let options = match command {
            OutboundCommand::Imagine { prompt } => {
                json!([{ "type": 3, "name": "prompt", "value": prompt }])
            }
            _ => json!([]),
        };
        json!({
            "type": 2,
            "application_id": APPLICATION_ID,
            "guild_id": self.identity.server_id,
            "channel_id": self.identity.channel_id,
            "session_id": self.session_id,
            "data": {
                "name": command.name(),
                "type": 1,
                "options": options,
                "attachments": [],
            },
        })
    }

    fn action_payload(&self, message_id: &str, action_id: &str, flags: u32) -> serde_json::Value {
        json!({
            "type": 3,
            "application_id": APPLICATION_ID,
            "guild_id": self.identity.server_id,
            "channel_id": self.identity.channel_id,
            "session_id": self.session_id,
            "message_flags": flags,
            "message_id": message_id,
            "data": {
                "component_type": 2,
                "custom_id": action_id,
            },
        })
    }

    /// POST with exponential backoff on 429.
    async fn send(&self, payload: &serde_json::Value) -> Result<String, ProtocolError> {
        let mut delay = self.backoff;
        for trial in 1..=MAX_TRIALS {
            match self.send_once(payload).await {
                Err(e) if e.is_transient() && trial < MAX_TRIALS => {
                    tracing::warn!(trial, delay = ?delay, "Rate limited, backing off");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(ProtocolError::RateLimited { .. }) => {
                    return Err(ProtocolError::RateLimited { trials: trial });
                }
                other => return other,
            }
        }
        Err(ProtocolError::RateLimited { trials: MAX_TRIALS })
    }

    async fn send_once(&self, payload: &serde_json::Value) -> Result<String, ProtocolError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                self.identity.user_access_token.expose_secret(),
            )
            .json(payload)
            .send()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        if status < 300 {
            return Ok(body);
        }
        tracing::error!(status, body = %body, "Interaction rejected");
        Err(classify_status(status, body))
    }
}

/// Map a non-2xx status to the protocol failure taxonomy.
pub fn classify_status(status: u16, body: String) -> ProtocolError {
    match status {
        400 => ProtocolError::BadRequest(body),
        401 => ProtocolError::Unauthorized,
        429 => ProtocolError::RateLimited { trials: 1 },
        _ => ProtocolError::Generic { status, body },
    }
}

#[async_trait]
impl ProtocolGateway for InteractionsClient {
    async fn send_command(&self, command: &OutboundCommand) -> Result<String, ProtocolError> {
        tracing::debug!(command = command.name(), "Sending command");
        self.send(&self.command_payload(command)).await
    }

    async fn press_action(
        &self,
        message_id: &str,
        action_id: &str,
        flags: u32,
    ) -> Result<String, ProtocolError> {
        tracing::debug!(message_id, action_id, "Pressing action");
        self.send(&self.action_payload(message_id, action_id, flags))
            .await
    }
}
