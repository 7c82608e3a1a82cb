//! Inbound protocol events as delivered by the transport.

use serde::{Deserialize, Serialize};

/// Event pushed to a worker by its protocol connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum GatewayEvent {
    MessageCreate(InboundMessage),
    MessageEdit(InboundMessage),
}

impl GatewayEvent {
    pub fn message(&self) -> &InboundMessage {
        match self {
            Self::MessageCreate(m) | Self::MessageEdit(m) => m,
        }
    }

    pub fn is_edit(&self) -> bool {
        matches!(self, Self::MessageEdit(_))
    }
}

/// A chat message as rendered by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    /// Id of the message this one replies to.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub components: Vec<Button>,
}

impl InboundMessage {
    /// Footer text of the first embed, which echoes the prompt on error cards.
    pub fn footer_text(&self) -> Option<&str> {
        self.embeds
            .first()
            .and_then(|e| e.footer.as_deref())
            .filter(|f| !f.is_empty())
    }

    pub fn button_by_label(&self, needle: &str) -> Option<&Button> {
        self.components.iter().find(|b| b.label.contains(needle))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

/// Structured annotation attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
}

impl Embed {
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

/// Selectable button on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub custom_id: String,
}
