//! Protocol gateway: the worker's only way to talk to the service.
//!
//! Outbound calls go through [`ProtocolGateway`]; inbound events arrive on the
//! worker's event channel as [`GatewayEvent`]s.

pub mod event;
pub mod interactions;

use async_trait::async_trait;

pub use event::{Attachment, Button, Embed, GatewayEvent, InboundMessage};
pub use interactions::InteractionsClient;

use crate::error::ProtocolError;
use crate::tier::Mode;

/// Message flag the service uses for ephemeral (only-you-can-see) replies.
pub const EPHEMERAL_FLAG: u32 = 64;

/// Slash commands a worker issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    Imagine { prompt: String },
    /// Status probe; answered by a subscription card.
    Info,
    Fast,
    Relax,
}

impl OutboundCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Imagine { .. } => "imagine",
            Self::Info => "info",
            Self::Fast => "fast",
            Self::Relax => "relax",
        }
    }

    pub fn switch_to(mode: Mode) -> Self {
        match mode {
            Mode::Fast => Self::Fast,
            Mode::Relaxed => Self::Relax,
        }
    }
}

/// Button id for a follow-up on a generated grid.
pub fn action_id(action: &str, index: u8, asset_id: &str) -> String {
    format!("MJ::JOB::{action}::{index}::{asset_id}")
}

/// Outbound side of a protocol connection.
///
/// Implementations retry rate limits themselves and surface everything else.
#[async_trait]
pub trait ProtocolGateway: Send + Sync {
    async fn send_command(&self, command: &OutboundCommand) -> Result<String, ProtocolError>;

    async fn press_action(
        &self,
        message_id: &str,
        action_id: &str,
        flags: u32,
    ) -> Result<String, ProtocolError>;
}
