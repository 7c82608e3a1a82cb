//! Operator alerts: bans, billing holds and other conditions a human must see.

pub mod telegram;

use async_trait::async_trait;

pub use telegram::TelegramNotifier;

use crate::error::NotifyError;

/// Sink for operator notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), NotifyError>;
}

/// Notifier that only logs; used when no chat is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        tracing::warn!(alert = %text, "Operator alert");
        Ok(())
    }
}

/// Alert text as operators see it: identity name first.
pub fn format_alert(identity: &str, text: &str) -> String {
    format!("{identity} {text}!")
}
