//! Messaging channel contract.

use async_trait::async_trait;

/// Failure reported by a messaging channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Network, server or protocol trouble. Worth retrying.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The channel refused the recipient (blocked bot, unknown chat, ...).
    #[error("recipient rejected: {0}")]
    Rejected(String),
    #[error("channel not configured: {0}")]
    NotConfigured(String),
}

/// External transport that can push a text message to a recipient.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, recipient: &str, message: &str) -> Result<(), ChannelError>;
}
