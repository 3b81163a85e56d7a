//! Telegram Bot API channel.
//!
//! Sends plain-text messages through `sendMessage`. Recipient ids are chat
//! ids as decimal strings.

use super::channel::{ChannelError, NotificationChannel};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const API_BASE: &str = "https://api.telegram.org";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TelegramChannel {
    client: Client,
    token: String,
    api_base: String,
}

/// Error envelope returned by the Bot API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramChannel {
    pub fn new(token: &str) -> Result<Self, ChannelError> {
        Self::with_api_base(token, API_BASE)
    }

    /// Points the channel at a different Bot API host (local bot API server).
    pub fn with_api_base(token: &str, api_base: &str) -> Result<Self, ChannelError> {
        if token.trim().is_empty() {
            return Err(ChannelError::NotConfigured(
                "telegram bot token is empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            token: token.trim().to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, recipient: &str, message: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": recipient,
            "text": message,
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        // A non-JSON body still tells us enough through the status code.
        let payload = response.json::<ApiResponse>().await.ok();
        if status.is_success() && payload.as_ref().map_or(true, |p| p.ok) {
            debug!("event=channel_send module=delivery status=ok channel=telegram");
            return Ok(());
        }

        let description = payload
            .and_then(|p| p.description)
            .unwrap_or_else(|| status.to_string());
        Err(classify_failure(status.as_u16(), &description))
    }
}

/// Maps a Bot API failure onto the channel error taxonomy.
fn classify_failure(status: u16, description: &str) -> ChannelError {
    let lowered = description.to_ascii_lowercase();
    let recipient_gone = status == 403
        || lowered.contains("chat not found")
        || lowered.contains("user is deactivated")
        || lowered.contains("bot was blocked");

    if recipient_gone {
        ChannelError::Rejected(format!("{status}: {description}"))
    } else {
        ChannelError::Transport(format!("{status}: {description}"))
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_failure, TelegramChannel};
    use crate::delivery::channel::ChannelError;

    #[test]
    fn blocked_or_unknown_recipients_are_rejections() {
        assert!(matches!(
            classify_failure(403, "Forbidden: bot was blocked by the user"),
            ChannelError::Rejected(_)
        ));
        assert!(matches!(
            classify_failure(400, "Bad Request: chat not found"),
            ChannelError::Rejected(_)
        ));
    }

    #[test]
    fn server_and_rate_limit_errors_are_transport() {
        assert!(matches!(
            classify_failure(429, "Too Many Requests: retry after 5"),
            ChannelError::Transport(_)
        ));
        assert!(matches!(
            classify_failure(502, "Bad Gateway"),
            ChannelError::Transport(_)
        ));
    }

    #[test]
    fn empty_token_is_not_configured() {
        assert!(matches!(
            TelegramChannel::new("  "),
            Err(ChannelError::NotConfigured(_))
        ));
    }

    #[test]
    fn api_url_includes_token_and_method() {
        let channel = TelegramChannel::with_api_base("123:abc", "http://localhost:8081/").unwrap();
        assert_eq!(
            channel.api_url("sendMessage"),
            "http://localhost:8081/bot123:abc/sendMessage"
        );
    }
}
