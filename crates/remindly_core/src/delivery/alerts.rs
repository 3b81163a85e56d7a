//! Operational alerting.
//!
//! # Responsibility
//! - Deliver operator-facing alerts (delivery failures, invalidated records,
//!   startup notices) to a best-effort sink.
//!
//! # Invariants
//! - Raising an alert never blocks and never fails the caller.
//! - Sink failures are logged and dropped.

use super::channel::{ChannelError, NotificationChannel};
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;

const ALERT_PREFIX: &str = "[remindly]";

/// Destination for operator alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), ChannelError>;
}

/// Sends alerts to an operator through a messaging channel.
pub struct ChannelAlertSink {
    channel: Arc<dyn NotificationChannel>,
    recipient: String,
}

impl ChannelAlertSink {
    pub fn new(channel: Arc<dyn NotificationChannel>, recipient: impl Into<String>) -> Self {
        Self {
            channel,
            recipient: recipient.into(),
        }
    }
}

#[async_trait]
impl AlertSink for ChannelAlertSink {
    async fn notify(&self, message: &str) -> Result<(), ChannelError> {
        self.channel
            .send(&self.recipient, &format!("{ALERT_PREFIX} {message}"))
            .await
    }
}

/// Alert sink that only writes to the log. Used when no operator is set.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, message: &str) -> Result<(), ChannelError> {
        info!("event=alert module=alerts status=ok sink=log message={message}");
        Ok(())
    }
}

/// Fire-and-forget front for an `AlertSink`.
#[derive(Clone)]
pub struct Alerter {
    sink: Arc<dyn AlertSink>,
}

impl Alerter {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { sink }
    }

    /// Queues `message` on a detached task. Must be called inside a tokio
    /// runtime.
    pub fn raise(&self, message: impl Into<String>) {
        let sink = Arc::clone(&self.sink);
        let message = message.into();
        tokio::spawn(async move {
            if let Err(err) = sink.notify(&message).await {
                warn!("event=alert module=alerts status=error error={err}");
            }
        });
    }

    /// Sends `message` and waits for the sink. Failures are still swallowed.
    pub async fn raise_and_wait(&self, message: &str) {
        if let Err(err) = self.sink.notify(message).await {
            warn!("event=alert module=alerts status=error error={err}");
        }
    }
}
