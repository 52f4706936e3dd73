//! Transport that writes messages to the log.

use super::{DeliveryReceipt, OutgoingMessage, Transport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use uuid::Uuid;

/// Logs every message instead of delivering it. For development.
#[derive(Debug, Default)]
pub struct LogTransport {
    sent: AtomicU64,
}

impl LogTransport {
    /// Creates a log transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages logged so far.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, TransportError> {
        let message_id = format!("log-{}", Uuid::now_v7());
        info!(
            message_id = %message_id,
            to = %message.recipients.to.join(", "),
            cc = message.recipients.cc.len(),
            bcc = message.recipients.bcc.len(),
            subject = %message.subject,
            html_bytes = message.html_body.len(),
            "Email delivered to log transport"
        );
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(DeliveryReceipt::new(self.name(), Some(message_id)))
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Recipients;

    #[tokio::test]
    async fn test_log_transport_accepts_everything() {
        let transport = LogTransport::new();
        let message = OutgoingMessage {
            recipients: Recipients::to("ada@example.com"),
            subject: "Hello".into(),
            html_body: "<p>Hello</p>".into(),
            text_body: "Hello".into(),
        };

        let receipt = transport.send(&message).await.unwrap();
        assert_eq!(receipt.transport, "log");
        assert!(receipt.message_id.unwrap().starts_with("log-"));
        assert_eq!(transport.sent_count(), 1);
    }
}
