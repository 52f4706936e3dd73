//! Delivery transports.

mod lazy;
mod log;
mod smtp;

pub use lazy::{InitState, LazyTransport, TransportFactory};
pub use self::log::LogTransport;
pub use smtp::SmtpTransport;

use crate::job::{EmailJob, Recipients};
use async_trait::async_trait;
use relay_config::{TransportConfig, TransportKind};
use relay_core::RelayError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Shared transport handle.
pub type SharedTransport = Arc<dyn Transport>;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport cannot work as configured. Never retried.
    #[error("Transport misconfigured: {0}")]
    Configuration(String),

    /// The message itself cannot be built, such as an unparseable
    /// recipient. Never retried.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The remote end refused the message.
    #[error("Message rejected: {0}")]
    Rejected(String),

    /// Connection or protocol failure.
    #[error("Transport I/O error: {0}")]
    Io(String),

    /// The attempt ran past its deadline.
    #[error("Send timed out: {0}")]
    Timeout(String),
}

impl TransportError {
    /// Returns true if retrying can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            TransportError::Configuration(_) | TransportError::Malformed(_)
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Configuration(_) => "configuration",
            TransportError::Malformed(_) => "malformed",
            TransportError::Rejected(_) => "rejected",
            TransportError::Io(_) => "io",
            TransportError::Timeout(_) => "timeout",
        }
    }

    /// Converts into the unified error, naming the transport.
    pub fn into_relay_error(self, transport: &str) -> RelayError {
        match self {
            TransportError::Configuration(message) => RelayError::Configuration(message),
            TransportError::Malformed(message) => RelayError::Validation(message),
            TransportError::Timeout(message) => RelayError::Timeout(message),
            other => RelayError::TransportFailure {
                transport: transport.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<TransportError> for RelayError {
    fn from(err: TransportError) -> Self {
        err.into_relay_error("unknown")
    }
}

/// A fully rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub recipients: Recipients,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

impl OutgoingMessage {
    /// Builds the message for a job whose content is rendered.
    pub fn from_job(job: &EmailJob) -> Self {
        Self {
            recipients: job.recipients.clone(),
            subject: job.subject.clone(),
            html_body: job.html_body.clone(),
            text_body: job.text_or_derived(),
        }
    }
}

/// Proof of a handed-off message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Transport that accepted the message.
    pub transport: String,

    /// Identifier assigned by the remote end, when it reports one.
    pub message_id: Option<String>,
}

impl DeliveryReceipt {
    /// Creates a receipt.
    pub fn new(transport: impl Into<String>, message_id: Option<String>) -> Self {
        Self {
            transport: transport.into(),
            message_id,
        }
    }
}

/// Something that can attempt delivery of one message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attempts delivery.
    async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, TransportError>;

    /// Transport name for logs and receipts.
    fn name(&self) -> &'static str;
}

/// Builds the configured transport.
///
/// SMTP is wrapped in a [`LazyTransport`] so that a bad configuration
/// surfaces on first send instead of at startup.
pub fn build_transport(config: &TransportConfig) -> SharedTransport {
    match config.kind {
        TransportKind::Log => Arc::new(LogTransport::new()),
        TransportKind::Smtp => {
            let config = config.clone();
            Arc::new(LazyTransport::new(
                "smtp",
                Box::new(move || {
                    SmtpTransport::from_config(&config)
                        .map(|transport| Arc::new(transport) as SharedTransport)
                }),
            ))
        }
    }
}
