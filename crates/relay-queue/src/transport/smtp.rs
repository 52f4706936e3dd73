//! SMTP transport using lettre.

use super::{DeliveryReceipt, OutgoingMessage, Transport, TransportError};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use relay_config::TransportConfig;
use tracing::debug;

/// Delivers through an SMTP relay, upgrading with STARTTLS when configured.
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl std::fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpTransport {
    /// Creates a transport from configuration.
    ///
    /// Fails with [`TransportError::Configuration`] when the SMTP section is
    /// missing or the sender address does not parse.
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let smtp = config.smtp.as_ref().ok_or_else(|| {
            TransportError::Configuration("SMTP transport selected without [transport.smtp]".into())
        })?;

        let mut builder = if smtp.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
                .map_err(|e| TransportError::Configuration(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
        };
        builder = builder.port(smtp.port);

        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: sender(config)?,
        })
    }

    fn build_message(&self, message: &OutgoingMessage) -> Result<Message, TransportError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(&message.subject);

        for address in &message.recipients.to {
            builder = builder.to(mailbox(address)?);
        }
        for address in &message.recipients.cc {
            builder = builder.cc(mailbox(address)?);
        }
        for address in &message.recipients.bcc {
            builder = builder.bcc(mailbox(address)?);
        }

        builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(message.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(message.html_body.clone()),
                    ),
            )
            .map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

fn sender(config: &TransportConfig) -> Result<Mailbox, TransportError> {
    let address = match &config.from_name {
        Some(name) => format!("{} <{}>", name, config.from_address),
        None => config.from_address.clone(),
    };
    address
        .parse()
        .map_err(|e| TransportError::Configuration(format!("Invalid from address: {}", e)))
}

fn mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .parse()
        .map_err(|e| TransportError::Malformed(format!("Invalid recipient {}: {}", address, e)))
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, TransportError> {
        let email = self.build_message(message)?;

        match self.transport.send(email).await {
            Ok(response) => {
                let message_id = response.message().next().map(ToString::to_string);
                debug!(code = %response.code(), "SMTP relay accepted message");
                Ok(DeliveryReceipt::new(self.name(), message_id))
            }
            Err(e) if e.is_timeout() => Err(TransportError::Timeout(e.to_string())),
            Err(e) if e.is_permanent() => Err(TransportError::Rejected(e.to_string())),
            Err(e) => Err(TransportError::Io(e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Recipients;
    use relay_config::SmtpConfig;

    fn smtp_config() -> TransportConfig {
        TransportConfig {
            from_address: "relay@example.com".into(),
            from_name: Some("Relay".into()),
            smtp: Some(SmtpConfig {
                host: "localhost".into(),
                port: 1025,
                username: None,
                password: None,
                starttls: false,
            }),
            ..TransportConfig::default()
        }
    }

    #[test]
    fn test_requires_smtp_section() {
        let err = SmtpTransport::from_config(&TransportConfig::default()).unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn test_rejects_bad_sender() {
        let config = TransportConfig {
            from_address: "not an address".into(),
            from_name: None,
            ..smtp_config()
        };
        assert!(matches!(
            SmtpTransport::from_config(&config),
            Err(TransportError::Configuration(_))
        ));
    }

    #[test]
    fn test_builds_multipart_message() {
        let transport = SmtpTransport::from_config(&smtp_config()).unwrap();
        let message = OutgoingMessage {
            recipients: Recipients::to("ada@example.com").with_cc(vec!["bob@example.com".into()]),
            subject: "Hello".into(),
            html_body: "<p>Hello</p>".into(),
            text_body: "Hello".into(),
        };

        let email = transport.build_message(&message).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Subject: Hello"));
        assert!(raw.contains("multipart/alternative"));
        assert_eq!(email.envelope().to().len(), 2);
    }

    #[test]
    fn test_bad_recipient_is_permanent() {
        let transport = SmtpTransport::from_config(&smtp_config()).unwrap();
        let message = OutgoingMessage {
            recipients: Recipients::to("nope"),
            subject: "Hello".into(),
            html_body: String::new(),
            text_body: String::new(),
        };
        let err = transport.build_message(&message).unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
        assert!(err.is_permanent());
    }
}
