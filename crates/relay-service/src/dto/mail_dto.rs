//! Mail submission DTOs.

use chrono::{DateTime, Utc};
use relay_core::rules::{email_list, not_blank};
use relay_core::{BatchId, JobId};
use relay_queue::{DeliveryReceipt, Priority, QueueStats};
use relay_resilience::RateLimitSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidateEmail, ValidationError};

/// Ad-hoc message with caller-supplied content.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SendEmailRequest {
    #[validate(
        length(min = 1, message = "At least one recipient is required"),
        custom(function = "email_list", message = "Invalid email address")
    )]
    pub to: Vec<String>,

    #[serde(default)]
    #[validate(custom(function = "email_list", message = "Invalid email address"))]
    pub cc: Vec<String>,

    #[serde(default)]
    #[validate(custom(function = "email_list", message = "Invalid email address"))]
    pub bcc: Vec<String>,

    #[validate(custom(function = "not_blank", message = "Subject is required"))]
    pub subject: String,

    #[validate(custom(function = "not_blank", message = "HTML body is required"))]
    pub html: String,

    /// Plain-text body; derived from the HTML when absent.
    pub text: Option<String>,

    #[serde(default)]
    pub priority: Option<Priority>,

    /// Earliest delivery time.
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl SendEmailRequest {
    /// Creates a request for a single recipient.
    pub fn new(to: impl Into<String>, subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            to: vec![to.into()],
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.into(),
            html: html.into(),
            text: None,
            priority: None,
            scheduled_for: None,
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Message rendered from a named template at submission time.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TemplatedEmailRequest {
    #[validate(
        length(min = 1, message = "At least one recipient is required"),
        custom(function = "email_list", message = "Invalid email address")
    )]
    pub to: Vec<String>,

    #[validate(custom(function = "not_blank", message = "Template id is required"))]
    pub template_id: String,

    #[serde(default)]
    pub template_data: Value,

    #[serde(default)]
    pub theme: Option<String>,

    #[serde(default)]
    pub priority: Option<Priority>,
}

impl TemplatedEmailRequest {
    /// Creates a request for a single recipient.
    pub fn new(to: impl Into<String>, template_id: impl Into<String>, template_data: Value) -> Self {
        Self {
            to: vec![to.into()],
            template_id: template_id.into(),
            template_data,
            theme: None,
            priority: None,
        }
    }
}

/// One recipient of a bulk send with its own template data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRecipient {
    pub to: String,

    #[serde(default)]
    pub data: Value,
}

impl BulkRecipient {
    pub fn new(to: impl Into<String>, data: Value) -> Self {
        Self {
            to: to.into(),
            data,
        }
    }
}

fn bulk_recipients(recipients: &[BulkRecipient]) -> Result<(), ValidationError> {
    if recipients.is_empty() {
        return Err(ValidationError::new("length")
            .with_message("At least one recipient is required".into()));
    }
    if recipients.iter().all(|r| r.to.validate_email()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_email").with_message("Invalid email address".into()))
    }
}

/// Same template sent to many recipients, rendered when each job is
/// processed.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkEmailRequest {
    #[validate(custom(function = "bulk_recipients"))]
    pub recipients: Vec<BulkRecipient>,

    #[validate(custom(function = "not_blank", message = "Template id is required"))]
    pub template_id: String,

    /// Data common to every recipient; per-recipient keys win.
    #[serde(default)]
    pub shared_data: Value,

    #[serde(default)]
    pub theme: Option<String>,

    #[serde(default)]
    pub priority: Option<Priority>,
}

impl BulkEmailRequest {
    /// Template data for one recipient: `shared_data` overlaid with the
    /// recipient's own object.
    pub fn data_for(&self, recipient: &BulkRecipient) -> Value {
        let mut merged = match &self.shared_data {
            Value::Object(shared) => shared.clone(),
            _ => Map::new(),
        };
        if let Value::Object(own) = &recipient.data {
            merged.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Value::Object(merged)
    }
}

/// Result of a bulk submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSubmission {
    pub batch_id: BatchId,
    pub job_ids: Vec<JobId>,
}

/// Result of an immediate send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SendOutcome {
    /// Delivered without touching the queue.
    Sent { receipt: DeliveryReceipt },

    /// Handed to the queue instead.
    Queued { job_id: JobId },
}

/// Queue and rate limiter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailStats {
    pub queue: QueueStats,
    pub rate_limit: RateLimitSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ValidateExt;
    use serde_json::json;

    #[test]
    fn test_send_request_validation() {
        let valid = SendEmailRequest::new("ada@example.com", "Hello", "<p>Hi</p>");
        assert!(valid.validate_request().is_ok());

        let mut no_recipients = valid.clone();
        no_recipients.to.clear();
        assert!(no_recipients.validate_request().is_err());

        let mut bad_cc = valid.clone();
        bad_cc.cc = vec!["not-an-address".into()];
        let err = bad_cc.validate_request().unwrap_err();
        assert!(err.to_string().contains("cc"));

        let mut blank_subject = valid;
        blank_subject.subject = "   ".into();
        assert!(blank_subject.validate_request().is_err());
    }

    #[test]
    fn test_bulk_request_validation() {
        let mut request = BulkEmailRequest {
            recipients: vec![BulkRecipient::new("ada@example.com", json!({}))],
            template_id: "welcome".into(),
            shared_data: json!({}),
            theme: None,
            priority: None,
        };
        assert!(request.validate_request().is_ok());

        request.recipients.push(BulkRecipient::new("nope", json!({})));
        assert!(request.validate_request().is_err());

        request.recipients.clear();
        assert!(request.validate_request().is_err());
    }

    #[test]
    fn test_bulk_data_merges_recipient_over_shared() {
        let request = BulkEmailRequest {
            recipients: vec![],
            template_id: "announcement".into(),
            shared_data: json!({ "title": "Launch", "userName": "friend" }),
            theme: None,
            priority: None,
        };
        let recipient = BulkRecipient::new("ada@example.com", json!({ "userName": "Ada" }));

        let data = request.data_for(&recipient);
        assert_eq!(data["title"], "Launch");
        assert_eq!(data["userName"], "Ada");
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: SendEmailRequest = serde_json::from_value(json!({
            "to": ["ada@example.com"],
            "subject": "Hi",
            "html": "<p>Hi</p>",
            "priority": "high"
        }))
        .unwrap();
        assert!(request.cc.is_empty());
        assert_eq!(request.priority, Some(Priority::High));
    }
}
