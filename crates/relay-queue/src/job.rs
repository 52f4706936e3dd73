//! Email job model.

use chrono::{DateTime, Utc};
use relay_core::{BatchId, JobId};
use relay_templates::{html_to_text, TemplateKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

/// Default attempt ceiling for a job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Job priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i8)]
pub enum Priority {
    /// Digests, newsletters and other bulk mail.
    Low = -10,
    /// Normal priority (default).
    Normal = 0,
    /// Password resets and other time-sensitive mail.
    High = 10,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Priority {
    /// Wire name of the priority.
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl From<i8> for Priority {
    fn from(value: i8) -> Self {
        match value {
            v if v >= 10 => Priority::High,
            v if v <= -10 => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

impl From<Priority> for i8 {
    fn from(priority: Priority) -> Self {
        priority as i8
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a tick to claim it.
    Pending,
    /// Claimed by a tick; a delivery attempt is in flight.
    Processing,
    /// Delivered.
    Sent,
    /// Gave up.
    Failed,
    /// Cancelled before it was claimed.
    Cancelled,
}

impl JobStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Sent => "sent",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if this is a final state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Sent | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "sent" => Ok(JobStatus::Sent),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Addressees of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
}

impl Recipients {
    /// A single primary recipient.
    pub fn to(address: impl Into<String>) -> Self {
        Self {
            to: vec![address.into()],
            ..Default::default()
        }
    }

    /// Several primary recipients.
    pub fn many<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            to: addresses.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Sets the carbon-copy list.
    pub fn with_cc(mut self, cc: Vec<String>) -> Self {
        self.cc = cc;
        self
    }

    /// Sets the blind carbon-copy list.
    pub fn with_bcc(mut self, bcc: Vec<String>) -> Self {
        self.bcc = bcc;
        self
    }

    /// Every address across to, cc and bcc.
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
    }
}

/// A template whose rendering is deferred to the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub kind: TemplateKind,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
}

impl TemplateRef {
    /// Creates a reference with the default theme.
    pub fn new(kind: TemplateKind, data: Value) -> Self {
        Self {
            kind,
            data,
            theme: None,
        }
    }

    /// Selects a theme.
    pub fn with_theme(mut self, theme: Option<String>) -> Self {
        self.theme = theme;
        self
    }
}

/// A queued email send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailJob {
    pub id: JobId,
    pub recipients: Recipients,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub template: Option<TemplateRef>,
    pub priority: Priority,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub batch_id: Option<BatchId>,
    /// Insertion order; breaks ties between equal `created_at`.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailJob {
    /// Returns true if a tick may claim the job at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_for.map_or(true, |at| at <= now)
    }

    /// Returns true if the job has failed at least once.
    pub fn is_retrying(&self) -> bool {
        self.retry_count > 0
    }

    /// Returns true if the content still has to be rendered from `template`.
    pub fn needs_render(&self) -> bool {
        self.template.is_some() && self.html_body.is_empty()
    }

    /// Returns true if `requeue_failed` would reset the job.
    pub fn can_requeue(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < self.max_retries
    }

    /// Returns true if the job failed with no attempts left.
    pub fn is_exhausted(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count >= self.max_retries
    }

    /// Dequeue sort key: priority descending, then oldest first, then
    /// insertion order.
    pub fn dequeue_key(&self) -> (Reverse<Priority>, DateTime<Utc>, u64) {
        (Reverse(self.priority), self.created_at, self.sequence)
    }

    /// Plain-text body, derived from the HTML when none was supplied.
    pub fn text_or_derived(&self) -> String {
        self.text_body
            .clone()
            .unwrap_or_else(|| html_to_text(&self.html_body))
    }
}

/// A job to be enqueued. The store assigns id, status and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEmailJob {
    pub recipients: Recipients,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub template: Option<TemplateRef>,
    pub priority: Priority,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub max_retries: u32,
    pub batch_id: Option<BatchId>,
}

impl NewEmailJob {
    /// A job with content supplied up front.
    pub fn message(
        recipients: Recipients,
        subject: impl Into<String>,
        html_body: impl Into<String>,
    ) -> Self {
        Self {
            recipients,
            subject: subject.into(),
            html_body: html_body.into(),
            text_body: None,
            template: None,
            priority: Priority::Normal,
            scheduled_for: None,
            max_retries: DEFAULT_MAX_RETRIES,
            batch_id: None,
        }
    }

    /// A job rendered from `template` when it is processed.
    pub fn deferred(recipients: Recipients, template: TemplateRef) -> Self {
        Self {
            template: Some(template),
            ..Self::message(recipients, String::new(), String::new())
        }
    }

    /// Sets the plain-text body.
    pub fn with_text(mut self, text: Option<String>) -> Self {
        self.text_body = text;
        self
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Holds the job until `at`.
    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    /// Sets the attempt ceiling.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Tags the job as part of a bulk submission.
    pub fn in_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    /// Materializes the job as freshly enqueued.
    pub(crate) fn into_job(self, id: JobId, sequence: u64, now: DateTime<Utc>) -> EmailJob {
        let text_body = self.text_body.or_else(|| {
            (!self.html_body.is_empty()).then(|| html_to_text(&self.html_body))
        });

        EmailJob {
            id,
            recipients: self.recipients,
            subject: self.subject,
            html_body: self.html_body,
            text_body,
            template: self.template,
            priority: self.priority,
            scheduled_for: self.scheduled_for,
            retry_count: 0,
            max_retries: self.max_retries,
            status: JobStatus::Pending,
            error_message: None,
            batch_id: self.batch_id,
            sequence,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn job(priority: Priority) -> EmailJob {
        NewEmailJob::message(Recipients::to("ada@example.com"), "Hi", "<p>Hi</p>")
            .priority(priority)
            .into_job(JobId::new(), 1, Utc::now())
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!(Priority::from(i8::from(Priority::Low)), Priority::Low);
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_status_round_trip_and_terminal() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Sent,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!(JobStatus::Sent.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_into_job_derives_text_body() {
        let job = job(Priority::Normal);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.text_body.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_deferred_job_needs_render() {
        let job = NewEmailJob::deferred(
            Recipients::to("ada@example.com"),
            TemplateRef::new(TemplateKind::Welcome, json!({"userName": "Ada"})),
        )
        .into_job(JobId::new(), 1, Utc::now());
        assert!(job.needs_render());
        assert!(job.text_body.is_none());
    }

    #[test]
    fn test_eligibility_honors_schedule() {
        let now = Utc::now();
        let mut job = job(Priority::Normal);
        assert!(job.is_eligible(now));

        job.scheduled_for = Some(now + Duration::seconds(1));
        assert!(!job.is_eligible(now));
        assert!(job.is_eligible(now + Duration::seconds(1)));

        job.scheduled_for = None;
        job.status = JobStatus::Cancelled;
        assert!(!job.is_eligible(now));
    }

    #[test]
    fn test_dequeue_key_orders_priority_then_age() {
        let now = Utc::now();
        let mut low = job(Priority::Low);
        low.created_at = now;
        let mut high = job(Priority::High);
        high.created_at = now + Duration::seconds(1);
        let mut normal = job(Priority::Normal);
        normal.created_at = now + Duration::seconds(2);

        let mut jobs = vec![low.clone(), high.clone(), normal.clone()];
        jobs.sort_by_key(EmailJob::dequeue_key);
        let order: Vec<_> = jobs.iter().map(|j| j.priority).collect();
        assert_eq!(order, vec![Priority::High, Priority::Normal, Priority::Low]);
    }

    #[test]
    fn test_requeue_and_exhaustion() {
        let mut job = job(Priority::Normal);
        job.status = JobStatus::Failed;
        job.retry_count = 1;
        assert!(job.can_requeue());
        job.retry_count = job.max_retries;
        assert!(!job.can_requeue());
        assert!(job.is_exhausted());
    }

    #[test]
    fn test_recipients_all() {
        let recipients = Recipients::many(["a@example.com", "b@example.com"])
            .with_cc(vec!["c@example.com".into()])
            .with_bcc(vec!["d@example.com".into()]);
        assert_eq!(recipients.all().count(), 4);
    }
}
