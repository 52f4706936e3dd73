//! Mail service trait definition.

use crate::dto::{
    BulkEmailRequest, BulkSubmission, MailStats, SendEmailRequest, SendOutcome,
    TemplatedEmailRequest,
};
use async_trait::async_trait;
use relay_core::{BatchId, JobId, RelayResult};
use relay_queue::EmailJob;

/// Inbound interface for everything that wants email sent.
#[async_trait]
pub trait MailService: Send + Sync {
    /// Queues a message with caller-supplied content.
    async fn submit(&self, request: SendEmailRequest) -> RelayResult<JobId>;

    /// Renders a template now and queues the result.
    ///
    /// Unknown templates and missing variables are returned to the caller.
    async fn submit_templated(&self, request: TemplatedEmailRequest) -> RelayResult<JobId>;

    /// Queues one job per recipient under a new batch. Rendering happens
    /// when each job is processed.
    async fn submit_bulk(&self, request: BulkEmailRequest) -> RelayResult<BulkSubmission>;

    /// Sends right away when the rate limit allows, otherwise queues.
    async fn send_immediate(&self, request: SendEmailRequest) -> RelayResult<SendOutcome>;

    /// Gets a job by ID.
    async fn job(&self, id: JobId) -> RelayResult<EmailJob>;

    /// Lists the jobs of a bulk submission in submission order.
    async fn jobs_in_batch(&self, batch_id: BatchId) -> RelayResult<Vec<EmailJob>>;

    /// Cancels a pending job. Returns false if it was already claimed or
    /// finished.
    async fn cancel(&self, id: JobId) -> RelayResult<bool>;

    /// Returns failed jobs with attempts left to the queue.
    async fn requeue_failed(&self) -> RelayResult<usize>;

    /// Current queue and rate limiter state.
    async fn stats(&self) -> RelayResult<MailStats>;

    /// Removes every job.
    async fn clear(&self) -> RelayResult<usize>;
}
