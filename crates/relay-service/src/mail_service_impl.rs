//! Mail service implementation.

use crate::dto::{
    BulkEmailRequest, BulkSubmission, MailStats, SendEmailRequest, SendOutcome,
    TemplatedEmailRequest,
};
use crate::mail_service::MailService;
use async_trait::async_trait;
use relay_config::QueueConfig;
use relay_core::{BatchId, JobId, RelayError, RelayResult, SharedClock, ValidateExt};
use relay_queue::metrics::QueueMetrics;
use relay_queue::{
    EmailJob, JobFilter, NewEmailJob, OutgoingMessage, Recipients, SharedQueueStore,
    SharedTransport, TemplateRef, TransportError, DEFAULT_MAX_RETRIES,
};
use relay_resilience::{timeout_or, RateLimiter};
use relay_templates::{html_to_text, RenderOptions, TemplateKind, TemplateRenderer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Mail service backed by a queue store.
pub struct MailServiceImpl {
    store: SharedQueueStore,
    transport: SharedTransport,
    renderer: Arc<TemplateRenderer>,
    limiter: RateLimiter,
    clock: SharedClock,
    send_timeout: Duration,
    max_retries: u32,
}

impl std::fmt::Debug for MailServiceImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailServiceImpl")
            .field("store", &self.store)
            .field("transport", &self.transport.name())
            .field("send_timeout", &self.send_timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl MailServiceImpl {
    /// Creates a new mail service.
    ///
    /// `limiter` must be the same limiter the queue processor uses so that
    /// immediate and queued sends share one budget.
    pub fn new(
        store: SharedQueueStore,
        transport: SharedTransport,
        renderer: Arc<TemplateRenderer>,
        limiter: RateLimiter,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            transport,
            renderer,
            limiter,
            clock,
            send_timeout: Duration::from_secs(30),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Takes the retry budget and send timeout from queue configuration.
    #[must_use]
    pub fn with_queue_config(mut self, config: &QueueConfig) -> Self {
        self.send_timeout = config.send_timeout();
        self.max_retries = config.max_retries;
        self
    }

    fn message_job(&self, request: SendEmailRequest) -> NewEmailJob {
        let recipients = Recipients::many(request.to)
            .with_cc(request.cc)
            .with_bcc(request.bcc);
        let mut job = NewEmailJob::message(recipients, request.subject, request.html)
            .with_text(request.text)
            .priority(request.priority.unwrap_or_default())
            .max_retries(self.max_retries);
        if let Some(at) = request.scheduled_for {
            job = job.scheduled_for(at);
        }
        job
    }

    async fn enqueue(&self, job: NewEmailJob, kind: &str) -> RelayResult<JobId> {
        let priority = job.priority;
        let id = self.store.enqueue(job).await?;
        QueueMetrics::job_enqueued(priority.as_str(), kind);
        Ok(id)
    }

    fn is_due(&self, job: &NewEmailJob) -> bool {
        job.scheduled_for.map_or(true, |at| at <= self.clock.now())
    }
}

#[async_trait]
impl MailService for MailServiceImpl {
    async fn submit(&self, request: SendEmailRequest) -> RelayResult<JobId> {
        debug!("Submitting email to {} recipient(s)", request.to.len());

        request.validate_request()?;

        let job = self.message_job(request);
        let id = self.enqueue(job, "message").await?;

        info!(job_id = %id, "Email queued");
        Ok(id)
    }

    async fn submit_templated(&self, request: TemplatedEmailRequest) -> RelayResult<JobId> {
        debug!("Submitting templated email: {}", request.template_id);

        request.validate_request()?;

        let kind: TemplateKind = request.template_id.parse()?;
        let options = RenderOptions {
            theme: request.theme.clone(),
        };
        let rendered = self
            .renderer
            .render(kind, &request.template_data, &options)?;

        let mut job = NewEmailJob::message(
            Recipients::many(request.to),
            rendered.subject,
            rendered.html,
        )
        .with_text(Some(rendered.text))
        .priority(request.priority.unwrap_or_default())
        .max_retries(self.max_retries);
        job.template = Some(TemplateRef::new(kind, request.template_data).with_theme(request.theme));

        let id = self.enqueue(job, kind.as_str()).await?;

        info!(job_id = %id, template = %kind, "Templated email queued");
        Ok(id)
    }

    async fn submit_bulk(&self, request: BulkEmailRequest) -> RelayResult<BulkSubmission> {
        debug!(
            "Submitting bulk email: {} to {} recipient(s)",
            request.template_id,
            request.recipients.len()
        );

        request.validate_request()?;

        let kind: TemplateKind = request.template_id.parse()?;
        let priority = request.priority.unwrap_or_default();
        let batch_id = BatchId::new();

        let jobs: Vec<NewEmailJob> = request
            .recipients
            .iter()
            .map(|recipient| {
                let template = TemplateRef::new(kind, request.data_for(recipient))
                    .with_theme(request.theme.clone());
                NewEmailJob::deferred(Recipients::to(recipient.to.clone()), template)
                    .priority(priority)
                    .max_retries(self.max_retries)
                    .in_batch(batch_id)
            })
            .collect();

        let job_ids = self.store.enqueue_many(jobs).await.map_err(|e| {
            warn!(batch_id = %batch_id, error = %e, "Bulk submission rejected, nothing queued");
            RelayError::from(e)
        })?;
        for _ in &job_ids {
            QueueMetrics::job_enqueued(priority.as_str(), kind.as_str());
        }

        info!(batch_id = %batch_id, jobs = job_ids.len(), template = %kind, "Bulk email queued");
        Ok(BulkSubmission { batch_id, job_ids })
    }

    async fn send_immediate(&self, request: SendEmailRequest) -> RelayResult<SendOutcome> {
        request.validate_request()?;

        let job = self.message_job(request);
        if !self.is_due(&job) {
            let job_id = self.enqueue(job, "message").await?;
            return Ok(SendOutcome::Queued { job_id });
        }

        let Some(permit) = self.limiter.try_reserve() else {
            let job_id = self.enqueue(job, "message").await?;
            debug!(job_id = %job_id, "Send rate limit reached, email queued instead");
            return Ok(SendOutcome::Queued { job_id });
        };

        let message = OutgoingMessage {
            recipients: job.recipients.clone(),
            subject: job.subject.clone(),
            html_body: job.html_body.clone(),
            text_body: job
                .text_body
                .clone()
                .unwrap_or_else(|| html_to_text(&job.html_body)),
        };

        let transport = self.transport.name();
        let started = Instant::now();
        let result = timeout_or(self.send_timeout, self.transport.send(&message), |d| {
            TransportError::Timeout(format!("no response within {}ms", d.as_millis()))
        })
        .await;

        match result {
            Ok(receipt) => {
                permit.commit();
                QueueMetrics::job_sent(transport, started.elapsed(), started.elapsed());
                info!(transport, "Email sent immediately");
                Ok(SendOutcome::Sent { receipt })
            }
            Err(e) if e.is_permanent() => {
                drop(permit);
                Err(e.into_relay_error(transport))
            }
            Err(e) => {
                drop(permit);
                let job_id = self.enqueue(job, "message").await?;
                warn!(job_id = %job_id, transport, error = %e, "Immediate send failed, email queued for retry");
                Ok(SendOutcome::Queued { job_id })
            }
        }
    }

    async fn job(&self, id: JobId) -> RelayResult<EmailJob> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| RelayError::not_found("EmailJob", id))
    }

    async fn jobs_in_batch(&self, batch_id: BatchId) -> RelayResult<Vec<EmailJob>> {
        Ok(self.store.list(&JobFilter::batch(batch_id)).await?)
    }

    async fn cancel(&self, id: JobId) -> RelayResult<bool> {
        if self.store.cancel(id).await? {
            QueueMetrics::job_cancelled();
            info!(job_id = %id, "Email job cancelled");
            return Ok(true);
        }
        match self.store.get(id).await? {
            Some(job) => {
                debug!(job_id = %id, status = %job.status, "Email job not cancellable");
                Ok(false)
            }
            None => Err(RelayError::not_found("EmailJob", id)),
        }
    }

    async fn requeue_failed(&self) -> RelayResult<usize> {
        let count = self.store.requeue_failed().await?;
        if count > 0 {
            info!(count, "Failed email jobs requeued");
        }
        Ok(count)
    }

    async fn stats(&self) -> RelayResult<MailStats> {
        Ok(MailStats {
            queue: self.store.stats().await?,
            rate_limit: self.limiter.snapshot(),
        })
    }

    async fn clear(&self) -> RelayResult<usize> {
        let count = self.store.clear().await?;
        warn!(count, "Email queue cleared");
        Ok(count)
    }
}
