//! Queue processor.
//!
//! Each tick claims up to `batch_size` eligible jobs, delivers them with
//! bounded concurrency and records every outcome back in the store. Ticks
//! never overlap: a tick that fires while the previous one is still
//! running is skipped.

use crate::job::{EmailJob, JobStatus};
use crate::metrics::QueueMetrics;
use crate::retry::RetryPolicy;
use crate::store::{RetentionPolicy, SharedQueueStore};
use crate::transport::{OutgoingMessage, SharedTransport, TransportError};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use relay_config::{QueueConfig, RetentionConfig};
use relay_core::{JobId, RelayError, RelayResult, SharedClock};
use relay_resilience::{timeout_or, RateLimiter};
use relay_templates::{RenderOptions, TemplateRenderer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Maximum jobs claimed per tick.
    pub batch_size: usize,

    /// Time between ticks.
    pub tick_interval: Duration,

    /// Maximum sends in flight within a tick.
    pub concurrency: usize,

    /// Deadline for a single send.
    pub send_timeout: Duration,

    /// Backoff between attempts.
    pub retry: RetryPolicy,

    /// How long terminal jobs are kept.
    pub retention: RetentionPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default(), &RetentionConfig::default())
    }
}

impl ProcessorConfig {
    /// Builds the processor settings from configuration sections.
    pub fn from_config(queue: &QueueConfig, retention: &RetentionConfig) -> Self {
        Self {
            batch_size: queue.batch_size.max(1),
            tick_interval: queue.tick_interval(),
            concurrency: queue.effective_concurrency(),
            send_timeout: queue.send_timeout(),
            retry: RetryPolicy::from(queue),
            retention: RetentionPolicy::from(retention),
        }
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the per-tick send concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the retention policy.
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The tick did not run because another was in progress.
    pub skipped: bool,
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    pub deferred: usize,
    /// Jobs whose outcome could not be recorded.
    pub errored: usize,
    pub pruned: usize,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Sent => self.sent += 1,
            Outcome::Retried => self.retried += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Deferred => self.deferred += 1,
            Outcome::Errored => self.errored += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Sent,
    Retried,
    Failed,
    Deferred,
    Errored,
}

/// Clears the in-progress flag when a tick ends, however it ends.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    store: SharedQueueStore,
    transport: SharedTransport,
    renderer: Arc<TemplateRenderer>,
    limiter: RateLimiter,
    clock: SharedClock,
    config: ProcessorConfig,
    ticking: AtomicBool,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Drains the email queue on a fixed interval.
#[derive(Clone)]
pub struct QueueProcessor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for QueueProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProcessor")
            .field("transport", &self.inner.transport.name())
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl QueueProcessor {
    /// Creates a stopped processor.
    pub fn new(
        store: SharedQueueStore,
        transport: SharedTransport,
        renderer: Arc<TemplateRenderer>,
        limiter: RateLimiter,
        clock: SharedClock,
        config: ProcessorConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                renderer,
                limiter,
                clock,
                config,
                ticking: AtomicBool::new(false),
                running: AtomicBool::new(false),
                shutdown_tx,
                handle: Mutex::new(None),
            }),
        }
    }

    /// Processor configuration.
    pub fn config(&self) -> &ProcessorConfig {
        &self.inner.config
    }

    /// Returns true between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Spawns the tick loop on the current runtime.
    pub fn start(&self) -> RelayResult<()> {
        let mut handle = self.inner.handle.lock();
        if handle.is_some() {
            return Err(RelayError::InvalidState {
                expected: "stopped".to_string(),
                actual: "running".to_string(),
            });
        }

        info!(
            batch_size = self.inner.config.batch_size,
            interval_ms = self.inner.config.tick_interval.as_millis() as u64,
            concurrency = self.inner.config.concurrency,
            transport = self.inner.transport.name(),
            "Starting queue processor"
        );

        self.inner.running.store(true, Ordering::SeqCst);
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let processor = self.clone();
        *handle = Some(tokio::spawn(async move {
            processor.run(shutdown_rx).await;
        }));
        Ok(())
    }

    /// Stops the tick loop.
    ///
    /// A tick already in progress runs to completion; once this returns no
    /// further tick starts.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let _ = self.inner.shutdown_tx.send(());

        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle {
            info!("Stopping queue processor...");
            if let Err(e) = handle.await {
                error!(error = %e, "Queue processor task ended abnormally");
            }
            info!("Queue processor stopped");
        }
    }

    async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.inner.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    debug!("Queue processor received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    if !self.is_running() {
                        break;
                    }
                    self.tick().await;
                }
            }
        }
    }

    /// Runs one processing pass.
    pub async fn tick(&self) -> TickReport {
        let Some(_guard) = TickGuard::acquire(&self.inner.ticking) else {
            debug!("Previous tick still running, skipping");
            QueueMetrics::tick_skipped();
            return TickReport::skipped();
        };

        let started = Instant::now();
        let now = self.inner.clock.now();
        let jobs = match self
            .inner
            .store
            .dequeue_batch(self.inner.config.batch_size, now)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to claim email jobs");
                return TickReport::default();
            }
        };

        let mut report = TickReport {
            claimed: jobs.len(),
            ..TickReport::default()
        };
        if !jobs.is_empty() {
            QueueMetrics::jobs_claimed(jobs.len());
            debug!(count = jobs.len(), "Claimed email jobs");
        }

        let outcomes: Vec<Outcome> = stream::iter(jobs)
            .map(|job| self.process(job))
            .buffer_unordered(self.inner.config.concurrency.max(1))
            .collect()
            .await;
        for outcome in outcomes {
            report.record(outcome);
        }

        report.pruned = self.prune().await;
        self.refresh_gauges().await;
        QueueMetrics::tick_completed(started.elapsed());

        if report.claimed > 0 || report.pruned > 0 {
            info!(
                claimed = report.claimed,
                sent = report.sent,
                retried = report.retried,
                failed = report.failed,
                deferred = report.deferred,
                pruned = report.pruned,
                duration_ms = started.elapsed().as_millis() as u64,
                "Queue tick completed"
            );
        }
        report
    }

    async fn process(&self, mut job: EmailJob) -> Outcome {
        let id = job.id;

        if job.needs_render() {
            if let Err(message) = self.render(&mut job) {
                warn!(job_id = %id, error = %message, "Template rendering failed, not retrying");
                QueueMetrics::job_failed("render");
                return self.fail(id, job.retry_count, message).await;
            }
        }

        let Some(permit) = self.inner.limiter.try_reserve() else {
            QueueMetrics::job_deferred();
            return match self.inner.store.release(id).await {
                Ok(()) => {
                    debug!(job_id = %id, "Send rate limit reached, job deferred");
                    Outcome::Deferred
                }
                Err(e) => {
                    error!(job_id = %id, error = %e, "Failed to release deferred job");
                    Outcome::Errored
                }
            };
        };

        let transport = self.inner.transport.name();
        let message = OutgoingMessage::from_job(&job);
        let send_timeout = self.inner.config.send_timeout;
        let started = Instant::now();
        let result = timeout_or(send_timeout, self.inner.transport.send(&message), |d| {
            TransportError::Timeout(format!("no response within {}ms", d.as_millis()))
        })
        .await;

        match result {
            Ok(receipt) => {
                permit.commit();
                let latency = (self.inner.clock.now() - job.created_at)
                    .to_std()
                    .unwrap_or_default();
                QueueMetrics::job_sent(transport, started.elapsed(), latency);
                debug!(
                    job_id = %id,
                    transport,
                    message_id = receipt.message_id.as_deref().unwrap_or("-"),
                    "Email delivered"
                );
                match self.inner.store.mark_status(id, JobStatus::Sent, None).await {
                    Ok(()) => Outcome::Sent,
                    Err(e) => {
                        error!(job_id = %id, error = %e, "Failed to record delivered job");
                        Outcome::Errored
                    }
                }
            }
            Err(e) => {
                drop(permit);
                self.handle_failure(&job, e).await
            }
        }
    }

    fn render(&self, job: &mut EmailJob) -> Result<(), String> {
        let Some(template) = job.template.as_ref() else {
            return Ok(());
        };
        let options = RenderOptions {
            theme: template.theme.clone(),
        };
        let rendered = self
            .inner
            .renderer
            .render(template.kind, &template.data, &options)
            .map_err(|e| e.to_string())?;

        job.subject = rendered.subject;
        job.html_body = rendered.html;
        job.text_body = Some(rendered.text);
        Ok(())
    }

    async fn handle_failure(&self, job: &EmailJob, err: TransportError) -> Outcome {
        let id = job.id;
        let transport = self.inner.transport.name();

        if err.is_permanent() {
            error!(job_id = %id, transport, error = %err, "Permanent delivery error, failing job");
            QueueMetrics::job_failed(err.kind());
            return self.fail(id, job.retry_count, err.to_string()).await;
        }

        let retry_count = job.retry_count.saturating_add(1).min(job.max_retries);
        let retry = &self.inner.config.retry;
        if !retry.should_retry(retry_count, job.max_retries) {
            warn!(
                job_id = %id,
                transport,
                attempts = retry_count,
                error = %err,
                "Email job exhausted its retries"
            );
            QueueMetrics::job_failed(err.kind());
            return self.fail(id, retry_count, err.to_string()).await;
        }

        let delay = retry.delay_for_retry(retry_count);
        let next_attempt = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| self.inner.clock.now().checked_add_signed(d))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);

        warn!(
            job_id = %id,
            transport,
            attempt = retry_count,
            max_retries = job.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Send failed, retrying later"
        );
        QueueMetrics::job_retried(err.kind(), retry_count);

        match self
            .inner
            .store
            .reschedule(id, retry_count, next_attempt, err.to_string())
            .await
        {
            Ok(()) => Outcome::Retried,
            Err(e) => {
                error!(job_id = %id, error = %e, "Failed to reschedule email job");
                Outcome::Errored
            }
        }
    }

    async fn fail(&self, id: JobId, retry_count: u32, message: String) -> Outcome {
        match self.inner.store.mark_failed(id, retry_count, message).await {
            Ok(()) => Outcome::Failed,
            Err(e) => {
                error!(job_id = %id, error = %e, "Failed to record failed job");
                Outcome::Errored
            }
        }
    }

    async fn prune(&self) -> usize {
        let now = self.inner.clock.now();
        match self.inner.store.prune(&self.inner.config.retention, now).await {
            Ok(0) => 0,
            Ok(count) => {
                debug!(count, "Pruned expired email jobs");
                QueueMetrics::jobs_pruned(count);
                count
            }
            Err(e) => {
                warn!(error = %e, "Failed to prune email jobs");
                0
            }
        }
    }

    async fn refresh_gauges(&self) {
        match self.inner.store.stats().await {
            Ok(stats) => QueueMetrics::update_queue_stats(&stats),
            Err(e) => debug!(error = %e, "Failed to read queue stats"),
        }
        QueueMetrics::update_rate_limit(&self.inner.limiter.snapshot());
    }
}
