//! Queue store abstraction and backends.

mod memory;
mod sqlite;

pub use memory::InMemoryQueueStore;
pub use sqlite::SqliteQueueStore;

use crate::error::StoreResult;
use crate::job::{EmailJob, JobStatus, NewEmailJob};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use relay_config::RetentionConfig;
use relay_core::{BatchId, JobId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Shared queue store handle.
pub type SharedQueueStore = Arc<dyn QueueStore>;

/// Storage for email jobs.
///
/// Every backend must claim atomically: a job returned by
/// [`dequeue_batch`](QueueStore::dequeue_batch) is `processing` before any
/// other caller can observe it as `pending`.
#[async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// Inserts a job as `pending` and returns its new id.
    async fn enqueue(&self, job: NewEmailJob) -> StoreResult<JobId>;

    /// Inserts every job or none, returning ids in input order.
    ///
    /// The default inserts one at a time and cancels what it already
    /// inserted when a later insert fails.
    async fn enqueue_many(&self, jobs: Vec<NewEmailJob>) -> StoreResult<Vec<JobId>> {
        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            match self.enqueue(job).await {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in &ids {
                        match self.cancel(*id).await {
                            Ok(true) => {}
                            Ok(false) => warn!(job_id = %id, "Job claimed before rollback"),
                            Err(cancel_err) => {
                                warn!(job_id = %id, error = %cancel_err, "Rollback cancel failed");
                            }
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(ids)
    }

    /// Claims up to `limit` eligible jobs, ordered by priority descending,
    /// then `created_at`, then insertion sequence, and marks them
    /// `processing`.
    async fn dequeue_batch(&self, limit: usize, now: DateTime<Utc>) -> StoreResult<Vec<EmailJob>>;

    /// Sets a job's status and error message.
    async fn mark_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> StoreResult<()>;

    /// Returns a claimed job to `pending` for another attempt.
    async fn reschedule(
        &self,
        id: JobId,
        retry_count: u32,
        scheduled_for: DateTime<Utc>,
        error_message: String,
    ) -> StoreResult<()>;

    /// Fails a claimed job for good, recording its final retry count.
    async fn mark_failed(
        &self,
        id: JobId,
        retry_count: u32,
        error_message: String,
    ) -> StoreResult<()>;

    /// Returns a claimed job to `pending` without touching its retry state.
    async fn release(&self, id: JobId) -> StoreResult<()>;

    /// Cancels a pending job. Returns false if the job is missing or not
    /// pending.
    async fn cancel(&self, id: JobId) -> StoreResult<bool>;

    /// Resets every failed job that still has attempts left.
    async fn requeue_failed(&self) -> StoreResult<usize>;

    /// Fetches one job.
    async fn get(&self, id: JobId) -> StoreResult<Option<EmailJob>>;

    /// Lists jobs in insertion order.
    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<EmailJob>>;

    /// Counts jobs by status.
    async fn stats(&self) -> StoreResult<QueueStats>;

    /// Deletes terminal jobs past their retention.
    async fn prune(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> StoreResult<usize>;

    /// Returns jobs left `processing` by a previous run to `pending`.
    async fn recover_in_flight(&self) -> StoreResult<usize>;

    /// Deletes every job.
    async fn clear(&self) -> StoreResult<usize>;
}

/// Selection for [`QueueStore::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub batch_id: Option<BatchId>,
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Jobs of one bulk submission.
    pub fn batch(batch_id: BatchId) -> Self {
        Self {
            batch_id: Some(batch_id),
            ..Default::default()
        }
    }

    /// Jobs in one status.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Caps the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `job` passes the status and batch filters.
    pub fn matches(&self, job: &EmailJob) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.batch_id.map_or(true, |b| job.batch_id == Some(b))
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Pending jobs that have never failed.
    pub pending_fresh: u64,

    /// Pending jobs waiting on a retry.
    pub pending_retrying: u64,

    /// Jobs claimed by a tick.
    pub processing: u64,

    /// Delivered jobs still retained.
    pub sent: u64,

    /// Failed jobs still retained.
    pub failed: u64,

    /// Cancelled jobs still retained.
    pub cancelled: u64,

    /// All jobs in the store.
    pub total: u64,
}

impl QueueStats {
    /// All pending jobs.
    pub fn pending(&self) -> u64 {
        self.pending_fresh + self.pending_retrying
    }

    pub(crate) fn count(&mut self, job: &EmailJob) {
        match job.status {
            JobStatus::Pending if job.is_retrying() => self.pending_retrying += 1,
            JobStatus::Pending => self.pending_fresh += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Sent => self.sent += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
        self.total += 1;
    }
}

/// How long terminal jobs are kept.
///
/// Failed jobs with attempts left can still be requeued and are never
/// pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub sent: Duration,
    pub cancelled: Duration,
    pub failed: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&RetentionConfig::default())
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            sent: seconds(config.sent_retention_secs),
            cancelled: seconds(config.cancelled_retention_secs),
            failed: seconds(config.failed_retention_secs),
        }
    }
}

impl RetentionPolicy {
    /// Keeps terminal jobs for `retention`, whatever their status.
    pub fn uniform(retention: Duration) -> Self {
        Self {
            sent: retention,
            cancelled: retention,
            failed: retention,
        }
    }

    /// Returns true if `job` may be deleted at `now`.
    pub fn is_expired(&self, job: &EmailJob, now: DateTime<Utc>) -> bool {
        let retention = match job.status {
            JobStatus::Sent => self.sent,
            JobStatus::Cancelled => self.cancelled,
            JobStatus::Failed if job.is_exhausted() => self.failed,
            _ => return false,
        };
        job.updated_at
            .checked_add_signed(retention)
            .map_or(false, |expires| expires <= now)
    }
}

fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Recipients;

    fn job(status: JobStatus, updated_at: DateTime<Utc>) -> EmailJob {
        let mut job = NewEmailJob::message(Recipients::to("a@example.com"), "s", "<p>b</p>")
            .into_job(JobId::new(), 1, updated_at);
        job.status = status;
        job
    }

    #[test]
    fn test_retention_by_status() {
        let now = Utc::now();
        let policy = RetentionPolicy {
            sent: Duration::hours(1),
            cancelled: Duration::hours(2),
            failed: Duration::hours(3),
        };
        let old = now - Duration::minutes(90);

        assert!(policy.is_expired(&job(JobStatus::Sent, old), now));
        assert!(!policy.is_expired(&job(JobStatus::Cancelled, old), now));
        assert!(!policy.is_expired(&job(JobStatus::Pending, now - Duration::days(30)), now));
    }

    #[test]
    fn test_requeueable_failures_are_kept() {
        let now = Utc::now();
        let policy = RetentionPolicy::uniform(Duration::seconds(1));
        let mut failed = job(JobStatus::Failed, now - Duration::hours(1));
        failed.retry_count = 1;
        assert!(!policy.is_expired(&failed, now));

        failed.retry_count = failed.max_retries;
        assert!(policy.is_expired(&failed, now));
    }

    #[test]
    fn test_filter_matches() {
        let batch = BatchId::new();
        let mut in_batch = job(JobStatus::Pending, Utc::now());
        in_batch.batch_id = Some(batch);
        let other = job(JobStatus::Sent, Utc::now());

        assert!(JobFilter::batch(batch).matches(&in_batch));
        assert!(!JobFilter::batch(batch).matches(&other));
        assert!(JobFilter::status(JobStatus::Sent).matches(&other));
        assert!(JobFilter::default().matches(&other));
    }

    #[test]
    fn test_stats_split_pending() {
        let mut stats = QueueStats::default();
        let fresh = job(JobStatus::Pending, Utc::now());
        let mut retrying = fresh.clone();
        retrying.retry_count = 2;
        stats.count(&fresh);
        stats.count(&retrying);
        stats.count(&job(JobStatus::Sent, Utc::now()));

        assert_eq!(stats.pending_fresh, 1);
        assert_eq!(stats.pending_retrying, 1);
        assert_eq!(stats.pending(), 2);
        assert_eq!(stats.total, 3);
    }
}
