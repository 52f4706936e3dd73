//! In-process queue store.

use super::{JobFilter, QueueStats, QueueStore, RetentionPolicy};
use crate::error::{StoreError, StoreResult};
use crate::job::{EmailJob, JobStatus, NewEmailJob, Priority};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use relay_core::{JobId, SharedClock};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

type PendingKey = (Reverse<Priority>, DateTime<Utc>, u64, JobId);

fn pending_key(job: &EmailJob) -> PendingKey {
    let (priority, created_at, sequence) = job.dequeue_key();
    (priority, created_at, sequence, job.id)
}

fn expect_status(job: &EmailJob, expected: JobStatus) -> StoreResult<()> {
    if job.status == expected {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            id: job.id,
            expected,
            actual: job.status,
        })
    }
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, EmailJob>,
    /// Pending jobs in dequeue order. Scheduled jobs stay here and are
    /// skipped until due.
    pending: BTreeSet<PendingKey>,
    next_sequence: u64,
}

impl Inner {
    /// Applies `change` to one job, keeping the pending index in step.
    fn update<F>(&mut self, id: JobId, change: F) -> StoreResult<()>
    where
        F: FnOnce(&mut EmailJob) -> StoreResult<()>,
    {
        let job = self.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let was_pending = job.status == JobStatus::Pending;
        change(job)?;

        match (was_pending, job.status == JobStatus::Pending) {
            (true, false) => {
                self.pending.remove(&pending_key(job));
            }
            (false, true) => {
                self.pending.insert(pending_key(job));
            }
            _ => {}
        }
        Ok(())
    }

    fn remove_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&EmailJob) -> bool,
    {
        let before = self.jobs.len();
        let pending = &mut self.pending;
        self.jobs.retain(|_, job| {
            if predicate(job) {
                pending.remove(&pending_key(job));
                false
            } else {
                true
            }
        });
        before - self.jobs.len()
    }
}

/// Queue store held in process memory.
///
/// Jobs are lost when the process exits.
#[derive(Debug)]
pub struct InMemoryQueueStore {
    inner: RwLock<Inner>,
    clock: SharedClock,
}

impl InMemoryQueueStore {
    /// Creates an empty store.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.inner.read().jobs.len()
    }

    /// Returns true if the store holds no jobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, job: NewEmailJob) -> StoreResult<JobId> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        inner.next_sequence += 1;
        let job = job.into_job(JobId::new(), inner.next_sequence, now);
        let id = job.id;

        inner.pending.insert(pending_key(&job));
        inner.jobs.insert(id, job);

        debug!(job_id = %id, "Enqueued email job");
        Ok(id)
    }

    async fn enqueue_many(&self, jobs: Vec<NewEmailJob>) -> StoreResult<Vec<JobId>> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            inner.next_sequence += 1;
            let job = job.into_job(JobId::new(), inner.next_sequence, now);
            ids.push(job.id);
            inner.pending.insert(pending_key(&job));
            inner.jobs.insert(job.id, job);
        }

        debug!(count = ids.len(), "Enqueued email jobs");
        Ok(ids)
    }

    async fn dequeue_batch(&self, limit: usize, now: DateTime<Utc>) -> StoreResult<Vec<EmailJob>> {
        let mut inner = self.inner.write();

        let claimed: Vec<JobId> = inner
            .pending
            .iter()
            .filter(|key| {
                inner
                    .jobs
                    .get(&key.3)
                    .is_some_and(|job| job.is_eligible(now))
            })
            .take(limit)
            .map(|key| key.3)
            .collect();

        let mut batch = Vec::with_capacity(claimed.len());
        for id in claimed {
            inner.update(id, |job| {
                job.status = JobStatus::Processing;
                job.updated_at = now;
                batch.push(job.clone());
                Ok(())
            })?;
        }

        Ok(batch)
    }

    async fn mark_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> StoreResult<()> {
        let now = self.clock.now();
        self.inner.write().update(id, |job| {
            job.status = status;
            job.error_message = error_message;
            job.updated_at = now;
            Ok(())
        })
    }

    async fn reschedule(
        &self,
        id: JobId,
        retry_count: u32,
        scheduled_for: DateTime<Utc>,
        error_message: String,
    ) -> StoreResult<()> {
        let now = self.clock.now();
        self.inner.write().update(id, |job| {
            expect_status(job, JobStatus::Processing)?;
            job.status = JobStatus::Pending;
            job.retry_count = retry_count;
            job.scheduled_for = Some(scheduled_for);
            job.error_message = Some(error_message);
            job.updated_at = now;
            Ok(())
        })
    }

    async fn mark_failed(
        &self,
        id: JobId,
        retry_count: u32,
        error_message: String,
    ) -> StoreResult<()> {
        let now = self.clock.now();
        self.inner.write().update(id, |job| {
            expect_status(job, JobStatus::Processing)?;
            job.status = JobStatus::Failed;
            job.retry_count = retry_count;
            job.error_message = Some(error_message);
            job.updated_at = now;
            Ok(())
        })
    }

    async fn release(&self, id: JobId) -> StoreResult<()> {
        let now = self.clock.now();
        self.inner.write().update(id, |job| {
            expect_status(job, JobStatus::Processing)?;
            job.status = JobStatus::Pending;
            job.updated_at = now;
            Ok(())
        })
    }

    async fn cancel(&self, id: JobId) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        let pending = inner
            .jobs
            .get(&id)
            .is_some_and(|job| job.status == JobStatus::Pending);
        if !pending {
            return Ok(false);
        }

        inner.update(id, |job| {
            job.status = JobStatus::Cancelled;
            job.updated_at = now;
            Ok(())
        })?;
        Ok(true)
    }

    async fn requeue_failed(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        let ids: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|job| job.can_requeue())
            .map(|job| job.id)
            .collect();

        for id in &ids {
            inner.update(*id, |job| {
                job.status = JobStatus::Pending;
                job.retry_count = 0;
                job.scheduled_for = None;
                job.error_message = None;
                job.updated_at = now;
                Ok(())
            })?;
        }

        Ok(ids.len())
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<EmailJob>> {
        Ok(self.inner.read().jobs.get(&id).cloned())
    }

    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<EmailJob>> {
        let inner = self.inner.read();
        let mut jobs: Vec<EmailJob> = inner
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.sequence);
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn stats(&self) -> StoreResult<QueueStats> {
        let inner = self.inner.read();
        let mut stats = QueueStats::default();
        for job in inner.jobs.values() {
            stats.count(job);
        }
        Ok(stats)
    }

    async fn prune(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> StoreResult<usize> {
        let removed = self
            .inner
            .write()
            .remove_where(|job| policy.is_expired(job, now));
        if removed > 0 {
            debug!(removed, "Pruned terminal email jobs");
        }
        Ok(removed)
    }

    async fn recover_in_flight(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        let ids: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Processing)
            .map(|job| job.id)
            .collect();

        for id in &ids {
            inner.update(*id, |job| {
                job.status = JobStatus::Pending;
                job.updated_at = now;
                Ok(())
            })?;
        }

        Ok(ids.len())
    }

    async fn clear(&self) -> StoreResult<usize> {
        let mut inner = self.inner.write();
        let removed = inner.jobs.len();
        inner.jobs.clear();
        inner.pending.clear();
        Ok(removed)
    }
}
