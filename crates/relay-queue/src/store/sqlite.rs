//! SQLite-backed queue store.

use super::{JobFilter, QueueStats, QueueStore, RetentionPolicy};
use crate::error::{StoreError, StoreResult};
use crate::job::{EmailJob, JobStatus, NewEmailJob, Priority};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use relay_core::{BatchId, JobId, SharedClock};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::str::FromStr;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Database row representation of an email job.
///
/// Timestamps are Unix milliseconds so that SQL comparisons order them
/// correctly.
#[derive(Debug, FromRow)]
struct EmailJobRow {
    sequence: i64,
    id: String,
    recipients: String,
    subject: String,
    html_body: String,
    text_body: Option<String>,
    template: Option<String>,
    priority: i64,
    scheduled_for: Option<i64>,
    retry_count: i64,
    max_retries: i64,
    status: String,
    error_message: Option<String>,
    batch_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

fn timestamp(millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", millis)))
}

fn count(value: i64, column: &str) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("invalid {}: {}", column, value)))
}

fn uuid(value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("invalid UUID: {}", e)))
}

/// Deletion threshold for a retention window; `i64::MIN` keeps everything.
fn cutoff(now: DateTime<Utc>, retention: Duration) -> i64 {
    now.checked_sub_signed(retention)
        .map_or(i64::MIN, |at| at.timestamp_millis())
}

impl TryFrom<EmailJobRow> for EmailJob {
    type Error = StoreError;

    fn try_from(row: EmailJobRow) -> Result<Self, Self::Error> {
        let priority = i8::try_from(row.priority)
            .map(Priority::from)
            .map_err(|_| StoreError::Corrupt(format!("invalid priority: {}", row.priority)))?;

        Ok(EmailJob {
            id: JobId::from_uuid(uuid(&row.id)?),
            recipients: serde_json::from_str(&row.recipients)?,
            subject: row.subject,
            html_body: row.html_body,
            text_body: row.text_body,
            template: row
                .template
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            priority,
            scheduled_for: row.scheduled_for.map(timestamp).transpose()?,
            retry_count: count(row.retry_count, "retry_count")?,
            max_retries: count(row.max_retries, "max_retries")?,
            status: JobStatus::from_str(&row.status).map_err(StoreError::Corrupt)?,
            error_message: row.error_message,
            batch_id: row
                .batch_id
                .as_deref()
                .map(|b| uuid(b).map(BatchId))
                .transpose()?,
            sequence: u64::try_from(row.sequence)
                .map_err(|_| StoreError::Corrupt(format!("invalid sequence: {}", row.sequence)))?,
            created_at: timestamp(row.created_at)?,
            updated_at: timestamp(row.updated_at)?,
        })
    }
}

/// Durable queue store on SQLite.
///
/// Safe to reopen after a crash: call
/// [`recover_in_flight`](QueueStore::recover_in_flight) before starting a
/// processor. Only one processor may run against a database at a time.
#[derive(Debug, Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
    clock: SharedClock,
}

impl SqliteQueueStore {
    /// Opens (creating if missing) the database at `url` and applies the
    /// schema.
    pub async fn connect(url: &str, clock: SharedClock) -> StoreResult<Self> {
        info!("Connecting to SQLite queue database...");

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(StdDuration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database lives exactly as long as its one connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            warn!("Failed to open queue database: {}", e);
            StoreError::Database(e)
        })?;

        let store = Self::with_pool(pool, clock);
        store.run_migrations().await?;
        info!("SQLite queue database ready");
        Ok(store)
    }

    /// Wraps an existing pool. The schema is not applied.
    pub fn with_pool(pool: SqlitePool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    /// Returns a reference to the underlying pool.
    #[must_use]
    pub fn inner(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies pending schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        debug!("Running queue database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Checks if the database connection is healthy.
    pub async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Closes the pool.
    pub async fn close(&self) {
        info!("Closing queue database...");
        self.pool.close().await;
    }

    fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Explains why a guarded update touched no rows.
    async fn transition_error(&self, id: JobId, expected: JobStatus) -> StoreError {
        match self.get(id).await {
            Ok(Some(job)) => StoreError::InvalidTransition {
                id,
                expected,
                actual: job.status,
            },
            Ok(None) => StoreError::NotFound(id),
            Err(e) => e,
        }
    }
}

async fn insert_job(conn: &mut SqliteConnection, job: &EmailJob) -> StoreResult<i64> {
    let recipients = serde_json::to_string(&job.recipients)?;
    let template = job.template.as_ref().map(serde_json::to_string).transpose()?;

    let sequence = sqlx::query_scalar(
        r#"
        INSERT INTO email_jobs (
            id, recipients, subject, html_body, text_body, template, priority,
            scheduled_for, retry_count, max_retries, status, error_message,
            batch_id, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, 'pending', NULL, ?, ?, ?)
        RETURNING sequence
        "#,
    )
    .bind(job.id.to_string())
    .bind(recipients)
    .bind(&job.subject)
    .bind(&job.html_body)
    .bind(&job.text_body)
    .bind(template)
    .bind(i64::from(i8::from(job.priority)))
    .bind(job.scheduled_for.map(|at| at.timestamp_millis()))
    .bind(i64::from(job.max_retries))
    .bind(job.batch_id.map(|b| b.to_string()))
    .bind(job.created_at.timestamp_millis())
    .bind(job.updated_at.timestamp_millis())
    .fetch_one(conn)
    .await?;

    Ok(sequence)
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn enqueue(&self, job: NewEmailJob) -> StoreResult<JobId> {
        let job = job.into_job(JobId::new(), 0, self.clock.now());
        let mut conn = self.pool.acquire().await?;
        let sequence = insert_job(&mut *conn, &job).await?;

        debug!(job_id = %job.id, sequence, "Enqueued email job");
        Ok(job.id)
    }

    async fn enqueue_many(&self, jobs: Vec<NewEmailJob>) -> StoreResult<Vec<JobId>> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            let job = job.into_job(JobId::new(), 0, now);
            insert_job(&mut *tx, &job).await?;
            ids.push(job.id);
        }
        tx.commit().await?;

        debug!(count = ids.len(), "Enqueued email jobs");
        Ok(ids)
    }

    async fn dequeue_batch(&self, limit: usize, now: DateTime<Utc>) -> StoreResult<Vec<EmailJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, EmailJobRow>(
            r#"
            UPDATE email_jobs
            SET status = 'processing', updated_at = ?1
            WHERE sequence IN (
                SELECT sequence FROM email_jobs
                WHERE status = 'pending'
                  AND (scheduled_for IS NULL OR scheduled_for <= ?1)
                ORDER BY priority DESC, created_at ASC, sequence ASC
                LIMIT ?2
            )
            RETURNING *
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        // RETURNING does not preserve the subquery order.
        let mut jobs = rows
            .into_iter()
            .map(EmailJob::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        jobs.sort_by_key(EmailJob::dequeue_key);
        Ok(jobs)
    }

    async fn mark_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = ?, error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(self.now_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn reschedule(
        &self,
        id: JobId,
        retry_count: u32,
        scheduled_for: DateTime<Utc>,
        error_message: String,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'pending', retry_count = ?, scheduled_for = ?,
                error_message = ?, updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(i64::from(retry_count))
        .bind(scheduled_for.timestamp_millis())
        .bind(error_message)
        .bind(self.now_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, JobStatus::Processing).await);
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: JobId,
        retry_count: u32,
        error_message: String,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'failed', retry_count = ?, error_message = ?, updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(i64::from(retry_count))
        .bind(error_message)
        .bind(self.now_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, JobStatus::Processing).await);
        }
        Ok(())
    }

    async fn release(&self, id: JobId) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'pending', updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(self.now_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, JobStatus::Processing).await);
        }
        Ok(())
    }

    async fn cancel(&self, id: JobId) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'cancelled', updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(self.now_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn requeue_failed(&self) -> StoreResult<usize> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'pending', retry_count = 0, scheduled_for = NULL,
                error_message = NULL, updated_at = ?
            WHERE status = 'failed' AND retry_count < max_retries
            "#,
        )
        .bind(self.now_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<EmailJob>> {
        sqlx::query_as::<_, EmailJobRow>("SELECT * FROM email_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(EmailJob::try_from)
            .transpose()
    }

    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<EmailJob>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM email_jobs WHERE 1 = 1");
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(batch_id) = filter.batch_id {
            query.push(" AND batch_id = ").push_bind(batch_id.to_string());
        }
        query.push(" ORDER BY sequence ASC");
        if let Some(limit) = filter.limit {
            query
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        query
            .build_query_as::<EmailJobRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(EmailJob::try_from)
            .collect()
    }

    async fn stats(&self) -> StoreResult<QueueStats> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT status, retry_count > 0 AS retrying, COUNT(*) AS total
            FROM email_jobs
            GROUP BY status, retrying
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for (status, retrying, total) in rows {
            let total = u64::try_from(total).unwrap_or(0);
            match JobStatus::from_str(&status).map_err(StoreError::Corrupt)? {
                JobStatus::Pending if retrying != 0 => stats.pending_retrying += total,
                JobStatus::Pending => stats.pending_fresh += total,
                JobStatus::Processing => stats.processing += total,
                JobStatus::Sent => stats.sent += total,
                JobStatus::Failed => stats.failed += total,
                JobStatus::Cancelled => stats.cancelled += total,
            }
            stats.total += total;
        }
        Ok(stats)
    }

    async fn prune(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> StoreResult<usize> {
        let result = sqlx::query(
            r#"
            DELETE FROM email_jobs
            WHERE (status = 'sent' AND updated_at <= ?)
               OR (status = 'cancelled' AND updated_at <= ?)
               OR (status = 'failed' AND retry_count >= max_retries AND updated_at <= ?)
            "#,
        )
        .bind(cutoff(now, policy.sent))
        .bind(cutoff(now, policy.cancelled))
        .bind(cutoff(now, policy.failed))
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected() as usize;
        if removed > 0 {
            debug!(removed, "Pruned terminal email jobs");
        }
        Ok(removed)
    }

    async fn recover_in_flight(&self) -> StoreResult<usize> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = 'pending', updated_at = ?
            WHERE status = 'processing'
            "#,
        )
        .bind(self.now_millis())
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected() as usize;
        if recovered > 0 {
            warn!(recovered, "Returned interrupted email jobs to the queue");
        }
        Ok(recovered)
    }

    async fn clear(&self) -> StoreResult<usize> {
        let result = sqlx::query("DELETE FROM email_jobs")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Recipients, TemplateRef};
    use relay_core::{Clock, ManualClock};
    use relay_templates::TemplateKind;
    use serde_json::json;
    use std::sync::Arc;

    async fn store() -> (SqliteQueueStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = SqliteQueueStore::connect("sqlite::memory:", clock.clone())
            .await
            .unwrap();
        (store, clock)
    }

    fn message(to: &str) -> NewEmailJob {
        NewEmailJob::message(Recipients::to(to), "Subject", "<p>Body</p>")
    }

    #[tokio::test]
    async fn test_enqueue_and_get_round_trip() {
        let (store, _) = store().await;
        let batch = BatchId::new();
        let id = store
            .enqueue(
                NewEmailJob::deferred(
                    Recipients::to("ada@example.com").with_cc(vec!["cc@example.com".into()]),
                    TemplateRef::new(TemplateKind::Welcome, json!({"userName": "Ada"}))
                        .with_theme(Some("dark".into())),
                )
                .priority(Priority::High)
                .in_batch(batch),
            )
            .await
            .unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.priority, Priority::High);
        assert_eq!(job.batch_id, Some(batch));
        assert_eq!(job.recipients.cc, vec!["cc@example.com".to_string()]);
        assert_eq!(job.template.unwrap().theme.as_deref(), Some("dark"));
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_claim_orders_and_never_repeats() {
        let (store, clock) = store().await;
        let low = store
            .enqueue(message("low@example.com").priority(Priority::Low))
            .await
            .unwrap();
        clock.advance(StdDuration::from_millis(10));
        let high = store
            .enqueue(message("high@example.com").priority(Priority::High))
            .await
            .unwrap();
        clock.advance(StdDuration::from_millis(10));
        let normal = store.enqueue(message("normal@example.com")).await.unwrap();

        let batch = store.dequeue_batch(3, clock.now()).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![high, normal, low]);
        assert!(store.dequeue_batch(3, clock.now()).await.unwrap().is_empty());
        assert_eq!(store.stats().await.unwrap().processing, 3);
    }

    #[tokio::test]
    async fn test_future_jobs_wait() {
        let (store, clock) = store().await;
        store
            .enqueue(message("a@example.com").scheduled_for(clock.now() + Duration::minutes(1)))
            .await
            .unwrap();

        assert!(store.dequeue_batch(10, clock.now()).await.unwrap().is_empty());
        clock.advance(StdDuration::from_secs(60));
        assert_eq!(store.dequeue_batch(10, clock.now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transitions() {
        let (store, clock) = store().await;
        let id = store.enqueue(message("a@example.com")).await.unwrap();

        assert!(matches!(
            store.release(id).await.unwrap_err(),
            StoreError::InvalidTransition { .. }
        ));
        assert!(matches!(
            store.release(JobId::new()).await.unwrap_err(),
            StoreError::NotFound(_)
        ));

        store.dequeue_batch(1, clock.now()).await.unwrap();
        assert!(!store.cancel(id).await.unwrap());

        store
            .reschedule(id, 1, clock.now(), "timeout".into())
            .await
            .unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending_retrying, 1);

        assert!(store.cancel(id).await.unwrap());
        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_requeue_prune_and_clear() {
        let (store, clock) = store().await;
        let failed = store.enqueue(message("a@example.com")).await.unwrap();
        let sent = store.enqueue(message("b@example.com")).await.unwrap();
        store.dequeue_batch(2, clock.now()).await.unwrap();
        store
            .mark_status(failed, JobStatus::Failed, Some("render".into()))
            .await
            .unwrap();
        store.mark_status(sent, JobStatus::Sent, None).await.unwrap();

        assert_eq!(store.requeue_failed().await.unwrap(), 1);
        let listed = store
            .list(&JobFilter::status(JobStatus::Pending))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, failed);

        clock.advance(StdDuration::from_secs(2));
        let policy = RetentionPolicy::uniform(Duration::seconds(1));
        assert_eq!(store.prune(&policy, clock.now()).await.unwrap(), 1);
        assert!(store.get(sent).await.unwrap().is_none());

        assert_eq!(store.clear().await.unwrap(), 1);
        assert_eq!(store.stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_list_by_batch_with_limit() {
        let (store, _) = store().await;
        let batch = BatchId::new();
        for i in 0..3 {
            store
                .enqueue(message(&format!("{}@example.com", i)).in_batch(batch))
                .await
                .unwrap();
        }
        store.enqueue(message("other@example.com")).await.unwrap();

        let jobs = store.list(&JobFilter::batch(batch)).await.unwrap();
        assert_eq!(jobs.len(), 3);
        assert!(jobs.windows(2).all(|w| w[0].sequence < w[1].sequence));

        let limited = store.list(&JobFilter::batch(batch).limit(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
    }
}
