//! Prometheus metrics for the email queue.

use crate::store::QueueStats;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use relay_resilience::RateLimitSnapshot;
use std::time::Duration;

/// Metric names for the email queue.
pub mod names {
    /// Total jobs enqueued.
    pub const JOBS_ENQUEUED_TOTAL: &str = "relay_jobs_enqueued_total";
    /// Total jobs claimed by a tick.
    pub const JOBS_CLAIMED_TOTAL: &str = "relay_jobs_claimed_total";
    /// Total messages delivered.
    pub const JOBS_SENT_TOTAL: &str = "relay_jobs_sent_total";
    /// Total jobs failed permanently.
    pub const JOBS_FAILED_TOTAL: &str = "relay_jobs_failed_total";
    /// Total attempts rescheduled with backoff.
    pub const JOBS_RETRIED_TOTAL: &str = "relay_jobs_retried_total";
    /// Total jobs returned to the queue by the rate limiter.
    pub const JOBS_DEFERRED_TOTAL: &str = "relay_jobs_deferred_total";
    /// Total jobs cancelled.
    pub const JOBS_CANCELLED_TOTAL: &str = "relay_jobs_cancelled_total";
    /// Total terminal jobs pruned.
    pub const JOBS_PRUNED_TOTAL: &str = "relay_jobs_pruned_total";

    /// Current jobs by status.
    pub const JOBS_CURRENT: &str = "relay_jobs_current";

    /// Transport send duration in seconds.
    pub const SEND_DURATION_SECONDS: &str = "relay_send_duration_seconds";
    /// Time from enqueue to delivery in seconds.
    pub const DELIVERY_LATENCY_SECONDS: &str = "relay_delivery_latency_seconds";
    /// Tick duration in seconds.
    pub const TICK_DURATION_SECONDS: &str = "relay_tick_duration_seconds";
    /// Ticks dropped because one was already running.
    pub const TICKS_SKIPPED_TOTAL: &str = "relay_ticks_skipped_total";

    /// Sends counted in the current minute window.
    pub const RATE_LIMIT_MINUTE: &str = "relay_rate_limit_sent_this_minute";
    /// Sends counted in the current hour window.
    pub const RATE_LIMIT_HOUR: &str = "relay_rate_limit_sent_this_hour";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Job counters
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of email jobs enqueued");
    describe_counter!(
        names::JOBS_CLAIMED_TOTAL,
        "Total number of email jobs claimed for delivery"
    );
    describe_counter!(names::JOBS_SENT_TOTAL, "Total number of emails delivered");
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of email jobs that failed permanently"
    );
    describe_counter!(
        names::JOBS_RETRIED_TOTAL,
        "Total number of delivery attempts rescheduled with backoff"
    );
    describe_counter!(
        names::JOBS_DEFERRED_TOTAL,
        "Total number of jobs deferred by the rate limiter"
    );
    describe_counter!(names::JOBS_CANCELLED_TOTAL, "Total number of email jobs cancelled");
    describe_counter!(names::JOBS_PRUNED_TOTAL, "Total number of terminal jobs pruned");

    // Queue gauges
    describe_gauge!(names::JOBS_CURRENT, "Current number of email jobs by status");

    // Durations
    describe_histogram!(
        names::SEND_DURATION_SECONDS,
        "Transport send duration in seconds"
    );
    describe_histogram!(
        names::DELIVERY_LATENCY_SECONDS,
        "Time from enqueue to delivery in seconds"
    );
    describe_histogram!(names::TICK_DURATION_SECONDS, "Queue tick duration in seconds");
    describe_counter!(
        names::TICKS_SKIPPED_TOTAL,
        "Ticks dropped because the previous one was still running"
    );

    // Rate limiter
    describe_gauge!(
        names::RATE_LIMIT_MINUTE,
        "Sends counted in the current minute window"
    );
    describe_gauge!(
        names::RATE_LIMIT_HOUR,
        "Sends counted in the current hour window"
    );
}

/// Queue metrics recorder.
#[derive(Clone)]
pub struct QueueMetrics;

impl QueueMetrics {
    /// Record a job enqueued.
    pub fn job_enqueued(priority: &str, kind: &str) {
        counter!(
            names::JOBS_ENQUEUED_TOTAL,
            "priority" => priority.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    /// Record a batch claimed.
    pub fn jobs_claimed(count: usize) {
        counter!(names::JOBS_CLAIMED_TOTAL).increment(count as u64);
    }

    /// Record a delivered message.
    pub fn job_sent(transport: &str, send_duration: Duration, latency: Duration) {
        counter!(names::JOBS_SENT_TOTAL, "transport" => transport.to_string()).increment(1);

        histogram!(
            names::SEND_DURATION_SECONDS,
            "transport" => transport.to_string(),
            "status" => "sent"
        )
        .record(send_duration.as_secs_f64());

        histogram!(names::DELIVERY_LATENCY_SECONDS).record(latency.as_secs_f64());
    }

    /// Record a permanent failure.
    pub fn job_failed(reason: &str) {
        counter!(names::JOBS_FAILED_TOTAL, "reason" => reason.to_string()).increment(1);
    }

    /// Record a failed attempt that will be retried.
    pub fn job_retried(error_type: &str, attempt: u32) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "error_type" => error_type.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
    }

    /// Record a rate-limit deferral.
    pub fn job_deferred() {
        counter!(names::JOBS_DEFERRED_TOTAL).increment(1);
    }

    /// Record a job cancelled.
    pub fn job_cancelled() {
        counter!(names::JOBS_CANCELLED_TOTAL).increment(1);
    }

    /// Record pruned jobs.
    pub fn jobs_pruned(count: usize) {
        counter!(names::JOBS_PRUNED_TOTAL).increment(count as u64);
    }

    /// Record a completed tick.
    pub fn tick_completed(duration: Duration) {
        histogram!(names::TICK_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Record a dropped tick.
    pub fn tick_skipped() {
        counter!(names::TICKS_SKIPPED_TOTAL).increment(1);
    }

    /// Update queue gauges.
    pub fn update_queue_stats(stats: &QueueStats) {
        let by_status = [
            ("pending_fresh", stats.pending_fresh),
            ("pending_retrying", stats.pending_retrying),
            ("processing", stats.processing),
            ("sent", stats.sent),
            ("failed", stats.failed),
            ("cancelled", stats.cancelled),
        ];
        for (status, count) in by_status {
            gauge!(names::JOBS_CURRENT, "status" => status).set(count as f64);
        }
    }

    /// Update rate limiter gauges.
    pub fn update_rate_limit(snapshot: &RateLimitSnapshot) {
        gauge!(names::RATE_LIMIT_MINUTE).set(f64::from(snapshot.sent_this_minute));
        gauge!(names::RATE_LIMIT_HOUR).set(f64::from(snapshot.sent_this_hour));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::JOBS_ENQUEUED_TOTAL.starts_with("relay_"));
        assert!(names::JOBS_SENT_TOTAL.ends_with("_total"));
        assert!(names::SEND_DURATION_SECONDS.ends_with("_seconds"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        register_metrics();
        QueueMetrics::job_enqueued("high", "welcome");
        QueueMetrics::job_sent("log", Duration::from_millis(5), Duration::from_secs(1));
        QueueMetrics::update_queue_stats(&QueueStats::default());
    }
}
