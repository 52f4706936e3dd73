//! Application assembly.

use relay_config::AppConfig;
use relay_core::{RelayResult, SharedClock, SystemClock};
use relay_queue::metrics::QueueMetrics;
use relay_queue::{
    build_transport, InMemoryQueueStore, ProcessorConfig, QueueProcessor, QueueStore,
    SharedQueueStore, SqliteQueueStore,
};
use relay_resilience::{RateLimiter, RateLimits};
use relay_service::{MailService, MailServiceImpl};
use relay_templates::TemplateRenderer;
use std::sync::Arc;
use tracing::{info, warn};

/// A fully wired Relay instance.
pub struct Application {
    config: AppConfig,
    store: SharedQueueStore,
    sqlite: Option<SqliteQueueStore>,
    processor: QueueProcessor,
    service: Arc<dyn MailService>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("store", &self.store)
            .field("processor", &self.processor)
            .finish()
    }
}

impl Application {
    /// Builds every component on the wall clock.
    pub async fn build(config: AppConfig) -> RelayResult<Self> {
        Self::build_with_clock(config, SystemClock::shared()).await
    }

    /// Builds every component on `clock`.
    ///
    /// A durable store gets its interrupted jobs back before anything else
    /// touches it.
    pub async fn build_with_clock(config: AppConfig, clock: SharedClock) -> RelayResult<Self> {
        let (store, sqlite): (SharedQueueStore, Option<SqliteQueueStore>) =
            if config.queue.persistence_enabled {
                let sqlite = SqliteQueueStore::connect(&config.queue.database_url, clock.clone())
                    .await?;
                let recovered = sqlite.recover_in_flight().await?;
                if recovered > 0 {
                    warn!(count = recovered, "Recovered email jobs interrupted by a restart");
                }
                (Arc::new(sqlite.clone()), Some(sqlite))
            } else {
                info!("Using in-memory queue store; queued email is lost on restart");
                (Arc::new(InMemoryQueueStore::new(clock.clone())), None)
            };

        let transport = build_transport(&config.transport);
        let renderer = Arc::new(TemplateRenderer::from_config(&config.templates, clock.clone()));
        let limiter = RateLimiter::new(
            RateLimits::new(
                config.rate_limit.per_minute,
                config.rate_limit.effective_per_hour(),
            ),
            clock.clone(),
        );

        let processor = QueueProcessor::new(
            store.clone(),
            transport.clone(),
            renderer.clone(),
            limiter.clone(),
            clock.clone(),
            ProcessorConfig::from_config(&config.queue, &config.retention),
        );
        let service = MailServiceImpl::new(store.clone(), transport, renderer, limiter, clock)
            .with_queue_config(&config.queue);

        Ok(Self {
            config,
            store,
            sqlite,
            processor,
            service: Arc::new(service),
        })
    }

    /// Configuration the application was built from.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The mail service for submitting email.
    pub fn service(&self) -> Arc<dyn MailService> {
        Arc::clone(&self.service)
    }

    /// The queue processor.
    pub fn processor(&self) -> &QueueProcessor {
        &self.processor
    }

    /// The queue store.
    pub fn store(&self) -> SharedQueueStore {
        Arc::clone(&self.store)
    }

    /// Starts the queue processor.
    pub fn start(&self) -> RelayResult<()> {
        self.processor.start()
    }

    /// Stops the processor, logs final counts and closes the database.
    pub async fn shutdown(&self) {
        self.processor.stop().await;

        match self.service.stats().await {
            Ok(stats) => {
                QueueMetrics::update_queue_stats(&stats.queue);
                info!(
                    pending = stats.queue.pending(),
                    processing = stats.queue.processing,
                    sent = stats.queue.sent,
                    failed = stats.queue.failed,
                    "Final queue state"
                );
            }
            Err(e) => warn!(error = %e, "Failed to read final queue state"),
        }

        if let Some(sqlite) = &self.sqlite {
            sqlite.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Clock;
    use relay_queue::JobStatus;
    use relay_service::SendEmailRequest;

    #[tokio::test]
    async fn test_build_with_defaults_uses_memory_store() {
        let app = Application::build(AppConfig::default()).await.unwrap();
        assert!(app.sqlite.is_none());
        assert!(!app.processor().is_running());
    }

    #[tokio::test]
    async fn test_submitted_mail_is_delivered_by_processor() {
        let app = Application::build(AppConfig::default()).await.unwrap();
        let id = app
            .service()
            .submit(SendEmailRequest::new("ada@example.com", "Hi", "<p>Hi</p>"))
            .await
            .unwrap();

        let report = app.processor().tick().await;
        assert_eq!(report.sent, 1);
        assert_eq!(app.service().job(id).await.unwrap().status, JobStatus::Sent);

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_persistent_store_recovers_on_build() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.queue.persistence_enabled = true;
        config.queue.database_url = format!("sqlite://{}", dir.path().join("relay.db").display());

        let app = Application::build(config.clone()).await.unwrap();
        let id = app
            .service()
            .submit(SendEmailRequest::new("ada@example.com", "Hi", "<p>Hi</p>"))
            .await
            .unwrap();
        // Claim without finishing, as a crash mid-tick would.
        let claimed = app.store().dequeue_batch(10, SystemClock.now()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        app.shutdown().await;

        let app = Application::build(config).await.unwrap();
        assert_eq!(app.service().job(id).await.unwrap().status, JobStatus::Pending);
        assert_eq!(app.processor().tick().await.sent, 1);
        app.shutdown().await;
    }
}
