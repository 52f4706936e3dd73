//! Shared fixtures for queue integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::ManualClock;
use relay_queue::{
    DeliveryReceipt, InMemoryQueueStore, NewEmailJob, OutgoingMessage, ProcessorConfig,
    QueueProcessor, Recipients, SharedQueueStore, SqliteQueueStore, Transport, TransportError,
};
use relay_resilience::{RateLimiter, RateLimits};
use relay_templates::TemplateRenderer;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Transport that plays back scripted outcomes, then accepts everything.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<(), TransportError>>>,
    always_fail: Option<TransportError>,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    entered: Arc<Notify>,
    delivered: Mutex<Vec<OutgoingMessage>>,
    attempts: AtomicUsize,
}

impl ScriptedTransport {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn failing(err: TransportError) -> Self {
        Self {
            always_fail: Some(err),
            ..Self::default()
        }
    }

    pub fn scripted(outcomes: Vec<Result<(), TransportError>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Blocks every send until `gate` is notified.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Notified each time a send begins.
    pub fn entered(&self) -> Arc<Notify> {
        Arc::clone(&self.entered)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<OutgoingMessage> {
        self.delivered.lock().clone()
    }

    pub fn delivered_subjects(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .map(|m| m.subject.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.always_fail {
            return Err(err.clone());
        }
        let outcome = self.script.lock().pop_front().unwrap_or(Ok(()));
        outcome?;

        self.delivered.lock().push(message.clone());
        Ok(DeliveryReceipt::new("scripted", None))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// A processor wired to a manual clock and a scripted transport.
pub struct TestQueue {
    pub clock: Arc<ManualClock>,
    pub store: SharedQueueStore,
    pub transport: Arc<ScriptedTransport>,
    pub processor: QueueProcessor,
}

impl TestQueue {
    pub fn in_memory(transport: ScriptedTransport, limits: RateLimits, config: ProcessorConfig) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let store: SharedQueueStore = Arc::new(InMemoryQueueStore::new(clock.clone()));
        Self::assemble(clock, store, transport, limits, config)
    }

    pub async fn sqlite(
        url: &str,
        clock: Arc<ManualClock>,
        transport: ScriptedTransport,
        limits: RateLimits,
        config: ProcessorConfig,
    ) -> Self {
        let store = SqliteQueueStore::connect(url, clock.clone())
            .await
            .expect("Failed to open SQLite store");
        Self::assemble(clock, Arc::new(store), transport, limits, config)
    }

    fn assemble(
        clock: Arc<ManualClock>,
        store: SharedQueueStore,
        transport: ScriptedTransport,
        limits: RateLimits,
        config: ProcessorConfig,
    ) -> Self {
        let transport = Arc::new(transport);
        let processor = QueueProcessor::new(
            store.clone(),
            transport.clone(),
            Arc::new(TemplateRenderer::with_defaults()),
            RateLimiter::new(limits, clock.clone()),
            clock.clone(),
            config,
        );
        Self {
            clock,
            store,
            transport,
            processor,
        }
    }
}

/// Ten jobs per tick, delivered one at a time, one-minute backoff base.
pub fn test_config() -> ProcessorConfig {
    ProcessorConfig::default()
        .with_batch_size(10)
        .with_concurrency(1)
        .with_tick_interval(Duration::from_millis(10))
}

pub fn plain(subject: &str) -> NewEmailJob {
    NewEmailJob::message(
        Recipients::to("ada@example.com"),
        subject,
        format!("<p>{}</p>", subject),
    )
}
