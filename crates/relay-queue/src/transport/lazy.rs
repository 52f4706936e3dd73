//! Transport initialized on first use.

use super::{DeliveryReceipt, OutgoingMessage, SharedTransport, Transport, TransportError};
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{error, info};

/// Builds the wrapped transport.
pub type TransportFactory = Box<dyn Fn() -> Result<SharedTransport, TransportError> + Send + Sync>;

/// Initialization state of a [`LazyTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    /// No send has been attempted yet.
    Uninitialized,
    /// The inner transport was built.
    Ready,
    /// Building failed; every send reports this error.
    Failed(String),
}

/// Defers building a transport until the first send.
///
/// The factory runs at most once. Its outcome, success or failure, is kept
/// for the life of the wrapper.
pub struct LazyTransport {
    name: &'static str,
    factory: TransportFactory,
    cell: OnceCell<Result<SharedTransport, TransportError>>,
}

impl std::fmt::Debug for LazyTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyTransport")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl LazyTransport {
    /// Creates an uninitialized wrapper.
    pub fn new(name: &'static str, factory: TransportFactory) -> Self {
        Self {
            name,
            factory,
            cell: OnceCell::new(),
        }
    }

    /// Current initialization state.
    pub fn state(&self) -> InitState {
        match self.cell.get() {
            None => InitState::Uninitialized,
            Some(Ok(_)) => InitState::Ready,
            Some(Err(e)) => InitState::Failed(e.to_string()),
        }
    }

    /// Builds the inner transport if no attempt was made yet.
    ///
    /// A failed attempt is reported as a configuration error on every call.
    pub async fn ensure_ready(&self) -> Result<&SharedTransport, TransportError> {
        let outcome = self
            .cell
            .get_or_init(|| async {
                let outcome = (self.factory)();
                match &outcome {
                    Ok(_) => info!(transport = self.name, "Transport initialized"),
                    Err(e) => error!(transport = self.name, error = %e, "Transport initialization failed"),
                }
                outcome
            })
            .await;

        outcome.as_ref().map_err(|e| {
            TransportError::Configuration(format!("{} transport unavailable: {}", self.name, e))
        })
    }
}

#[async_trait]
impl Transport for LazyTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, TransportError> {
        self.ensure_ready().await?.send(message).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Recipients;
    use crate::transport::LogTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            recipients: Recipients::to("ada@example.com"),
            subject: "Hi".into(),
            html_body: "<p>Hi</p>".into(),
            text_body: "Hi".into(),
        }
    }

    #[tokio::test]
    async fn test_initializes_once_on_first_send() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let transport = LazyTransport::new(
            "log",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(LogTransport::new()) as SharedTransport)
            }),
        );

        assert_eq!(transport.state(), InitState::Uninitialized);
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        transport.send(&message()).await.unwrap();
        transport.send(&message()).await.unwrap();

        assert_eq!(transport.state(), InitState::Ready);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_memoized_and_permanent() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let transport = LazyTransport::new(
            "smtp",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Configuration("missing host".into()))
            }),
        );

        for _ in 0..3 {
            let err = transport.send(&message()).await.unwrap_err();
            assert!(err.is_permanent());
            assert!(err.to_string().contains("missing host"));
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(matches!(transport.state(), InitState::Failed(_)));
    }

    #[tokio::test]
    async fn test_concurrent_first_sends_build_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let transport = Arc::new(LazyTransport::new(
            "log",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(LogTransport::new()) as SharedTransport)
            }),
        ));

        let sends: Vec<_> = (0..8)
            .map(|_| {
                let transport = Arc::clone(&transport);
                tokio::spawn(async move { transport.send(&message()).await })
            })
            .collect();
        for send in sends {
            assert!(send.await.unwrap().is_ok());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }
}
