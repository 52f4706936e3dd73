//! # Relay Queue
//!
//! Durable email job queue for Relay.
//!
//! ## Features
//!
//! - Priority ordering (high, normal, low) with FIFO inside a priority
//! - Scheduled sends and exponential retry backoff
//! - Atomic batch claiming, so a job is never delivered twice
//! - In-memory and SQLite stores behind one [`QueueStore`] trait
//! - Log and SMTP transports, the latter built on first use
//! - Retention-based pruning of finished jobs
//!
//! ## Example
//!
//! ```rust,ignore
//! use relay_queue::{InMemoryQueueStore, NewEmailJob, QueueStore, Recipients};
//!
//! let store = InMemoryQueueStore::new(SystemClock::shared());
//! let id = store
//!     .enqueue(NewEmailJob::message(Recipients::to("ada@example.com"), "Hi", "<p>Hi</p>"))
//!     .await?;
//! ```

pub mod error;
pub mod job;
pub mod metrics;
pub mod processor;
pub mod retry;
pub mod store;
pub mod transport;

pub use error::{StoreError, StoreResult};
pub use job::*;
pub use processor::{ProcessorConfig, QueueProcessor, TickReport};
pub use retry::RetryPolicy;
pub use store::*;
pub use transport::{
    build_transport, DeliveryReceipt, LazyTransport, LogTransport, OutgoingMessage,
    SharedTransport, SmtpTransport, Transport, TransportError,
};
