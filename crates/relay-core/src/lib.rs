//! # Relay Core
//!
//! Core types shared by every Relay crate: the unified error type,
//! strongly-typed identifiers, the injectable clock, validation helpers
//! and the tracing bootstrap.

pub mod clock;
pub mod error;
pub mod id;
pub mod result;
pub mod telemetry;
pub mod validation;

pub use clock::*;
pub use error::*;
pub use id::*;
pub use result::*;
pub use validation::*;
