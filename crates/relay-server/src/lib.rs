//! # Relay Server Library
//!
//! Wires configuration, the queue store, the transport, the template
//! renderer and the rate limiter into a running queue processor and a
//! mail service.

pub mod app;
pub mod startup;
