//! # Relay Service
//!
//! Mail submission layer for Relay: request validation, eager and
//! deferred template rendering, immediate sends and job polling.

pub mod dto;
pub mod mail_service;
pub mod mail_service_impl;

pub use dto::*;
pub use mail_service::*;
pub use mail_service_impl::*;
