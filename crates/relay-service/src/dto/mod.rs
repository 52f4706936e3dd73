//! Data Transfer Objects for the mail service.

mod mail_dto;

pub use mail_dto::*;
