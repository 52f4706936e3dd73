//! # Relay Templates
//!
//! Turns a template kind plus structured data into a subject, an HTML body
//! and a plain-text body.
//!
//! ## Placeholder syntax
//!
//! - `{{name}}` and `{{event.title}}` substitute values from the data
//!   merged over the base context (`siteName`, `siteUrl`, `currentYear`,
//!   `currentDate`, `theme.*`). Unknown names render as an empty string.
//! - `{{#if flag}}...{{else}}...{{/if}}` keeps a branch by truthiness.
//! - `{{#each items}}...{{/each}}` repeats its body per element, exposing
//!   `{{@item}}`, `{{@item.field}}` and `{{@index}}`.
//!
//! Values substituted into the HTML body are escaped; the subject is not.

mod catalog;
mod engine;
mod error;
mod kind;
mod registry;
mod renderer;
mod text;
mod theme;

pub use catalog::*;
pub use engine::{escape_html, CompiledTemplate, Escape};
pub use error::*;
pub use kind::*;
pub use registry::*;
pub use renderer::*;
pub use text::html_to_text;
pub use theme::*;
