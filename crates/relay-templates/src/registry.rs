//! Template registry mapping kinds to their sources.

use crate::{builtin_templates, TemplateError, TemplateKind, TemplateResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Source of one email template.
///
/// `subject` and `body` use the placeholder syntax. `body` is wrapped in the
/// theme layout before compilation; dotted names in `required_fields` are
/// looked up as paths.
pub trait EmailTemplate: Send + Sync + Debug {
    /// Kind this template renders.
    fn kind(&self) -> TemplateKind;

    /// Data fields that must be present and non-null.
    fn required_fields(&self) -> &[&str];

    /// Subject line source.
    fn subject(&self) -> &str;

    /// HTML body source.
    fn body(&self) -> &str;
}

/// Registry of templates keyed by kind.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: RwLock<HashMap<TemplateKind, Arc<dyn EmailTemplate>>>,
}

impl TemplateRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in catalog.
    pub fn builtin() -> Self {
        let registry = Self::new();
        for template in builtin_templates() {
            registry.register(template);
        }
        registry
    }

    /// Registers a template, replacing any previous one of the same kind.
    ///
    /// Returns the replaced template.
    pub fn register(&self, template: Arc<dyn EmailTemplate>) -> Option<Arc<dyn EmailTemplate>> {
        let kind = template.kind();
        debug!(kind = %kind, "Registering email template");
        self.templates.write().insert(kind, template)
    }

    /// Returns the template for `kind`.
    pub fn get(&self, kind: TemplateKind) -> TemplateResult<Arc<dyn EmailTemplate>> {
        self.templates
            .read()
            .get(&kind)
            .cloned()
            .ok_or_else(|| TemplateError::UnknownTemplate(kind.to_string()))
    }

    /// Returns true if `kind` has a template.
    pub fn contains(&self, kind: TemplateKind) -> bool {
        self.templates.read().contains_key(&kind)
    }

    /// Returns the registered kinds, sorted.
    pub fn kinds(&self) -> Vec<TemplateKind> {
        let mut kinds: Vec<_> = self.templates.read().keys().copied().collect();
        kinds.sort();
        kinds
    }
}
