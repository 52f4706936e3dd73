//! Template renderer.

use crate::engine::lookup;
use crate::{
    html_to_text, CompiledTemplate, EmailTemplate, Escape, TemplateError, TemplateKind,
    TemplateRegistry, TemplateResult, Theme, ThemeCatalog,
};
use chrono::Datelike;
use parking_lot::RwLock;
use relay_config::TemplateConfig;
use relay_core::{SharedClock, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Per-render options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Theme name; unknown or absent names use the default theme.
    #[serde(default)]
    pub theme: Option<String>,
}

impl RenderOptions {
    /// Options selecting a theme.
    pub fn with_theme(theme: impl Into<String>) -> Self {
        Self {
            theme: Some(theme.into()),
        }
    }
}

/// A fully rendered email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Site values merged into every render context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteContext {
    pub site_name: String,
    pub site_url: String,
}

impl From<&TemplateConfig> for SiteContext {
    fn from(config: &TemplateConfig) -> Self {
        Self {
            site_name: config.site_name.clone(),
            site_url: config.site_url.clone(),
        }
    }
}

#[derive(Debug)]
struct CompiledLayout {
    subject: CompiledTemplate,
    html: CompiledTemplate,
}

/// Renders templates from a registry, caching compiled layouts per
/// `(kind, theme)`.
#[derive(Debug)]
pub struct TemplateRenderer {
    registry: TemplateRegistry,
    themes: ThemeCatalog,
    site: SiteContext,
    clock: SharedClock,
    cache: RwLock<HashMap<(TemplateKind, &'static str), Arc<CompiledLayout>>>,
}

impl TemplateRenderer {
    /// Creates a renderer.
    pub fn new(
        registry: TemplateRegistry,
        themes: ThemeCatalog,
        site: SiteContext,
        clock: SharedClock,
    ) -> Self {
        Self {
            registry,
            themes,
            site,
            clock,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a renderer over the built-in catalog from configuration.
    pub fn from_config(config: &TemplateConfig, clock: SharedClock) -> Self {
        Self::new(
            TemplateRegistry::builtin(),
            ThemeCatalog::new(&config.default_theme),
            SiteContext::from(config),
            clock,
        )
    }

    /// Creates a renderer with default configuration and the system clock.
    pub fn with_defaults() -> Self {
        Self::from_config(&TemplateConfig::default(), SystemClock::shared())
    }

    /// Renders `kind` with `data`.
    ///
    /// Fails with `MissingVariable` naming every absent required field.
    pub fn render(
        &self,
        kind: TemplateKind,
        data: &Value,
        options: &RenderOptions,
    ) -> TemplateResult<RenderedEmail> {
        let template = self.registry.get(kind)?;
        check_required(template.as_ref(), data)?;

        let theme = self.themes.resolve(options.theme.as_deref());
        let layout = self.layout(template.as_ref(), theme)?;
        let context = self.context(data, theme);

        let subject = layout.subject.render(&context, Escape::None).trim().to_string();
        let html = layout.html.render(&context, Escape::Html);
        let text = html_to_text(&html);

        debug!(kind = %kind, theme = theme.name, "Rendered email template");

        Ok(RenderedEmail {
            subject,
            html,
            text,
        })
    }

    /// Renders by wire identifier, failing with `UnknownTemplate` for
    /// identifiers outside the catalog.
    pub fn render_by_id(
        &self,
        template_id: &str,
        data: &Value,
        options: &RenderOptions,
    ) -> TemplateResult<RenderedEmail> {
        self.render(template_id.parse()?, data, options)
    }

    /// Registers a template override and evicts its cached layouts.
    pub fn register(&self, template: Arc<dyn EmailTemplate>) {
        let kind = template.kind();
        self.registry.register(template);
        self.cache.write().retain(|(cached, _), _| *cached != kind);
    }

    /// Empties the layout cache.
    pub fn clear_cache(&self) {
        let mut cache = self.cache.write();
        debug!(entries = cache.len(), "Clearing template cache");
        cache.clear();
    }

    /// Number of cached layouts.
    pub fn cached_layouts(&self) -> usize {
        self.cache.read().len()
    }

    /// The underlying registry.
    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    fn layout(
        &self,
        template: &dyn EmailTemplate,
        theme: &Theme,
    ) -> TemplateResult<Arc<CompiledLayout>> {
        let key = (template.kind(), theme.name);
        if let Some(layout) = self.cache.read().get(&key) {
            return Ok(Arc::clone(layout));
        }

        let syntax = |message: String| TemplateError::Syntax {
            kind: template.kind().to_string(),
            message,
        };
        let layout = Arc::new(CompiledLayout {
            subject: CompiledTemplate::compile(template.subject()).map_err(syntax)?,
            html: CompiledTemplate::compile(&theme.wrap(template.body())).map_err(syntax)?,
        });

        debug!(kind = %key.0, theme = key.1, "Compiled template layout");
        self.cache
            .write()
            .entry(key)
            .or_insert_with(|| Arc::clone(&layout));
        Ok(layout)
    }

    fn context(&self, data: &Value, theme: &Theme) -> Value {
        let now = self.clock.now();
        let mut context = Map::new();
        context.insert("siteName".into(), Value::from(self.site.site_name.clone()));
        context.insert("siteUrl".into(), Value::from(self.site.site_url.clone()));
        context.insert("currentYear".into(), Value::from(now.year()));
        context.insert(
            "currentDate".into(),
            Value::from(now.format("%B %-d, %Y").to_string()),
        );
        context.insert("theme".into(), theme.context());

        if let Value::Object(fields) = data {
            for (key, value) in fields {
                context.insert(key.clone(), value.clone());
            }
        }

        Value::Object(context)
    }
}

fn check_required(template: &dyn EmailTemplate, data: &Value) -> TemplateResult<()> {
    let mut missing: Vec<String> = template
        .required_fields()
        .iter()
        .filter(|field| lookup(data, field).map_or(true, Value::is_null))
        .map(|field| (*field).to_string())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    missing.sort();
    Err(TemplateError::MissingVariable {
        kind: template.kind().to_string(),
        fields: missing,
    })
}
