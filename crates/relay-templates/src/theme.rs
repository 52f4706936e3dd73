//! Visual themes and the layouts that wrap every HTML body.

use serde_json::{json, Value};

/// Marker in a layout replaced by the template body before compilation.
pub const BODY_SLOT: &str = "{{> body}}";

/// Name of the theme used when none is requested.
pub const DEFAULT_THEME: &str = "default";

const BANNER_LAYOUT: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{siteName}}</title></head>
<body style="margin:0;padding:0;background:{{theme.backgroundColor}};color:{{theme.textColor}};font-family:{{theme.fontFamily}};">
<div style="max-width:600px;margin:0 auto;">
<div style="background:{{theme.primaryColor}};padding:20px;">
<h1 style="margin:0;color:#ffffff;font-size:22px;">{{siteName}}</h1>
</div>
<div style="padding:24px;">
{{> body}}
</div>
<div style="padding:16px 24px;font-size:12px;color:{{theme.mutedColor}};">
<p>© {{currentYear}} {{siteName}}. <a href="{{siteUrl}}" style="color:{{theme.mutedColor}};">{{siteUrl}}</a></p>
</div>
</div>
</body>
</html>"#;

const PLAIN_LAYOUT: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{siteName}}</title></head>
<body style="font-family:{{theme.fontFamily}};color:{{theme.textColor}};">
{{> body}}
<p style="color:{{theme.mutedColor}};font-size:12px;">{{siteName}} · {{siteUrl}}</p>
</body>
</html>"#;

/// A named color scheme plus the layout it wraps bodies in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    pub name: &'static str,
    pub primary_color: &'static str,
    pub background_color: &'static str,
    pub text_color: &'static str,
    pub muted_color: &'static str,
    pub font_family: &'static str,
    layout: &'static str,
}

impl Theme {
    /// Wraps a template body in this theme's layout.
    pub fn wrap(&self, body: &str) -> String {
        self.layout.replace(BODY_SLOT, body)
    }

    /// Values exposed to templates under `theme.*`.
    pub fn context(&self) -> Value {
        json!({
            "name": self.name,
            "primaryColor": self.primary_color,
            "backgroundColor": self.background_color,
            "textColor": self.text_color,
            "mutedColor": self.muted_color,
            "fontFamily": self.font_family,
        })
    }
}

/// The fixed set of themes.
#[derive(Debug, Clone)]
pub struct ThemeCatalog {
    themes: Vec<Theme>,
    default_index: usize,
}

impl ThemeCatalog {
    /// Creates the built-in catalog with `default_theme` as the fallback.
    ///
    /// An unknown `default_theme` falls back to `"default"`.
    pub fn new(default_theme: &str) -> Self {
        let themes = vec![
            Theme {
                name: DEFAULT_THEME,
                primary_color: "#2563eb",
                background_color: "#f8fafc",
                text_color: "#1e293b",
                muted_color: "#64748b",
                font_family: "Helvetica, Arial, sans-serif",
                layout: BANNER_LAYOUT,
            },
            Theme {
                name: "dark",
                primary_color: "#7c3aed",
                background_color: "#0f172a",
                text_color: "#e2e8f0",
                muted_color: "#94a3b8",
                font_family: "Helvetica, Arial, sans-serif",
                layout: BANNER_LAYOUT,
            },
            Theme {
                name: "minimal",
                primary_color: "#111827",
                background_color: "#ffffff",
                text_color: "#111827",
                muted_color: "#6b7280",
                font_family: "Georgia, serif",
                layout: PLAIN_LAYOUT,
            },
        ];
        let default_index = themes
            .iter()
            .position(|t| t.name == default_theme)
            .unwrap_or(0);
        Self {
            themes,
            default_index,
        }
    }

    /// Returns the named theme, or the default for `None` and unknown names.
    pub fn resolve(&self, name: Option<&str>) -> &Theme {
        name.and_then(|n| self.themes.iter().find(|t| t.name == n))
            .unwrap_or(&self.themes[self.default_index])
    }

    /// Returns the fallback theme.
    pub fn default_theme(&self) -> &Theme {
        &self.themes[self.default_index]
    }

    /// Names of all themes.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.themes.iter().map(|t| t.name)
    }
}

impl Default for ThemeCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_THEME)
    }
}
