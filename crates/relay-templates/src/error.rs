//! Template error types.

use relay_core::RelayError;
use thiserror::Error;

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors raised while resolving or rendering a template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// The identifier is not one of the known template kinds.
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    /// Required data fields are absent. `fields` is sorted.
    #[error("Missing template variables for {kind}: {}", fields.join(", "))]
    MissingVariable { kind: String, fields: Vec<String> },

    /// A registered template body does not parse.
    #[error("Template syntax error in {kind}: {message}")]
    Syntax { kind: String, message: String },
}

impl From<TemplateError> for RelayError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::UnknownTemplate(id) => RelayError::UnknownTemplate(id),
            TemplateError::MissingVariable { kind, fields } => RelayError::MissingVariable {
                template: kind,
                fields,
            },
            TemplateError::Syntax { .. } => RelayError::Validation(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_variable_display_lists_fields() {
        let err = TemplateError::MissingVariable {
            kind: "welcome".into(),
            fields: vec!["siteName".into(), "userName".into()],
        };
        assert_eq!(
            err.to_string(),
            "Missing template variables for welcome: siteName, userName"
        );
    }

    #[test]
    fn test_converts_into_relay_error() {
        let err: RelayError = TemplateError::UnknownTemplate("bogus".into()).into();
        assert_eq!(err.error_code(), "UNKNOWN_TEMPLATE");
        assert!(!err.is_retriable());

        let err: RelayError = TemplateError::MissingVariable {
            kind: "welcome".into(),
            fields: vec!["userName".into()],
        }
        .into();
        assert_eq!(err.error_code(), "MISSING_VARIABLE");
    }
}
