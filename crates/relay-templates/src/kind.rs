//! The closed set of template kinds.

use crate::TemplateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Known email template kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateKind {
    Welcome,
    Announcement,
    EventNotification,
    EventReminder,
    RegistrationConfirmation,
    PasswordReset,
    Newsletter,
    SystemNotification,
    Digest,
}

impl TemplateKind {
    /// All kinds, in catalog order.
    pub const ALL: [TemplateKind; 9] = [
        TemplateKind::Welcome,
        TemplateKind::Announcement,
        TemplateKind::EventNotification,
        TemplateKind::EventReminder,
        TemplateKind::RegistrationConfirmation,
        TemplateKind::PasswordReset,
        TemplateKind::Newsletter,
        TemplateKind::SystemNotification,
        TemplateKind::Digest,
    ];

    /// Returns the wire identifier of this kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Welcome => "welcome",
            TemplateKind::Announcement => "announcement",
            TemplateKind::EventNotification => "event-notification",
            TemplateKind::EventReminder => "event-reminder",
            TemplateKind::RegistrationConfirmation => "registration-confirmation",
            TemplateKind::PasswordReset => "password-reset",
            TemplateKind::Newsletter => "newsletter",
            TemplateKind::SystemNotification => "system-notification",
            TemplateKind::Digest => "digest",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateKind {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TemplateKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| TemplateError::UnknownTemplate(s.to_string()))
    }
}
