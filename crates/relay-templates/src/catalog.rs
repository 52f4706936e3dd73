//! Built-in template catalog, one type per kind.

use crate::{EmailTemplate, TemplateKind};
use std::sync::Arc;

/// Returns one instance of every built-in template.
pub fn builtin_templates() -> Vec<Arc<dyn EmailTemplate>> {
    vec![
        Arc::new(WelcomeTemplate),
        Arc::new(AnnouncementTemplate),
        Arc::new(EventNotificationTemplate),
        Arc::new(EventReminderTemplate),
        Arc::new(RegistrationConfirmationTemplate),
        Arc::new(PasswordResetTemplate),
        Arc::new(NewsletterTemplate),
        Arc::new(SystemNotificationTemplate),
        Arc::new(DigestTemplate),
    ]
}

/// Greets a newly registered user.
#[derive(Debug, Clone, Copy, Default)]
pub struct WelcomeTemplate;

impl EmailTemplate for WelcomeTemplate {
    fn kind(&self) -> TemplateKind {
        TemplateKind::Welcome
    }

    fn required_fields(&self) -> &[&str] {
        &["userName"]
    }

    fn subject(&self) -> &str {
        "Welcome to {{siteName}}, {{userName}}!"
    }

    fn body(&self) -> &str {
        r#"<h2>Welcome, {{userName}}!</h2>
<p>Thanks for joining {{siteName}}. Your account is ready.</p>
{{#if loginUrl}}<p><a href="{{loginUrl}}" style="color:{{theme.primaryColor}};">Sign in to get started</a></p>{{else}}<p>Visit <a href="{{siteUrl}}">{{siteUrl}}</a> to get started.</p>{{/if}}"#
    }
}

/// Broadcasts a site-wide announcement.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnouncementTemplate;

impl EmailTemplate for AnnouncementTemplate {
    fn kind(&self) -> TemplateKind {
        TemplateKind::Announcement
    }

    fn required_fields(&self) -> &[&str] {
        &["title", "content"]
    }

    fn subject(&self) -> &str {
        "{{siteName}}: {{title}}"
    }

    fn body(&self) -> &str {
        r#"<h2>{{title}}</h2>
{{#if userName}}<p>Hi {{userName}},</p>{{/if}}
<p>{{content}}</p>
{{#if ctaUrl}}<p><a href="{{ctaUrl}}" style="color:{{theme.primaryColor}};">{{#if ctaText}}{{ctaText}}{{else}}Read more{{/if}}</a></p>{{/if}}"#
    }
}

/// Tells a user about a new or updated event.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventNotificationTemplate;

impl EmailTemplate for EventNotificationTemplate {
    fn kind(&self) -> TemplateKind {
        TemplateKind::EventNotification
    }

    fn required_fields(&self) -> &[&str] {
        &["userName", "event.title", "event.date"]
    }

    fn subject(&self) -> &str {
        "New event: {{event.title}}"
    }

    fn body(&self) -> &str {
        r#"<p>Hi {{userName}},</p>
<h2>{{event.title}}</h2>
<p><strong>When:</strong> {{event.date}}</p>
{{#if event.location}}<p><strong>Where:</strong> {{event.location}}</p>{{/if}}
{{#if event.description}}<p>{{event.description}}</p>{{/if}}
{{#if event.url}}<p><a href="{{event.url}}">View event details</a></p>{{/if}}"#
    }
}

/// Reminds a registrant that an event is about to start.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventReminderTemplate;

impl EmailTemplate for EventReminderTemplate {
    fn kind(&self) -> TemplateKind {
        TemplateKind::EventReminder
    }

    fn required_fields(&self) -> &[&str] {
        &["userName", "event.title", "event.startTime"]
    }

    fn subject(&self) -> &str {
        "Reminder: {{event.title}} starts soon"
    }

    fn body(&self) -> &str {
        r#"<p>Hi {{userName}},</p>
<p>{{event.title}} {{#if hoursUntil}}starts in {{hoursUntil}} hours{{else}}is starting soon{{/if}}, at {{event.startTime}}.</p>
{{#if event.location}}<p><strong>Where:</strong> {{event.location}}</p>{{/if}}
{{#if event.url}}<p><a href="{{event.url}}">Open event</a></p>{{/if}}"#
    }
}

/// Confirms a registration for an event.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistrationConfirmationTemplate;

impl EmailTemplate for RegistrationConfirmationTemplate {
    fn kind(&self) -> TemplateKind {
        TemplateKind::RegistrationConfirmation
    }

    fn required_fields(&self) -> &[&str] {
        &["userName", "event.title", "registrationId"]
    }

    fn subject(&self) -> &str {
        "You're registered for {{event.title}}"
    }

    fn body(&self) -> &str {
        r#"<p>Hi {{userName}},</p>
<p>Your registration for <strong>{{event.title}}</strong> is confirmed.</p>
<p>Confirmation number: <strong>{{registrationId}}</strong></p>
{{#if event.date}}<p><strong>When:</strong> {{event.date}}</p>{{/if}}
{{#if event.location}}<p><strong>Where:</strong> {{event.location}}</p>{{/if}}
{{#if tickets}}<ul>{{#each tickets}}<li>{{@item.type}} x {{@item.quantity}}</li>{{/each}}</ul>{{/if}}"#
    }
}

/// Delivers a password reset link.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordResetTemplate;

impl EmailTemplate for PasswordResetTemplate {
    fn kind(&self) -> TemplateKind {
        TemplateKind::PasswordReset
    }

    fn required_fields(&self) -> &[&str] {
        &["userName", "resetUrl"]
    }

    fn subject(&self) -> &str {
        "Reset your {{siteName}} password"
    }

    fn body(&self) -> &str {
        r#"<p>Hi {{userName}},</p>
<p>We received a request to reset your password.</p>
<p><a href="{{resetUrl}}" style="color:{{theme.primaryColor}};">Choose a new password</a></p>
<p>This link expires in {{#if expiresInMinutes}}{{expiresInMinutes}}{{else}}60{{/if}} minutes. If you did not ask for a reset, ignore this email.</p>"#
    }
}

/// Periodic newsletter with a list of articles.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewsletterTemplate;

impl EmailTemplate for NewsletterTemplate {
    fn kind(&self) -> TemplateKind {
        TemplateKind::Newsletter
    }

    fn required_fields(&self) -> &[&str] {
        &["title", "articles"]
    }

    fn subject(&self) -> &str {
        "{{title}}"
    }

    fn body(&self) -> &str {
        r#"<h2>{{title}}</h2>
{{#if intro}}<p>{{intro}}</p>{{/if}}
{{#each articles}}<div style="margin-bottom:16px;">
<h3>{{@item.title}}</h3>
{{#if @item.summary}}<p>{{@item.summary}}</p>{{/if}}
{{#if @item.url}}<p><a href="{{@item.url}}">Read article</a></p>{{/if}}
</div>{{/each}}
{{#if unsubscribeUrl}}<p style="font-size:12px;"><a href="{{unsubscribeUrl}}">Unsubscribe</a></p>{{/if}}"#
    }
}

/// Operational notice from the system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNotificationTemplate;

impl EmailTemplate for SystemNotificationTemplate {
    fn kind(&self) -> TemplateKind {
        TemplateKind::SystemNotification
    }

    fn required_fields(&self) -> &[&str] {
        &["title", "message"]
    }

    fn subject(&self) -> &str {
        "[{{siteName}}] {{title}}"
    }

    fn body(&self) -> &str {
        r#"<h2>{{title}}</h2>
{{#if severity}}<p><strong>Severity:</strong> {{severity}}</p>{{/if}}
<p>{{message}}</p>
{{#if actionUrl}}<p><a href="{{actionUrl}}">Take action</a></p>{{/if}}
<p style="font-size:12px;">Sent {{currentDate}}</p>"#
    }
}

/// Summary of recent activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestTemplate;

impl EmailTemplate for DigestTemplate {
    fn kind(&self) -> TemplateKind {
        TemplateKind::Digest
    }

    fn required_fields(&self) -> &[&str] {
        &["userName", "items"]
    }

    fn subject(&self) -> &str {
        "Your {{#if period}}{{period}}{{else}}weekly{{/if}} digest from {{siteName}}"
    }

    fn body(&self) -> &str {
        r#"<p>Hi {{userName}},</p>
<p>Here is what happened {{#if period}}this {{period}}{{else}}recently{{/if}}:</p>
<ol>{{#each items}}<li>{{#if @item.url}}<a href="{{@item.url}}">{{@item.title}}</a>{{else}}{{@item.title}}{{/if}}{{#if @item.summary}} - {{@item.summary}}{{/if}}</li>{{/each}}</ol>"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompiledTemplate;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_covers_every_kind_once() {
        let kinds: Vec<_> = builtin_templates().iter().map(|t| t.kind()).collect();
        let unique: HashSet<_> = kinds.iter().copied().collect();
        assert_eq!(kinds.len(), TemplateKind::ALL.len());
        assert_eq!(unique.len(), TemplateKind::ALL.len());
    }

    #[test]
    fn test_catalog_sources_compile() {
        for template in builtin_templates() {
            assert!(
                CompiledTemplate::compile(template.subject()).is_ok(),
                "subject of {}",
                template.kind()
            );
            assert!(
                CompiledTemplate::compile(template.body()).is_ok(),
                "body of {}",
                template.kind()
            );
            assert!(!template.required_fields().is_empty());
        }
    }
}
