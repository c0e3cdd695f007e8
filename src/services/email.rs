//! Templated transactional email.
//!
//! Templates are rendered with handlebars in strict mode and delivered through
//! a [`Mailer`]. Request handlers use [`Notifier::dispatch`], which sends in
//! the background so a slow or failing relay never fails the request.

use std::sync::Arc;

use async_trait::async_trait;
use handlebars::Handlebars;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{Value, json};
use sqlx::PgPool;
use strum::AsRefStr;
use thiserror::Error;

use crate::config::SmtpConfig;
use crate::model::role::Role;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("no recipients")]
    NoRecipients,

    #[error("template render failed: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EmailKind {
    VacationSubmitted,
    VacationApproved,
    VacationRejected,
    CompensatorySubmitted,
    CompensatoryHoursApproved,
    CompensatoryHoursRejected,
    CompensatoryUsageApproved,
    CompensatoryUsageRejected,
    BackupCompleted,
    BackupFailed,
    TestEmail,
}

impl EmailKind {
    pub const ALL: [EmailKind; 11] = [
        EmailKind::VacationSubmitted,
        EmailKind::VacationApproved,
        EmailKind::VacationRejected,
        EmailKind::CompensatorySubmitted,
        EmailKind::CompensatoryHoursApproved,
        EmailKind::CompensatoryHoursRejected,
        EmailKind::CompensatoryUsageApproved,
        EmailKind::CompensatoryUsageRejected,
        EmailKind::BackupCompleted,
        EmailKind::BackupFailed,
        EmailKind::TestEmail,
    ];

    /// (subject, html body)
    fn source(self) -> (&'static str, &'static str) {
        match self {
            EmailKind::VacationSubmitted => (
                "New vacation request from {{employee_name}}",
                r#"<p>{{employee_name}} requested vacation from <b>{{start_date}}</b> to <b>{{end_date}}</b> ({{days}} working days).</p>
{{#if reason}}<p>Reason: {{reason}}</p>{{/if}}
<p><a href="{{app_url}}/admin/vacations">Review the request</a></p>
{{> footer}}"#,
            ),
            EmailKind::VacationApproved => (
                "Your vacation request was approved",
                r#"<p>Dear {{employee_name}},</p>
<p>Your vacation from <b>{{start_date}}</b> to <b>{{end_date}}</b> ({{days}} working days) has been approved.</p>
<p>Remaining vacation balance: {{remaining_days}} days.</p>
{{> footer}}"#,
            ),
            EmailKind::VacationRejected => (
                "Your vacation request was not approved",
                r#"<p>Dear {{employee_name}},</p>
<p>Your vacation request from <b>{{start_date}}</b> to <b>{{end_date}}</b> was not approved.</p>
{{#if reason}}<p>Reason: {{reason}}</p>{{/if}}
{{> footer}}"#,
            ),
            EmailKind::CompensatorySubmitted => (
                "New compensatory time request from {{employee_name}}",
                r#"<p>{{employee_name}} reported {{hours}} extra hours worked on <b>{{event_date}}</b>.</p>
<p>{{description}}</p>
<p><a href="{{app_url}}/admin/compensatorys">Review the request</a></p>
{{> footer}}"#,
            ),
            EmailKind::CompensatoryHoursApproved => (
                "Your extra hours were approved",
                r#"<p>Dear {{employee_name}},</p>
<p>The {{hours}} hours you worked on <b>{{event_date}}</b> were approved.</p>
<p>Compensatory balance: {{balance_hours}} hours.</p>
{{> footer}}"#,
            ),
            EmailKind::CompensatoryHoursRejected => (
                "Your extra hours were not approved",
                r#"<p>Dear {{employee_name}},</p>
<p>The {{hours}} hours reported for <b>{{event_date}}</b> were not approved.</p>
{{#if reason}}<p>Reason: {{reason}}</p>{{/if}}
{{> footer}}"#,
            ),
            EmailKind::CompensatoryUsageApproved => (
                "Your compensatory time off was approved",
                r#"<p>Dear {{employee_name}},</p>
<p>Your request to take {{hours}} compensatory hours on <b>{{usage_date}}</b> was approved.</p>
<p>Remaining compensatory balance: {{balance_hours}} hours.</p>
{{> footer}}"#,
            ),
            EmailKind::CompensatoryUsageRejected => (
                "Your compensatory time off was not approved",
                r#"<p>Dear {{employee_name}},</p>
<p>Your request to take {{hours}} compensatory hours on <b>{{usage_date}}</b> was not approved.</p>
{{#if reason}}<p>Reason: {{reason}}</p>{{/if}}
{{> footer}}"#,
            ),
            EmailKind::BackupCompleted => (
                "Backup {{backup_id}} completed",
                r#"<p>A {{trigger}} backup finished at {{created_at}}.</p>
<ul>{{#each tables}}<li>{{name}}: {{row_count}} rows</li>{{/each}}</ul>
<p>Size: {{size_kb}} KiB. Stored in: {{locations}}.</p>
{{> footer}}"#,
            ),
            EmailKind::BackupFailed => (
                "Backup failed",
                r#"<p>A {{trigger}} backup attempted at {{attempted_at}} failed.</p>
<pre>{{error}}</pre>
{{> footer}}"#,
            ),
            EmailKind::TestEmail => (
                "Embassy HR test email",
                r#"<p>This is a test message for {{recipient}} sent at {{sent_at}}.</p>
{{> footer}}"#,
            ),
        }
    }
}

const FOOTER: &str = r#"<hr><p style="color:#777;font-size:12px">Embassy HR &middot; <a href="{{app_url}}">{{app_url}}</a><br>This message was sent automatically, please do not reply.</p>"#;

/// Bodies are HTML and escaped; subjects are plain text header values and
/// are rendered verbatim.
pub struct EmailTemplates {
    bodies: Handlebars<'static>,
    subjects: Handlebars<'static>,
}

impl EmailTemplates {
    pub fn new() -> Result<Self, handlebars::TemplateError> {
        let mut bodies = Handlebars::new();
        bodies.set_strict_mode(true);
        bodies.register_partial("footer", FOOTER)?;

        let mut subjects = Handlebars::new();
        subjects.set_strict_mode(true);
        subjects.register_escape_fn(handlebars::no_escape);

        for kind in EmailKind::ALL {
            let (subject, body) = kind.source();
            subjects.register_template_string(kind.as_ref(), subject)?;
            bodies.register_template_string(kind.as_ref(), body)?;
        }

        Ok(Self { bodies, subjects })
    }

    /// Renders `(subject, html)`.
    pub fn render(&self, kind: EmailKind, ctx: &Value) -> Result<(String, String), EmailError> {
        let subject = self.subjects.render(kind.as_ref(), ctx)?;
        let body = self.bodies.render(kind.as_ref(), ctx)?;
        Ok((subject, body))
    }
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig, from: &str) -> Result<Self, EmailError> {
        let from: Mailbox = from
            .parse()
            .map_err(|_| EmailError::InvalidAddress(from.to_string()))?;

        // 465 is implicit TLS, everything else upgrades with STARTTLS
        let builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };
        let mut builder = builder.port(config.port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(email.subject.clone())
            .header(ContentType::TEXT_HTML);

        for to in &email.to {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|_| EmailError::InvalidAddress(to.clone()))?;
            builder = builder.to(mailbox);
        }

        let message = builder.body(email.html.clone())?;
        self.transport.send(message).await?;
        Ok(())
    }
}

/// Used when no SMTP relay is configured: the message is only logged.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        tracing::info!(
            to = ?email.to,
            subject = %email.subject,
            "SMTP not configured, email not delivered"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    templates: Arc<EmailTemplates>,
    app_url: String,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, templates: EmailTemplates, app_url: String) -> Self {
        Self {
            mailer,
            templates: Arc::new(templates),
            app_url,
        }
    }

    pub fn render(
        &self,
        kind: EmailKind,
        to: Vec<String>,
        mut ctx: Value,
    ) -> Result<OutgoingEmail, EmailError> {
        if to.is_empty() {
            return Err(EmailError::NoRecipients);
        }
        if let Value::Object(map) = &mut ctx {
            map.insert("app_url".to_string(), json!(self.app_url));
        }
        let (subject, html) = self.templates.render(kind, &ctx)?;
        Ok(OutgoingEmail { to, subject, html })
    }

    /// Renders and sends, waiting for the relay.
    pub async fn send_now(
        &self,
        kind: EmailKind,
        to: Vec<String>,
        ctx: Value,
    ) -> Result<(), EmailError> {
        let email = self.render(kind, to, ctx)?;
        self.mailer.send(&email).await
    }

    /// Renders now, sends in the background. Failures are logged.
    pub fn dispatch(&self, kind: EmailKind, to: Vec<String>, ctx: Value) {
        if to.is_empty() {
            tracing::debug!(kind = kind.as_ref(), "No recipients, skipping email");
            return;
        }
        let email = match self.render(kind, to, ctx) {
            Ok(email) => email,
            Err(e) => {
                tracing::error!(error = %e, kind = kind.as_ref(), "Failed to render email");
                return;
            }
        };

        let mailer = self.mailer.clone();
        actix_web::rt::spawn(async move {
            if let Err(e) = mailer.send(&email).await {
                tracing::error!(error = %e, to = ?email.to, subject = %email.subject, "Failed to send email");
            }
        });
    }
}

/// Emails of active administrators, the audience of request and backup
/// notifications.
pub async fn admin_recipients(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT email FROM users WHERE role = $1 AND is_active")
        .bind(Role::Admin.as_ref())
        .fetch_all(pool)
        .await
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Captures messages instead of delivering them.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<OutgoingEmail>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn notifier(mailer: Arc<RecordingMailer>) -> Notifier {
        Notifier::new(
            mailer,
            EmailTemplates::new().unwrap(),
            "https://hr.embassy.example".to_string(),
        )
    }

    #[test]
    fn every_template_compiles() {
        assert!(EmailTemplates::new().is_ok());
    }

    #[test]
    fn rejection_renders_reason_and_escapes_html() {
        let n = notifier(Arc::new(RecordingMailer::default()));
        let email = n
            .render(
                EmailKind::VacationRejected,
                vec!["ana@embassy.example".into()],
                json!({
                    "employee_name": "Ana",
                    "start_date": "2026-04-06",
                    "end_date": "2026-04-10",
                    "reason": "<script>x</script>",
                }),
            )
            .unwrap();
        assert_eq!(email.subject, "Your vacation request was not approved");
        assert!(email.html.contains("&lt;script&gt;"));
        assert!(email.html.contains("https://hr.embassy.example"));
    }

    #[test]
    fn subjects_are_plain_text_while_bodies_are_escaped() {
        let n = notifier(Arc::new(RecordingMailer::default()));
        let email = n
            .render(
                EmailKind::VacationSubmitted,
                vec!["admin@embassy.example".into()],
                json!({
                    "employee_name": "Ana & Luis",
                    "start_date": "2026-04-06",
                    "end_date": "2026-04-10",
                    "days": 5,
                    "reason": "Family trip",
                }),
            )
            .unwrap();
        assert_eq!(email.subject, "New vacation request from Ana & Luis");
        assert!(email.html.contains("Ana &amp; Luis requested vacation"));
    }

    #[test]
    fn missing_variables_are_errors() {
        let n = notifier(Arc::new(RecordingMailer::default()));
        let err = n.render(
            EmailKind::VacationApproved,
            vec!["ana@embassy.example".into()],
            json!({ "employee_name": "Ana" }),
        );
        assert!(matches!(err, Err(EmailError::Render(_))));
    }

    #[test]
    fn backup_report_lists_tables() {
        let n = notifier(Arc::new(RecordingMailer::default()));
        let email = n
            .render(
                EmailKind::BackupCompleted,
                vec!["admin@embassy.example".into()],
                json!({
                    "backup_id": "backup-1",
                    "trigger": "scheduled",
                    "created_at": "2026-03-01T02:00:00Z",
                    "tables": [{"name": "users", "row_count": 12}],
                    "size_kb": 4,
                    "locations": "local, cloud",
                }),
            )
            .unwrap();
        assert!(email.subject.contains("backup-1"));
        assert!(email.html.contains("users: 12 rows"));
    }

    #[test]
    fn empty_recipient_list_is_rejected() {
        let n = notifier(Arc::new(RecordingMailer::default()));
        let err = n.render(EmailKind::TestEmail, vec![], json!({}));
        assert!(matches!(err, Err(EmailError::NoRecipients)));
    }

    #[actix_web::test]
    async fn send_now_goes_through_the_mailer() {
        let mailer = Arc::new(RecordingMailer::default());
        let n = notifier(mailer.clone());
        n.send_now(
            EmailKind::TestEmail,
            vec!["admin@embassy.example".into()],
            json!({ "recipient": "admin@embassy.example", "sent_at": "now" }),
        )
        .await
        .unwrap();
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }
}
