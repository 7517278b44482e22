//! System email service for verification, password-reset and overdue
//! reminder emails, using the SMTP configuration from the main config file.

use anyhow::Result;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailConfig;

/// Seam for the overdue notifier, so the job can be tested without SMTP.
#[async_trait]
pub trait ReminderMailer: Send + Sync {
    async fn send_return_reminder(
        &self,
        to_email: &str,
        name: &str,
        book_title: &str,
        due_date: &str,
    ) -> Result<()>;
}

/// Service for sending system emails
pub struct SystemEmailService {
    config: EmailConfig,
}

impl SystemEmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Check if email sending is configured and enabled
    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    /// Send the account verification code to a freshly registered user.
    pub async fn send_verification_code(&self, to_email: &str, name: &str, code: i64) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!(
                "Email not configured, skipping verification email to {}",
                to_email
            );
            return Ok(());
        }

        let subject = "Verify your library account";
        let text_body = format!(
            "Hello {name},\n\nYour verification code is: {code}\n\nIt expires in 15 minutes. If you did not register, you can ignore this email.\n"
        );
        let html_body = render_simple_html(
            "Verify your account",
            &format!(
                "Hello {},<br><br>Your verification code is <strong>{}</strong>.<br>It expires in 15 minutes.",
                html_escape(name),
                code
            ),
        );

        self.send_email(to_email, subject, &html_body, &text_body).await
    }

    /// Send a password reset token.
    pub async fn send_password_reset(&self, to_email: &str, name: &str, reset_token: &str) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!(
                "Email not configured, skipping password reset email to {}",
                to_email
            );
            return Ok(());
        }

        let subject = "Reset your library password";
        let text_body = format!(
            "Hello {name},\n\nUse this token to reset your password: {reset_token}\n\nIt expires in 15 minutes. If you did not request a reset, ignore this email.\n"
        );
        let html_body = render_simple_html(
            "Reset your password",
            &format!(
                "Hello {},<br><br>Use this token to reset your password: <strong>{}</strong><br>It expires in 15 minutes.",
                html_escape(name),
                html_escape(reset_token)
            ),
        );

        self.send_email(to_email, subject, &html_body, &text_body).await
    }

    /// Send an email with HTML and plain text versions
    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<()> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        // Build the from mailbox with name
        let from_mailbox = format!("{} <{}>", self.config.from_name, from_address);
        let from: Mailbox = from_mailbox.parse()?;
        let to: Mailbox = to_email.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )?;

        // Build SMTP transport
        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        mailer.build().send(email).await?;

        tracing::info!(
            to = %to_email,
            subject = %subject,
            "Email sent successfully"
        );

        Ok(())
    }
}

#[async_trait]
impl ReminderMailer for SystemEmailService {
    async fn send_return_reminder(
        &self,
        to_email: &str,
        name: &str,
        book_title: &str,
        due_date: &str,
    ) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!(
                "Email not configured, skipping return reminder to {}",
                to_email
            );
            return Ok(());
        }

        let subject = "Book return reminder";
        let text_body = render_reminder_text(name, book_title, due_date);
        let html_body = render_simple_html(
            "Book return reminder",
            &format!(
                "Hello {},<br><br><strong>{}</strong> was due back on {}. Please return it to stop further fines from accruing.",
                html_escape(name),
                html_escape(book_title),
                html_escape(due_date)
            ),
        );

        self.send_email(to_email, subject, &html_body, &text_body).await
    }
}

/// Render the plain text version of the reminder email
fn render_reminder_text(name: &str, book_title: &str, due_date: &str) -> String {
    format!(
        "Hello {name},\n\n\"{book_title}\" was due back on {due_date}.\nPlease return it to stop further fines from accruing.\n\n---\nSent by your library\n"
    )
}

/// Minimal HTML wrapper shared by all system emails
fn render_simple_html(title: &str, body_html: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
</head>
<body style="font-family: -apple-system, 'Segoe UI', Roboto, Arial, sans-serif; color: #374151;">
    <div style="max-width: 560px; margin: 0 auto; padding: 24px;">
        <h2>{title}</h2>
        <p>{body_html}</p>
    </div>
</body>
</html>"#,
        title = html_escape(title),
        body_html = body_html,
    )
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
