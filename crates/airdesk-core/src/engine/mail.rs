//! Mail configuration resolution and SMTP delivery.
//!
//! Resolution order: admin-entered settings first, environment variables
//! second (SMTP_HOST, SMTP_PORT, SMTP_USER, SMTP_PASSWORD, SMTP_FROM,
//! ADMIN_NOTIFY_EMAILS). Neither configured means email is skipped entirely;
//! that is an expected state, not an error.

use std::time::Duration;

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::error::MailError;
use crate::storage::MailSettings;

/// Default SMTP submission port.
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Default per-send network timeout.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// A resolved, usable mail configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    /// Credentials are optional; some relays accept unauthenticated
    /// submission from inside the network.
    pub user: Option<String>,
    pub password: Option<String>,
    pub sender: String,
}

/// Environment-level mail configuration, captured once per delivery run.
#[derive(Debug, Clone, Default)]
pub struct EnvMailConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub sender: Option<String>,
    /// Comma-separated fallback recipient list.
    pub notify_emails: Option<String>,
}

fn non_empty(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl EnvMailConfig {
    /// Capture the SMTP_* environment variables.
    pub fn from_env() -> Self {
        Self {
            host: non_empty("SMTP_HOST"),
            port: non_empty("SMTP_PORT").and_then(|p| p.parse().ok()),
            user: non_empty("SMTP_USER"),
            password: non_empty("SMTP_PASSWORD"),
            sender: non_empty("SMTP_FROM"),
            notify_emails: non_empty("ADMIN_NOTIFY_EMAILS"),
        }
    }
}

/// Resolve the mail configuration: settings override environment.
///
/// Returns `None` when no usable transport is configured anywhere; the
/// caller then skips the email channel without treating it as a failure.
pub fn resolve_mail_config(
    settings: Option<&MailSettings>,
    env: &EnvMailConfig,
) -> Option<MailConfig> {
    if let Some(mail) = settings {
        if !mail.host.trim().is_empty() {
            let user = Some(mail.user.trim().to_string()).filter(|u| !u.is_empty());
            let sender = Some(mail.sender.trim().to_string())
                .filter(|s| !s.is_empty())
                .or_else(|| user.clone())?;
            return Some(MailConfig {
                host: mail.host.trim().to_string(),
                port: mail.port,
                password: Some(mail.password.trim().to_string()).filter(|p| !p.is_empty()),
                user,
                sender,
            });
        }
    }

    let host = env.host.clone()?;
    let sender = env.sender.clone().or_else(|| env.user.clone())?;
    Some(MailConfig {
        host,
        port: env.port.unwrap_or(DEFAULT_SMTP_PORT),
        user: env.user.clone(),
        password: env.password.clone(),
        sender,
    })
}

/// Resolve the recipient list: configured recipients, else the environment
/// fallback list.
pub fn resolve_recipients(configured: &[String], env: &EnvMailConfig) -> Vec<String> {
    if !configured.is_empty() {
        return configured.to_vec();
    }
    env.notify_emails
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// One outbound mail channel. The dispatcher only sees this trait, so tests
/// substitute a recording implementation.
pub trait MailTransport {
    /// Deliver one message to one recipient.
    ///
    /// # Errors
    /// Returns an error if the address is invalid or the send fails; the
    /// caller logs it and continues with the remaining recipients.
    fn send(
        &self,
        config: &MailConfig,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), MailError>;
}

/// SMTP transport with STARTTLS and a bounded timeout.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SmtpMailer {
    fn default() -> Self {
        Self::new(SEND_TIMEOUT)
    }
}

impl MailTransport for SmtpMailer {
    fn send(
        &self,
        config: &MailConfig,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        let from: Mailbox = config
            .sender
            .parse()
            .map_err(|_| MailError::InvalidAddress(config.sender.clone()))?;
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|_| MailError::InvalidAddress(to.to_string()))?;

        let message = Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let mut builder = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(config.port)
            .timeout(Some(self.timeout));
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        builder
            .build()
            .send(&message)
            .map(|_| ())
            .map_err(|e| MailError::SendFailed {
                recipient: to.to_string(),
                reason: e.to_string(),
            })
    }
}
