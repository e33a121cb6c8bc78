//! Notification dispatch collaborator.
//!
//! The dispatch stage resolves `(channel, target, message)` from the store and
//! hands it to a [`Notifier`]. Email goes out over SMTP via lettre; when SMTP
//! is not configured (or for channels without a provider) the [`LogNotifier`]
//! records the dispatch instead.

use std::str::FromStr;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message as EmailMessage, SmtpTransport, Transport};
use tracing::info;

use crate::error::{ConfigError, NotifyError};

/// Delivery channel resolved from the customer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyChannel {
    Email,
    Sms,
}

impl NotifyChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }
}

impl FromStr for NotifyChannel {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            other => Err(NotifyError::UnknownChannel(other.to_string())),
        }
    }
}

/// Narrow dispatch interface used by the notification stage.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        channel: NotifyChannel,
        target: &str,
        message: &str,
    ) -> Result<(), NotifyError>;
}

/// SMTP settings for the email notifier.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl SmtpConfig {
    /// Load from `SMTP_*` variables. `None` when `SMTP_HOST` is unset; when
    /// it is set, the remaining credentials are required.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(host) = std::env::var("SMTP_HOST") else {
            return Ok(None);
        };
        if host.is_empty() {
            return Ok(None);
        }

        let require = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let port = std::env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "SMTP_PORT".to_string(),
                message: e.to_string(),
            })?;

        Ok(Some(Self {
            host,
            port,
            username: require("SMTP_USERNAME")?,
            password: require("SMTP_PASSWORD")?,
            from: require("SMTP_FROM")?,
        }))
    }
}

/// Sends email over SMTP; other channels fall back to a logged dispatch.
pub struct EmailNotifier {
    config: SmtpConfig,
}

impl EmailNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn send_email(&self, to: &str, body: &str) -> Result<(), NotifyError> {
        let send_failed = |reason: String| NotifyError::SendFailed {
            channel: "email".to_string(),
            target: to.to_string(),
            reason,
        };

        let email = EmailMessage::builder()
            .from(self.config.from.parse().map_err(|e| send_failed(format!("invalid from address: {e}")))?)
            .to(to.parse().map_err(|e| send_failed(format!("invalid to address: {e}")))?)
            .subject("About a recent purchase")
            .body(body.to_string())
            .map_err(|e| send_failed(format!("building email: {e}")))?;

        let transport = SmtpTransport::relay(&self.config.host)
            .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?
            .port(self.config.port)
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
            .build();

        transport
            .send(&email)
            .map_err(|e| send_failed(format!("SMTP send error: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(
        &self,
        channel: NotifyChannel,
        target: &str,
        message: &str,
    ) -> Result<(), NotifyError> {
        match channel {
            NotifyChannel::Email => {
                self.send_email(target, message)?;
                info!(target, "email notification sent");
                Ok(())
            }
            // No SMS provider configured; record the dispatch.
            NotifyChannel::Sms => {
                info!(target, channel = channel.as_str(), "notification dispatched (no provider)");
                Ok(())
            }
        }
    }
}

/// Records dispatches without an outbound provider. Used when SMTP is not
/// configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        channel: NotifyChannel,
        target: &str,
        message: &str,
    ) -> Result<(), NotifyError> {
        info!(
            channel = channel.as_str(),
            target,
            message,
            "notification dispatched"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_parses_known_names() {
        assert_eq!("email".parse::<NotifyChannel>().unwrap(), NotifyChannel::Email);
        assert_eq!("sms".parse::<NotifyChannel>().unwrap(), NotifyChannel::Sms);
        assert!(matches!(
            "pigeon".parse::<NotifyChannel>(),
            Err(NotifyError::UnknownChannel(_))
        ));
    }

    #[tokio::test]
    async fn log_notifier_accepts_any_channel() {
        let notifier = LogNotifier;
        notifier
            .send(NotifyChannel::Sms, "+15550100", "hello")
            .await
            .unwrap();
    }
}
