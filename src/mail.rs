//! Outgoing account mail.
//!
//! The identity flow hands a fully described [`ActivationMail`] to a
//! [`MailSender`]; rendering happens on the other side of the boundary.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::config::MailSettings;

/// Template used for account activation mails.
pub const ACTIVATION_TEMPLATE: &str = "auth.emails.activation";

/// Recipient data exposed to mail templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// An activation mail ready to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationMail {
    pub to_address: String,
    pub to_name: String,
    pub template: &'static str,
    pub subject: String,
    pub user: MailUser,
    pub activation_token: String,
    pub activation_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail transport failed: {0}")]
    Transport(String),
    #[error("mail API rejected the message with status {0}")]
    Rejected(u16),
    #[error("mail API did not answer in time")]
    Timeout,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: &ActivationMail) -> Result<(), MailError>;
}

/// Sender that only writes the dispatch to the log. Used when no mail API is configured.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, mail: &ActivationMail) -> Result<(), MailError> {
        tracing::info!(
            to = %mail.to_address,
            template = mail.template,
            url = %mail.activation_url,
            "Activation mail generated (no mail API configured)"
        );
        Ok(())
    }
}

/// Sender posting messages to an HTTP mail API as JSON.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from: String,
}

#[derive(Serialize)]
struct MailRequest<'a> {
    from: &'a str,
    to: Recipient<'a>,
    subject: &'a str,
    template: &'a str,
    variables: Variables<'a>,
}

#[derive(Serialize)]
struct Recipient<'a> {
    address: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
struct Variables<'a> {
    user: &'a MailUser,
    activation_token: &'a str,
    activation_url: &'a str,
}

impl HttpMailer {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: String, api_key: Option<String>, from: String) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            api_url,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl MailSender for HttpMailer {
    async fn send(&self, mail: &ActivationMail) -> Result<(), MailError> {
        let body = MailRequest {
            from: &self.from,
            to: Recipient {
                address: &mail.to_address,
                name: &mail.to_name,
            },
            subject: &mail.subject,
            template: mail.template,
            variables: Variables {
                user: &mail.user,
                activation_token: &mail.activation_token,
                activation_url: &mail.activation_url,
            },
        };

        let mut request = self.http.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                MailError::Timeout
            } else {
                MailError::Transport(e.to_string())
            }
        })?;

        if !resp.status().is_success() {
            return Err(MailError::Rejected(resp.status().as_u16()));
        }

        tracing::info!(to = %mail.to_address, template = mail.template, "Activation mail dispatched");
        Ok(())
    }
}

/// Pick the mail sender described by the settings.
///
/// # Errors
///
/// Returns an error if the HTTP mailer cannot be built.
pub fn from_settings(settings: &MailSettings) -> anyhow::Result<std::sync::Arc<dyn MailSender>> {
    Ok(match &settings.api_url {
        Some(url) => std::sync::Arc::new(HttpMailer::new(
            url.clone(),
            settings.api_key.clone(),
            settings.from.clone(),
        )?),
        None => std::sync::Arc::new(LogMailer),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail() -> ActivationMail {
        ActivationMail {
            to_address: "alice@example.com".to_string(),
            to_name: "alice".to_string(),
            template: ACTIVATION_TEMPLATE,
            subject: "Account activation".to_string(),
            user: MailUser {
                id: Uuid::nil(),
                name: "alice".to_string(),
                email: "alice@example.com".to_string(),
            },
            activation_token: "t".repeat(64),
            activation_url: "https://community.test/auth/activation/t".to_string(),
        }
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        assert!(LogMailer.send(&mail()).await.is_ok());
    }

    #[tokio::test]
    async fn http_mailer_reports_transport_errors() {
        let mailer = HttpMailer::new(
            "http://127.0.0.1:9/mail".to_string(),
            None,
            "no-reply@community.test".to_string(),
        );
        let Ok(mailer) = mailer else {
            return;
        };
        let result = mailer.send(&mail()).await;
        assert!(matches!(result, Err(MailError::Transport(_) | MailError::Timeout)));
    }

    #[test]
    fn request_body_carries_user_and_token() {
        let mail = mail();
        let body = MailRequest {
            from: "no-reply@community.test",
            to: Recipient {
                address: &mail.to_address,
                name: &mail.to_name,
            },
            subject: &mail.subject,
            template: mail.template,
            variables: Variables {
                user: &mail.user,
                activation_token: &mail.activation_token,
                activation_url: &mail.activation_url,
            },
        };
        let json = serde_json::to_value(&body).unwrap_or_default();
        assert_eq!(json["to"]["address"], "alice@example.com");
        assert_eq!(json["variables"]["user"]["name"], "alice");
        assert_eq!(json["variables"]["activation_token"], "t".repeat(64));
        assert_eq!(json["template"], ACTIVATION_TEMPLATE);
    }
}
