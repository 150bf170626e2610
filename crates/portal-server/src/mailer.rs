//! Outgoing email.
//!
//! Mail is always best-effort: callers log failures and carry on.  When no
//! mail API is configured, [`LogMailer`] records the message in the log
//! instead.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::config::Secret;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mail API rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

/// Send and log the outcome.  Returns whether the message went out.
pub async fn send_best_effort(mailer: &dyn Mailer, message: &EmailMessage) -> bool {
    match mailer.send(message).await {
        Ok(()) => {
            tracing::info!(to = %message.to, subject = %message.subject, "email sent");
            true
        }
        Err(e) => {
            tracing::warn!(to = %message.to, subject = %message.subject, error = %e, "email failed");
            false
        }
    }
}

/// JSON mail API client (`POST {from, to, subject, html}` with a bearer key).
pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    api_key: Option<Secret>,
    sender: String,
}

impl HttpMailer {
    pub fn new(client: reqwest::Client, url: String, api_key: Option<Secret>, sender: String) -> Self {
        Self {
            client,
            url,
            api_key,
            sender,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let mut request = self.client.post(&self.url).json(&json!({
            "from": self.sender,
            "to": [message.to],
            "subject": message.subject,
            "html": message.html,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "mail API not configured, email logged only"
        );
        Ok(())
    }
}

/// Message bodies.
pub mod templates {
    use chrono::{DateTime, Utc};

    use portal_shared::constants::APP_NAME;

    use super::EmailMessage;

    pub fn new_signup(admin: &str, email: &str, name: Option<&str>, at: DateTime<Utc>, app_url: &str) -> EmailMessage {
        EmailMessage {
            to: admin.to_string(),
            subject: format!("New {APP_NAME} User Registration"),
            html: format!(
                "<h2>New User Registration</h2>\
                 <p><strong>Email:</strong> {email}</p>\
                 <p><strong>Name:</strong> {}</p>\
                 <p><strong>Signup Date:</strong> {}</p>\
                 <p><a href=\"{app_url}/admin\">Review pending users</a></p>",
                name.unwrap_or("N/A"),
                at.to_rfc3339(),
            ),
        }
    }

    pub fn approved(to: &str, app_url: &str) -> EmailMessage {
        EmailMessage {
            to: to.to_string(),
            subject: format!("Welcome to {APP_NAME}!"),
            html: format!(
                "<h2>Your account has been approved</h2>\
                 <p>You can now sign in and subscribe to access all lesson materials.</p>\
                 <p><a href=\"{app_url}\">Open {APP_NAME}</a></p>"
            ),
        }
    }

    pub fn rejected(to: &str) -> EmailMessage {
        EmailMessage {
            to: to.to_string(),
            subject: format!("{APP_NAME} Application Update"),
            html: "<h2>Application update</h2>\
                   <p>Unfortunately we are unable to approve your account at this time. \
                   Please contact us if you have any questions.</p>"
                .to_string(),
        }
    }

    pub fn invitation(
        to: &str,
        student_first_name: &str,
        tutor_email: &str,
        link: &str,
        expires: DateTime<Utc>,
    ) -> EmailMessage {
        EmailMessage {
            to: to.to_string(),
            subject: format!("Invitation to join {student_first_name}'s learning portal"),
            html: format!(
                "<h2>You're invited!</h2>\
                 <p>{tutor_email} has invited you to follow {student_first_name}'s progress \
                 on {APP_NAME}.</p>\
                 <p><a href=\"{link}\">Accept invitation</a></p>\
                 <p>This invitation expires on {}.</p>",
                expires.format("%d %B %Y"),
            ),
        }
    }

    pub fn payment_failed(to: &str, amount_due: Option<i64>, currency: &str, invoice_url: Option<&str>) -> EmailMessage {
        let amount = amount_due
            .map(|a| format!("{:.2} {}", a as f64 / 100.0, currency.to_uppercase()))
            .unwrap_or_else(|| "your subscription".to_string());
        let link = invoice_url
            .map(|u| format!("<p><a href=\"{u}\">View invoice</a></p>"))
            .unwrap_or_default();
        EmailMessage {
            to: to.to_string(),
            subject: format!("{APP_NAME}: payment failed"),
            html: format!(
                "<h2>We couldn't take your payment</h2>\
                 <p>The payment of {amount} failed. Please update your payment method \
                 to keep access to lesson materials.</p>{link}"
            ),
        }
    }

    pub fn upcoming_invoice(to: &str, amount_due: Option<i64>, currency: &str, due: Option<DateTime<Utc>>) -> EmailMessage {
        let amount = amount_due
            .map(|a| format!("{:.2} {}", a as f64 / 100.0, currency.to_uppercase()))
            .unwrap_or_else(|| "your subscription fee".to_string());
        let when = due
            .map(|d| format!(" on {}", d.format("%d %B %Y")))
            .unwrap_or_default();
        EmailMessage {
            to: to.to_string(),
            subject: format!("{APP_NAME}: upcoming payment"),
            html: format!("<p>Your next payment of {amount} will be taken{when}.</p>"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Captures messages instead of sending them.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<EmailMessage>>,
        pub fail: bool,
    }

    impl RecordingMailer {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn subjects(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|m| m.subject.clone()).collect()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Rejected {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }
}
