//! Outgoing mail transport
//!
//! [`EmailProvider`] is the seam between the outbox and the mail server.
//! Production uses [`SmtpMailer`]; tests substitute a recording provider.

use async_trait::async_trait;
use helpdesk_shared::models::email_job::EmailJob;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;

use crate::config::MailSettings;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Failed to send email: {0}")]
    SendFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Provider not available: {0}")]
    ProviderNotAvailable(String),
}

/// A rendered message ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

impl From<&EmailJob> for OutgoingEmail {
    fn from(job: &EmailJob) -> Self {
        Self {
            to: job.recipient.clone(),
            subject: job.subject.clone(),
            text_body: job.text_body.clone(),
            html_body: job.html_body.clone(),
        }
    }
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError>;
}

/// SMTP delivery through lettre
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    server: String,
}

impl SmtpMailer {
    /// Port 465 uses implicit TLS, other ports STARTTLS when `use_tls` is
    /// set. Without TLS the connection is plaintext, for local relays.
    pub fn new(settings: &MailSettings) -> Result<Self, EmailError> {
        let host = settings.server.as_str();

        let mut builder = if settings.use_tls {
            let tls_params = TlsParameters::new(host.to_string()).map_err(|e| {
                EmailError::InvalidConfig(format!("TLS configuration error: {}", e))
            })?;

            if settings.port == 465 {
                AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                    .map_err(|e| EmailError::InvalidConfig(format!("SMTP relay error: {}", e)))?
                    .port(settings.port)
                    .tls(Tls::Wrapper(tls_params))
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                    .map_err(|e| EmailError::InvalidConfig(format!("SMTP relay error: {}", e)))?
                    .port(settings.port)
                    .tls(Tls::Required(tls_params))
            }
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(settings.port)
        };

        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from = settings.default_sender.parse::<Mailbox>().map_err(|e| {
            EmailError::InvalidConfig(format!("Invalid sender address: {}", e))
        })?;

        Ok(Self {
            transport: builder.build(),
            from,
            server: format!("{}:{}", host, settings.port),
        })
    }

    /// Opens a connection to the relay and says hello
    pub async fn verify_connection(&self) -> Result<(), EmailError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(EmailError::ProviderNotAvailable(format!(
                "{} refused the connection",
                self.server
            ))),
            Err(e) => Err(EmailError::ProviderNotAvailable(format!("{}: {}", self.server, e))),
        }
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message, EmailError> {
        let to = email
            .to
            .parse::<Mailbox>()
            .map_err(|e| EmailError::SendFailed(format!("Invalid recipient address: {}", e)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body.clone()),
                    ),
            )
            .map_err(|e| EmailError::SendFailed(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl EmailProvider for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let message = self.build_message(email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| EmailError::SendFailed(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(use_tls: bool, port: u16) -> MailSettings {
        MailSettings {
            server: "localhost".to_string(),
            port,
            use_tls,
            username: None,
            password: None,
            default_sender: "Helpdesk <no-reply@helpdesk.local>".to_string(),
        }
    }

    fn email(to: &str) -> OutgoingEmail {
        OutgoingEmail {
            to: to.to_string(),
            subject: "Reset Your Password".to_string(),
            text_body: "Visit the link".to_string(),
            html_body: "<p>Visit the link</p>".to_string(),
        }
    }

    #[test]
    fn test_mailer_creation_no_tls() {
        assert!(SmtpMailer::new(&settings(false, 25)).is_ok());
    }

    #[test]
    fn test_mailer_creation_with_credentials() {
        let mut settings = settings(false, 587);
        settings.username = Some("user".to_string());
        settings.password = Some("pass".to_string());
        assert!(SmtpMailer::new(&settings).is_ok());
    }

    #[test]
    fn test_invalid_sender_rejected() {
        let mut settings = settings(false, 25);
        settings.default_sender = "not an address".to_string();
        assert!(matches!(
            SmtpMailer::new(&settings),
            Err(EmailError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_message_has_both_bodies() {
        let mailer = SmtpMailer::new(&settings(false, 25)).unwrap();
        let message = mailer.build_message(&email("jdoe@acme.com")).unwrap();

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Reset Your Password"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn test_invalid_recipient_is_a_send_failure() {
        let mailer = SmtpMailer::new(&settings(false, 25)).unwrap();
        assert!(matches!(
            mailer.build_message(&email("nobody")),
            Err(EmailError::SendFailed(_))
        ));
    }
}
