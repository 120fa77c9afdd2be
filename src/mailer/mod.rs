//! Outgoing email. The sweep and the test endpoints only see the [`Mailer`]
//! trait; [`SmtpMailer`] is the production transport.

pub mod templates;

use std::fmt;

use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::config::SmtpConfig;

pub use templates::EmailTemplates;

/// Delivery id returned when SMTP credentials are not configured.
pub const SKIPPED_NO_CREDENTIALS: &str = "skipped-no-credentials";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address '{address}': {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("could not build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("mail service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeliveryId(pub String);

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailerStatus {
    pub configured: bool,
    pub has_transport: bool,
    pub has_credentials: bool,
    pub email_user: String,
    pub service: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<DeliveryId, MailError>;

    fn status(&self) -> MailerStatus;
}

pub struct SmtpMailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    sender: Option<Mailbox>,
    host: String,
}

fn parse_address(address: &str) -> Result<Address, MailError> {
    address.trim().parse().map_err(|source| MailError::Address {
        address: address.to_string(),
        source,
    })
}

impl SmtpMailer {
    /// Builds the STARTTLS transport. Without credentials the mailer stays
    /// usable but every send is skipped.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, MailError> {
        let (Some(user), Some(password)) = (&config.username, &config.password) else {
            warn!("Email credentials missing; notification emails will be skipped");
            return Ok(Self {
                transport: None,
                sender: None,
                host: config.host.clone(),
            });
        };

        let sender = Mailbox::new(Some(config.from_name.clone()), parse_address(user)?);
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(Credentials::new(user.clone(), password.clone()))
            .build();

        Ok(Self {
            transport: Some(transport),
            sender: Some(sender),
            host: config.host.clone(),
        })
    }

    /// Checks that the SMTP server accepts our connection. Only logs.
    pub async fn verify(&self) {
        let Some(transport) = &self.transport else {
            return;
        };
        match transport.test_connection().await {
            Ok(true) => info!("Email service is ready to send messages"),
            Ok(false) => warn!("Email service did not accept the test connection"),
            Err(e) => warn!("Email service configuration error: {}", e),
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<DeliveryId, MailError> {
        let (Some(transport), Some(sender)) = (&self.transport, &self.sender) else {
            warn!("Email credentials missing - skipping email to {}", email.to);
            return Ok(DeliveryId(SKIPPED_NO_CREDENTIALS.to_string()));
        };

        let message = Message::builder()
            .from(sender.clone())
            .to(Mailbox::new(None, parse_address(&email.to)?))
            .subject(email.subject)
            .multipart(MultiPart::alternative_plain_html(email.text, email.html))?;

        let response = transport.send(message).await?;
        let id = response
            .message()
            .next()
            .map(str::to_string)
            .unwrap_or_else(|| response.code().to_string());
        info!("Email sent successfully: {}", id);
        Ok(DeliveryId(id))
    }

    fn status(&self) -> MailerStatus {
        let has_credentials = self.sender.is_some();
        MailerStatus {
            configured: self.transport.is_some() && has_credentials,
            has_transport: self.transport.is_some(),
            has_credentials,
            email_user: self
                .sender
                .as_ref()
                .map(|m| m.email.to_string())
                .unwrap_or_else(|| "Not configured".to_string()),
            service: format!("SMTP ({})", self.host),
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording mailer for tests.

    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<OutgoingEmail>>,
        failing_recipients: Mutex<HashSet<String>>,
    }

    impl RecordingMailer {
        pub fn fail_for(&self, recipient: &str) {
            self.failing_recipients
                .lock()
                .unwrap()
                .insert(recipient.to_string());
        }

        pub fn heal(&self) {
            self.failing_recipients.lock().unwrap().clear();
        }

        pub fn sent(&self) -> Vec<OutgoingEmail> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_to(&self, recipient: &str) -> usize {
            self.sent.lock().unwrap().iter().filter(|e| e.to == recipient).count()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: OutgoingEmail) -> Result<DeliveryId, MailError> {
            if self.failing_recipients.lock().unwrap().contains(&email.to) {
                return Err(MailError::Unavailable(format!("rejected {}", email.to)));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(email);
            Ok(DeliveryId(format!("test-{}", sent.len())))
        }

        fn status(&self) -> MailerStatus {
            MailerStatus {
                configured: true,
                has_transport: true,
                has_credentials: true,
                email_user: "test@localhost".into(),
                service: "recording".into(),
            }
        }
    }
}
