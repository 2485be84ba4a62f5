//! Outbound mail transports.
//!
//! The pipeline only sees [`MailSender`]. Two transports exist:
//! - [`GmailSender`] posts raw MIME to the Gmail REST API with an OAuth2 bearer
//! - [`SmtpSender`] submits over SMTP via lettre

pub mod gmail;
pub mod smtp;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use lettre::Message;
use lettre::message::header::ContentType;

use crate::error::MailError;

pub use gmail::GmailSender;
pub use smtp::SmtpSender;

/// A plain-text mail ready to go out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutgoingMail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Something that can deliver an [`OutgoingMail`].
#[async_trait]
pub trait MailSender: Send + Sync {
    /// Transport name for logs and errors.
    fn name(&self) -> &str;

    /// Whether credentials are in place to attempt a send.
    async fn is_authenticated(&self) -> bool;

    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;

    /// Cheap reachability probe used to gate scheduled runs.
    async fn health_check(&self) -> Result<(), MailError>;
}

/// Build a UTF-8 plain-text MIME message.
pub fn build_message(from: &str, mail: &OutgoingMail) -> Result<Message, MailError> {
    let from = from.parse().map_err(|e| MailError::InvalidAddress {
        address: from.to_string(),
        reason: format!("{e}"),
    })?;
    let to = mail.to.parse().map_err(|e| MailError::InvalidAddress {
        address: mail.to.clone(),
        reason: format!("{e}"),
    })?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(mail.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(mail.body.clone())
        .map_err(|e| MailError::Build(e.to_string()))
}
