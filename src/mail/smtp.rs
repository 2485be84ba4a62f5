//! SMTP transport via lettre.
//!
//! Authenticates with the configured password, or with XOAUTH2 using the
//! Google access token when no password is set.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use crate::auth::TokenManager;
use crate::config::SmtpConfig;
use crate::error::MailError;
use crate::mail::{MailSender, OutgoingMail, build_message};

const TRANSPORT: &str = "smtp";

pub struct SmtpSender {
    config: SmtpConfig,
    from: String,
    tokens: Option<Arc<TokenManager>>,
}

impl SmtpSender {
    pub fn new(config: SmtpConfig, from: impl Into<String>) -> Self {
        Self {
            config,
            from: from.into(),
            tokens: None,
        }
    }

    /// Use XOAUTH2 with this account's token when no password is configured.
    pub fn with_oauth(mut self, tokens: Arc<TokenManager>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    fn has_password(&self) -> bool {
        !self.config.password.expose_secret().is_empty()
    }

    fn transport_err(reason: impl std::fmt::Display) -> MailError {
        MailError::Transport {
            transport: TRANSPORT.into(),
            reason: reason.to_string(),
        }
    }

    async fn transport(&self) -> Result<SmtpTransport, MailError> {
        let builder = SmtpTransport::relay(&self.config.host)
            .map_err(|e| Self::transport_err(format!("SMTP relay error: {e}")))?
            .port(self.config.port);

        let builder = if self.has_password() {
            builder.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.expose_secret().to_string(),
            ))
        } else if let Some(tokens) = &self.tokens {
            let access = tokens.valid_access_token().await?;
            builder
                .credentials(Credentials::new(
                    self.config.username.clone(),
                    access.expose_secret().to_string(),
                ))
                .authentication(vec![Mechanism::Xoauth2])
        } else {
            builder
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl MailSender for SmtpSender {
    fn name(&self) -> &str {
        TRANSPORT
    }

    async fn is_authenticated(&self) -> bool {
        if self.has_password() {
            return true;
        }
        match &self.tokens {
            Some(tokens) => tokens.is_signed_in().await.unwrap_or(false),
            None => false,
        }
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let message = build_message(&self.from, mail)?;
        let transport = self.transport().await?;

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(Self::transport_err)?
            .map_err(|e| Self::transport_err(format!("SMTP send failed: {e}")))?;

        info!(to = %mail.to, subject = %mail.subject, "Mail sent via SMTP");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), MailError> {
        let transport = self.transport().await?;
        let reachable = tokio::task::spawn_blocking(move || transport.test_connection())
            .await
            .map_err(Self::transport_err)?
            .map_err(|e| Self::transport_err(format!("SMTP connection failed: {e}")))?;
        if reachable {
            Ok(())
        } else {
            Err(Self::transport_err("SMTP server did not accept NOOP"))
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn config(password: &str) -> SmtpConfig {
        SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            username: "me@example.com".into(),
            password: SecretString::from(password.to_string()),
        }
    }

    #[tokio::test]
    async fn password_means_authenticated() {
        assert!(SmtpSender::new(config("pw"), "me@example.com").is_authenticated().await);
        assert!(!SmtpSender::new(config(""), "me@example.com").is_authenticated().await);
    }

    #[tokio::test]
    async fn invalid_sender_address_fails_before_connecting() {
        let sender = SmtpSender::new(config("pw"), "not an address");
        let err = sender
            .send(&OutgoingMail::new("inbox@example.com", "s", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::InvalidAddress { .. }));
    }
}
