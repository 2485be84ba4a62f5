//! Configuration types, built from environment variables.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default database location.
const DEFAULT_DB_PATH: &str = "./data/sms-to-mail.db";

/// Default HTTP port for the REST surface.
const DEFAULT_HTTP_PORT: u16 = 8080;

/// Which outbound transport delivers the mails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Gmail REST API with an OAuth2 bearer token.
    Gmail,
    /// Plain SMTP submission via lettre.
    Smtp,
}

impl std::str::FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" => Ok(Self::Gmail),
            "smtp" => Ok(Self::Smtp),
            other => Err(ConfigError::InvalidValue {
                key: "SMS2MAIL_TRANSPORT".into(),
                message: format!("expected 'gmail' or 'smtp', got '{other}'"),
            }),
        }
    }
}

/// Sender/recipient identity.
#[derive(Debug, Clone, Default)]
pub struct EmailConfig {
    /// Account the mails are sent from.
    pub user_email: String,
    /// Default destination, also used to seed the default rules.
    pub recipient_email: String,
}

impl EmailConfig {
    /// Both addresses must be present before anything is processed.
    pub fn is_valid(&self) -> bool {
        !self.user_email.trim().is_empty() && !self.recipient_email.trim().is_empty()
    }

    /// Name the first missing setting, if any.
    pub fn missing(&self) -> Option<&'static str> {
        if self.user_email.trim().is_empty() {
            Some("SMS2MAIL_USER_EMAIL")
        } else if self.recipient_email.trim().is_empty() {
            Some("SMS2MAIL_RECIPIENT_EMAIL")
        } else {
            None
        }
    }
}

/// Google OAuth2 client registration.
#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub redirect_uri: Option<String>,
}

impl GoogleOAuthConfig {
    fn from_env() -> Option<Self> {
        let client_id = std::env::var("GOOGLE_CLIENT_ID").ok()?;
        Some(Self {
            client_id,
            client_secret: std::env::var("GOOGLE_CLIENT_SECRET")
                .ok()
                .map(SecretString::from),
            redirect_uri: std::env::var("GOOGLE_REDIRECT_URI").ok(),
        })
    }
}

/// SMTP submission settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

impl SmtpConfig {
    fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;
        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);
        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default());
        Some(Self {
            host,
            port,
            username,
            password,
        })
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub http_port: u16,
    pub email: EmailConfig,
    pub transport: Transport,
    pub google: Option<GoogleOAuthConfig>,
    pub smtp: Option<SmtpConfig>,
    /// Shown in the footer of every forwarded mail.
    pub app_name: String,
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path =
            std::env::var("SMS2MAIL_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        let http_port = match std::env::var("SMS2MAIL_HTTP_PORT") {
            Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "SMS2MAIL_HTTP_PORT".into(),
                message: format!("{e}"),
            })?,
            Err(_) => DEFAULT_HTTP_PORT,
        };

        let email = EmailConfig {
            user_email: std::env::var("SMS2MAIL_USER_EMAIL").unwrap_or_default(),
            recipient_email: std::env::var("SMS2MAIL_RECIPIENT_EMAIL").unwrap_or_default(),
        };

        let transport = match std::env::var("SMS2MAIL_TRANSPORT") {
            Ok(raw) => raw.parse()?,
            Err(_) => Transport::Gmail,
        };

        let google = GoogleOAuthConfig::from_env();
        let smtp = SmtpConfig::from_env();

        match transport {
            Transport::Gmail if google.is_none() => {
                return Err(ConfigError::MissingRequired {
                    key: "GOOGLE_CLIENT_ID".into(),
                    hint: "Gmail delivery needs an OAuth2 client registration".into(),
                });
            }
            Transport::Smtp if smtp.is_none() => {
                return Err(ConfigError::MissingRequired {
                    key: "SMTP_HOST".into(),
                    hint: "SMTP delivery needs a submission host".into(),
                });
            }
            _ => {}
        }

        let app_name =
            std::env::var("SMS2MAIL_APP_NAME").unwrap_or_else(|_| "SMS to Mail".to_string());

        Ok(Self {
            db_path,
            http_port,
            email,
            transport,
            google,
            smtp,
            app_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_config_requires_both_addresses() {
        let mut cfg = EmailConfig::default();
        assert!(!cfg.is_valid());
        assert_eq!(cfg.missing(), Some("SMS2MAIL_USER_EMAIL"));

        cfg.user_email = "me@gmail.com".into();
        assert!(!cfg.is_valid());
        assert_eq!(cfg.missing(), Some("SMS2MAIL_RECIPIENT_EMAIL"));

        cfg.recipient_email = "   ".into();
        assert!(!cfg.is_valid());

        cfg.recipient_email = "inbox@example.com".into();
        assert!(cfg.is_valid());
        assert_eq!(cfg.missing(), None);
    }

    #[test]
    fn transport_parses_case_insensitively() {
        assert_eq!("Gmail".parse::<Transport>().unwrap(), Transport::Gmail);
        assert_eq!(" smtp ".parse::<Transport>().unwrap(), Transport::Smtp);
        assert!("carrier-pigeon".parse::<Transport>().is_err());
    }
}
