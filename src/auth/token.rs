//! OAuth2 token types.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Tokens are treated as expired this long before their real expiry.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// In-memory access/refresh token pair.
#[derive(Debug, Clone)]
pub struct Token {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    /// Account the token was issued for, when known.
    pub email: Option<String>,
}

impl Token {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            expires_at: None,
            scope: None,
            email: None,
        }
    }

    /// Build a token from a token endpoint response, relative to `now`.
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Result<Self, AuthError> {
        if response.access_token.is_empty() {
            return Err(AuthError::InvalidResponse("empty access_token".into()));
        }
        Ok(Self {
            access_token: SecretString::from(response.access_token),
            refresh_token: response.refresh_token.map(SecretString::from),
            expires_at: response
                .expires_in
                .map(|secs| now + Duration::seconds(i64::from(secs))),
            scope: response.scope,
            email: None,
        })
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::from(refresh_token.into()));
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Expired, or within [`EXPIRY_SKEW_SECS`] of expiring, at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|exp| now + Duration::seconds(EXPIRY_SKEW_SECS) >= exp)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn refresh_token(&self) -> Result<&str, AuthError> {
        self.refresh_token
            .as_ref()
            .map(|t| t.expose_secret())
            .ok_or(AuthError::NoRefreshToken)
    }

    pub fn to_record(&self) -> TokenRecord {
        TokenRecord {
            access_token: self.access_token.expose_secret().to_string(),
            refresh_token: self
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
            expires_at: self.expires_at,
            scope: self.scope.clone(),
            email: self.email.clone(),
        }
    }
}

impl From<TokenRecord> for Token {
    fn from(record: TokenRecord) -> Self {
        Self {
            access_token: SecretString::from(record.access_token),
            refresh_token: record.refresh_token.map(SecretString::from),
            expires_at: record.expires_at,
            scope: record.scope,
            email: record.email,
        }
    }
}

/// Persisted form of a [`Token`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("email", &self.email)
            .finish()
    }
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u32>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Error body returned by the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {desc}", self.error),
            None => f.write_str(&self.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn token_without_expiry_never_expires() {
        assert!(!Token::new("a").is_expired_at(now()));
    }

    #[test]
    fn expiry_uses_skew() {
        let token = Token::new("a").with_expires_at(now() + Duration::seconds(30));
        assert!(token.is_expired_at(now()));

        let token = Token::new("a").with_expires_at(now() + Duration::seconds(3600));
        assert!(!token.is_expired_at(now()));
    }

    #[test]
    fn from_response_computes_expiry() {
        let response: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "ya29.abc",
            "expires_in": 3599,
            "token_type": "Bearer",
            "scope": "openid email"
        }))
        .unwrap();
        let token = Token::from_response(response, now()).unwrap();
        assert_eq!(token.access_token.expose_secret(), "ya29.abc");
        assert_eq!(token.expires_at, Some(now() + Duration::seconds(3599)));
        assert!(matches!(token.refresh_token(), Err(AuthError::NoRefreshToken)));
    }

    #[test]
    fn empty_access_token_is_rejected() {
        let response: TokenResponse =
            serde_json::from_value(serde_json::json!({"access_token": ""})).unwrap();
        assert!(Token::from_response(response, now()).is_err());
    }

    #[test]
    fn record_round_trip_keeps_secrets() {
        let token = Token::new("access")
            .with_refresh_token("refresh")
            .with_expires_at(now());
        let back = Token::from(token.to_record());
        assert_eq!(back.access_token.expose_secret(), "access");
        assert_eq!(back.refresh_token().unwrap(), "refresh");
        assert_eq!(back.expires_at, Some(now()));
    }

    #[test]
    fn record_debug_is_redacted() {
        let record = Token::new("very-secret").with_refresh_token("also-secret").to_record();
        let debug = format!("{record:?}");
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("also-secret"));
    }
}
