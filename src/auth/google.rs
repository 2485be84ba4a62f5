//! Google OAuth2 sign-in: code exchange, refresh and token persistence.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::token::{ErrorResponse, Token, TokenResponse};
use crate::config::GoogleOAuthConfig;
use crate::error::AuthError;
use crate::store::Database;

/// Scopes requested at sign-in.
pub const SCOPES: &[&str] = &[
    "openid",
    "email",
    "profile",
    "https://www.googleapis.com/auth/gmail.send",
];

/// Google endpoints. Overridable so tests can point at a local server.
#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".into(),
        }
    }
}

#[derive(serde::Deserialize)]
struct UserInfo {
    email: Option<String>,
}

/// Owns the signed-in account's token: loads it from the store, refreshes it
/// when close to expiry and writes every new token back.
pub struct TokenManager {
    config: GoogleOAuthConfig,
    endpoints: GoogleEndpoints,
    db: Arc<dyn Database>,
    http: reqwest::Client,
    /// Serialises refreshes and caches the current token.
    current: Mutex<Option<Token>>,
}

impl TokenManager {
    pub fn new(config: GoogleOAuthConfig, db: Arc<dyn Database>) -> Self {
        Self {
            config,
            endpoints: GoogleEndpoints::default(),
            db,
            http: reqwest::Client::new(),
            current: Mutex::new(None),
        }
    }

    pub fn with_endpoints(mut self, endpoints: GoogleEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Consent URL the user opens to grant access.
    pub fn authorization_url(&self, state: Option<&str>) -> Result<String, AuthError> {
        let scope = SCOPES.join(" ");
        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ];
        if let Some(uri) = &self.config.redirect_uri {
            params.push(("redirect_uri", uri.as_str()));
        }
        if let Some(state) = state {
            params.push(("state", state));
        }
        let url = reqwest::Url::parse_with_params(&self.endpoints.auth_url, &params)
            .map_err(|e| AuthError::Request(format!("invalid auth url: {e}")))?;
        Ok(url.to_string())
    }

    /// Exchange an authorization code and persist the resulting token.
    pub async fn exchange_code(&self, code: &str) -> Result<Token, AuthError> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("client_id", self.config.client_id.as_str());
        if let Some(uri) = &self.config.redirect_uri {
            params.insert("redirect_uri", uri.as_str());
        }
        if let Some(secret) = &self.config.client_secret {
            params.insert("client_secret", secret.expose_secret());
        }

        let mut token = self.request_token(&params).await?;
        token.email = self.fetch_email(&token).await;

        let mut current = self.current.lock().await;
        self.db.set_token(&token.to_record()).await?;
        info!(email = ?token.email, "Google account signed in");
        *current = Some(token.clone());
        Ok(token)
    }

    /// A usable access token, refreshing first if it is about to expire.
    pub async fn valid_access_token(&self) -> Result<SecretString, AuthError> {
        let mut current = self.current.lock().await;
        let token = self.load(&mut current).await?.ok_or(AuthError::NotSignedIn)?;
        if !token.is_expired() {
            return Ok(token.access_token);
        }

        debug!("Access token expired, refreshing");
        let refreshed = self.refresh_with(&token).await?;
        let access = refreshed.access_token.clone();
        *current = Some(refreshed);
        Ok(access)
    }

    pub async fn is_signed_in(&self) -> Result<bool, AuthError> {
        let mut current = self.current.lock().await;
        Ok(self.load(&mut current).await?.is_some())
    }

    /// Email of the signed-in account, if known.
    pub async fn account_email(&self) -> Result<Option<String>, AuthError> {
        let mut current = self.current.lock().await;
        Ok(self.load(&mut current).await?.and_then(|t| t.email))
    }

    /// Forget the stored token.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let mut current = self.current.lock().await;
        self.db.clear_token().await?;
        *current = None;
        info!("Google account signed out");
        Ok(())
    }

    async fn load(&self, current: &mut Option<Token>) -> Result<Option<Token>, AuthError> {
        if current.is_none() {
            *current = self.db.get_token().await?.map(Token::from);
        }
        Ok(current.clone())
    }

    async fn refresh_with(&self, token: &Token) -> Result<Token, AuthError> {
        let refresh_token = token.refresh_token()?;

        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", self.config.client_id.as_str());
        if let Some(secret) = &self.config.client_secret {
            params.insert("client_secret", secret.expose_secret());
        }

        let mut refreshed = self.request_token(&params).await?;
        // Google usually omits the refresh token on refresh.
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token.clone_from(&token.refresh_token);
        }
        refreshed.email.clone_from(&token.email);

        self.db.set_token(&refreshed.to_record()).await?;
        debug!(expires_at = ?refreshed.expires_at, "Access token refreshed");
        Ok(refreshed)
    }

    async fn request_token(&self, params: &HashMap<&str, &str>) -> Result<Token, AuthError> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.to_string())
                .unwrap_or(body);
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        Token::from_response(parsed, Utc::now())
    }

    async fn fetch_email(&self, token: &Token) -> Option<String> {
        let result = self
            .http
            .get(&self.endpoints.userinfo_url)
            .bearer_auth(token.access_token.expose_secret())
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(response) => match response.json::<UserInfo>().await {
                Ok(info) => info.email,
                Err(e) => {
                    warn!(error = %e, "Unreadable userinfo response");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Failed to fetch account email");
                None
            }
        }
    }
}
