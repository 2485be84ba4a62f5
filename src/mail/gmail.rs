//! Gmail REST API transport.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::auth::TokenManager;
use crate::error::MailError;
use crate::mail::{MailSender, OutgoingMail, build_message};

/// Base URL of the signed-in user's Gmail resources.
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

const TRANSPORT: &str = "gmail";

/// Sends through `users.messages.send` as the signed-in account.
pub struct GmailSender {
    tokens: Arc<TokenManager>,
    from: String,
    api_base: String,
    http: reqwest::Client,
}

impl GmailSender {
    pub fn new(tokens: Arc<TokenManager>, from: impl Into<String>) -> Self {
        Self {
            tokens,
            from: from.into(),
            api_base: GMAIL_API_BASE.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn transport_err(e: reqwest::Error) -> MailError {
        MailError::Transport {
            transport: TRANSPORT.into(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl MailSender for GmailSender {
    fn name(&self) -> &str {
        TRANSPORT
    }

    async fn is_authenticated(&self) -> bool {
        self.tokens.is_signed_in().await.unwrap_or(false)
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let access = self.tokens.valid_access_token().await?;
        let message = build_message(&self.from, mail)?;
        let raw = URL_SAFE.encode(message.formatted());

        let response = self
            .http
            .post(format!("{}/messages/send", self.api_base))
            .bearer_auth(access.expose_secret())
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await
            .map_err(Self::transport_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(to = %mail.to, subject = %mail.subject, "Mail sent via Gmail API");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), MailError> {
        let access = self.tokens.valid_access_token().await?;
        let response = self
            .http
            .get(format!("{}/profile", self.api_base))
            .bearer_auth(access.expose_secret())
            .send()
            .await
            .map_err(Self::transport_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Gmail API reachable");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::{Json, Router, extract::State, routing::{get, post}};
    use chrono::{Duration, Utc};
    use tokio::sync::Mutex;

    use super::*;
    use crate::auth::Token;
    use crate::config::GoogleOAuthConfig;
    use crate::store::{Database, LibSqlBackend};

    type Captured = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    async fn start_gmail(captured: Captured) -> String {
        async fn send(
            State(captured): State<Captured>,
            headers: axum::http::HeaderMap,
            Json(body): Json<serde_json::Value>,
        ) -> (StatusCode, Json<serde_json::Value>) {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let reject = body["raw"].as_str().is_none();
            captured.lock().await.push((auth, body));
            if reject {
                (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "no raw"})))
            } else {
                (StatusCode::OK, Json(serde_json::json!({"id": "msg-1"})))
            }
        }

        let app = Router::new()
            .route("/messages/send", post(send))
            .route(
                "/profile",
                get(|| async { Json(serde_json::json!({"emailAddress": "me@gmail.com"})) }),
            )
            .with_state(captured);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn tokens(signed_in: bool) -> Arc<TokenManager> {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        if signed_in {
            let token = Token::new("access-xyz").with_expires_at(Utc::now() + Duration::hours(1));
            db.set_token(&token.to_record()).await.unwrap();
        }
        let config = GoogleOAuthConfig {
            client_id: "client".into(),
            client_secret: None,
            redirect_uri: None,
        };
        Arc::new(TokenManager::new(config, db))
    }

    #[tokio::test]
    async fn send_posts_base64url_raw_with_bearer() {
        let captured = Captured::default();
        let base = start_gmail(captured.clone()).await;
        let sender = GmailSender::new(tokens(true).await, "me@gmail.com").with_api_base(base);

        assert!(sender.is_authenticated().await);
        sender
            .send(&OutgoingMail::new("inbox@example.com", "Hello", "Plain body"))
            .await
            .unwrap();

        let calls = captured.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.as_deref(), Some("Bearer access-xyz"));
        let raw = calls[0].1["raw"].as_str().unwrap();
        let decoded = String::from_utf8(URL_SAFE.decode(raw).unwrap()).unwrap();
        assert!(decoded.contains("To: inbox@example.com"));
        assert!(decoded.contains("Subject: Hello"));
        assert!(decoded.contains("Plain body"));
    }

    #[tokio::test]
    async fn send_without_sign_in_fails_before_http() {
        let captured = Captured::default();
        let base = start_gmail(captured.clone()).await;
        let sender = GmailSender::new(tokens(false).await, "me@gmail.com").with_api_base(base);

        assert!(!sender.is_authenticated().await);
        let err = sender
            .send(&OutgoingMail::new("inbox@example.com", "Hello", "Body"))
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Auth(_)));
        assert!(captured.lock().await.is_empty());
    }

    #[tokio::test]
    async fn health_check_hits_profile() {
        let base = start_gmail(Captured::default()).await;
        let sender = GmailSender::new(tokens(true).await, "me@gmail.com").with_api_base(base);
        sender.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_api_is_transport_error() {
        let sender = GmailSender::new(tokens(true).await, "me@gmail.com")
            .with_api_base("http://127.0.0.1:1");
        let err = sender.health_check().await.unwrap_err();
        assert!(matches!(err, MailError::Transport { .. }));
    }
}
