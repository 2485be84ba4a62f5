//! Integration tests for the REST surface.
//!
//! Each test spins up an Axum server on a random port backed by a real
//! libSQL store and a recording mail transport, then drives it with reqwest.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use sms_to_mail::config::EmailConfig;
use sms_to_mail::error::MailError;
use sms_to_mail::ingest::Ingestor;
use sms_to_mail::mail::{MailSender, OutgoingMail};
use sms_to_mail::pipeline::processor::BatchProcessor;
use sms_to_mail::pipeline::worker::spawn_auto_forwarder;
use sms_to_mail::routes::{AppState, api_routes};
use sms_to_mail::store::{Database, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport stub that records every mail.
#[derive(Default)]
struct StubMailer {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl StubMailer {
    fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for StubMailer {
    fn name(&self) -> &str {
        "stub"
    }
    async fn is_authenticated(&self) -> bool {
        true
    }
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
    async fn health_check(&self) -> Result<(), MailError> {
        Ok(())
    }
}

struct TestServer {
    base: String,
    db: Arc<dyn Database>,
    mailer: Arc<StubMailer>,
    http: reqwest::Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

async fn start_server_with(db: Arc<dyn Database>, email: EmailConfig) -> TestServer {
    let mailer = Arc::new(StubMailer::default());
    let processor = Arc::new(BatchProcessor::new(
        Arc::clone(&db),
        Arc::clone(&mailer) as Arc<dyn MailSender>,
        email.clone(),
        "SMS to Mail",
    ));
    let (queue, _worker) = spawn_auto_forwarder(Arc::clone(&processor), 16);
    let ingestor = Arc::new(Ingestor::new(Arc::clone(&db)).with_auto_forward(queue));

    let app = api_routes(AppState {
        db: Arc::clone(&db),
        processor,
        ingestor,
        tokens: None,
        default_recipient: email.recipient_email,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        db,
        mailer,
        http: reqwest::Client::new(),
    }
}

fn configured() -> EmailConfig {
    EmailConfig {
        user_email: "me@gmail.com".into(),
        recipient_email: "inbox@example.com".into(),
    }
}

async fn start_server() -> TestServer {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    start_server_with(db, configured()).await
}

async fn post_sms(server: &TestServer, sender: &str, content: &str, ts: &str) -> (u16, Value) {
    let response = server
        .http
        .post(server.url("/api/sms"))
        .json(&json!({ "sender": sender, "content": content, "timestamp": ts }))
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn health_endpoint() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let body: Value = server
            .http
            .get(server.url("/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn sms_intake_deduplicates() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (status, body) = post_sms(&server, "BANK", "Virement reçu", "2024-03-01T10:00:00Z").await;
        assert_eq!(status, 201);
        assert_eq!(body["status"], "stored");
        let id = body["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("sms_"));

        let (status, body) = post_sms(&server, "BANK", "Virement reçu", "2024-03-01T10:00:00Z").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "duplicate");
        assert_eq!(body["id"], id.as_str());

        let list: Vec<Value> = server
            .http
            .get(server.url("/api/sms"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["sender"], "BANK");
        assert_eq!(list[0]["sent"], false);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn defaults_then_batch_process_groups_by_label() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let rules: Vec<Value> = server
            .http
            .post(server.url("/api/rules/defaults"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(rules.len(), 5);
        assert_eq!(rules[0]["label"], "Sécurité");
        assert_eq!(rules[0]["priority"], 2);

        post_sms(&server, "BANK", "Virement de 50€ reçu", "2024-03-01T10:00:00Z").await;
        post_sms(&server, "BANK", "Votre solde est bas", "2024-03-01T11:00:00Z").await;
        post_sms(&server, "Mom", "On dîne à 20h ?", "2024-03-01T12:00:00Z").await;

        let response = server
            .http
            .post(server.url("/api/process"))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let result: Value = response.json().await.unwrap();

        assert_eq!(result["total_processed"], 3);
        assert_eq!(result["grouped_by_label"]["Finance"], 2);
        assert_eq!(result["grouped_by_label"]["Non classé"], 1);
        assert_eq!(result["emails_sent"], 1);
        assert_eq!(result["errors"].as_array().unwrap().len(), 0);
        assert_eq!(result["dispatched"][0]["kind"], "combined");

        let sent = server.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "[URGENT] [Finance] 2 SMS - Banque et Finance");
        assert_eq!(sent[0].to, "inbox@example.com");

        let stats: Value = server
            .http
            .get(server.url("/api/stats"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["total_sms"], 3);
        assert_eq!(stats["sent_sms"], 2);
        assert_eq!(stats["total_rules"], 5);
        assert_eq!(stats["auto_forward_rules"], 2);
        assert!(!stats["last_processed"].is_null());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn auto_forward_on_receipt() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server
            .http
            .post(server.url("/api/rules/defaults"))
            .send()
            .await
            .unwrap();
        let response = server
            .http
            .put(server.url("/api/settings/auto"))
            .json(&json!({ "enabled": true }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);

        let (status, body) = post_sms(&server, "BANK", "Your OTP is 4821", "2024-03-01T10:00:00Z").await;
        assert_eq!(status, 201);
        let id = body["id"].as_str().unwrap().to_string();

        // The worker runs in the background; poll until it has sent.
        loop {
            if !server.mailer.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let sent = server.mailer.sent();
        assert_eq!(sent[0].subject, "[CRITIQUE] [Sécurité] SMS - Codes de vérification");

        loop {
            if server.db.get_sms(&id).await.unwrap().unwrap().sent {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rules_validation_and_replace() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let bad = server
            .http
            .put(server.url("/api/rules"))
            .json(&json!([{
                "name": "Codes",
                "keywords": ["  "],
                "label": "Sécurité",
                "recipient_email": "a@b.c",
                "enabled": true
            }]))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status().as_u16(), 400);

        let saved: Vec<Value> = server
            .http
            .put(server.url("/api/rules"))
            .json(&json!([
                {
                    "name": "Promo",
                    "keywords": ["promo"],
                    "label": "Marketing",
                    "recipient_email": "a@b.c",
                    "enabled": true
                },
                {
                    "name": "Codes",
                    "keywords": [" otp "],
                    "label": "Sécurité",
                    "recipient_email": "a@b.c",
                    "enabled": true,
                    "priority": 2,
                    "auto_forward": true
                }
            ]))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0]["name"], "Codes");
        assert_eq!(saved[0]["keywords"][0], "otp");
        assert!(saved[1]["id"].as_str().is_some_and(|id| !id.is_empty()));

        let listed: Vec<Value> = server
            .http
            .get(server.url("/api/rules"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed, saved);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn date_filter_settings_round_trip() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let inverted = server
            .http
            .put(server.url("/api/settings/date-filter"))
            .json(&json!({
                "enabled": true,
                "start_date": "2024-03-02T00:00:00Z",
                "end_date": "2024-03-01T00:00:00Z"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(inverted.status().as_u16(), 400);

        let ok = server
            .http
            .put(server.url("/api/settings/date-filter"))
            .json(&json!({ "enabled": true, "start_date": "2024-03-01T00:00:00Z" }))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status().as_u16(), 200);

        let filter: Value = server
            .http
            .get(server.url("/api/settings/date-filter"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(filter["enabled"], true);
        assert!(filter["end_date"].is_null());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unconfigured_processing_is_refused() {
    timeout(TEST_TIMEOUT, async {
        let dir = tempfile::tempdir().unwrap();
        let db: Arc<dyn Database> = Arc::new(
            LibSqlBackend::new_local(&dir.path().join("sms.db"))
                .await
                .unwrap(),
        );
        let server = start_server_with(db, EmailConfig::default()).await;

        let response = server
            .http
            .post(server.url("/api/process"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 412);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("SMS2MAIL_USER_EMAIL"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn auth_routes_without_google_config() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let status: Value = server
            .http
            .get(server.url("/api/auth/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["transport"], "stub");
        assert_eq!(status["authenticated"], true);
        assert!(status["email"].is_null());

        let response = server
            .http
            .post(server.url("/api/auth/code"))
            .json(&json!({ "code": "abc" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);
    })
    .await
    .expect("test timed out");
}
