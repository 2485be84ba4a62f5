use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tower_http::cors::CorsLayer;

use sms_to_mail::auth::TokenManager;
use sms_to_mail::config::{AppConfig, Transport};
use sms_to_mail::ingest::Ingestor;
use sms_to_mail::mail::{GmailSender, MailSender, SmtpSender};
use sms_to_mail::pipeline::processor::BatchProcessor;
use sms_to_mail::pipeline::worker::{
    AUTO_FORWARD_QUEUE_CAPACITY, spawn_auto_forwarder, spawn_batch_scheduler,
};
use sms_to_mail::routes::{AppState, api_routes};
use sms_to_mail::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    eprintln!("📱 SMS to Mail v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Transport: {:?}", config.transport);
    eprintln!("   API: http://0.0.0.0:{}/api", config.http_port);
    if let Some(missing) = config.email.missing() {
        eprintln!("   Warning: {missing} not set, processing is disabled until configured");
    }

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&config.db_path))
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path))?,
    );
    eprintln!("   Database: {}", config.db_path);

    if !config.email.recipient_email.trim().is_empty()
        && db
            .initialize_default_rules(&config.email.recipient_email)
            .await?
    {
        eprintln!("   Rules: seeded defaults");
    }

    // ── Mail transport ───────────────────────────────────────────────────
    let tokens = config
        .google
        .clone()
        .map(|google| Arc::new(TokenManager::new(google, Arc::clone(&db))));

    let mailer: Arc<dyn MailSender> = match config.transport {
        Transport::Gmail => {
            let tokens = tokens
                .clone()
                .context("Gmail transport needs GOOGLE_CLIENT_ID")?;
            Arc::new(GmailSender::new(tokens, config.email.user_email.clone()))
        }
        Transport::Smtp => {
            let smtp = config
                .smtp
                .clone()
                .context("SMTP transport needs SMTP_HOST")?;
            let sender = SmtpSender::new(smtp, config.email.user_email.clone());
            match &tokens {
                Some(tokens) => Arc::new(sender.with_oauth(Arc::clone(tokens))),
                None => Arc::new(sender),
            }
        }
    };

    // ── Pipeline ─────────────────────────────────────────────────────────
    let processor = Arc::new(BatchProcessor::new(
        Arc::clone(&db),
        mailer,
        config.email.clone(),
        config.app_name.clone(),
    ));

    let (auto_forward, auto_forward_handle) =
        spawn_auto_forwarder(Arc::clone(&processor), AUTO_FORWARD_QUEUE_CAPACITY);
    let (scheduler_handle, scheduler_shutdown) =
        spawn_batch_scheduler(Arc::clone(&db), Arc::clone(&processor));

    let ingestor = Arc::new(Ingestor::new(Arc::clone(&db)).with_auto_forward(auto_forward));

    // ── HTTP ─────────────────────────────────────────────────────────────
    let state = AppState {
        db: Arc::clone(&db),
        processor,
        ingestor,
        tokens,
        default_recipient: config.email.recipient_email.clone(),
    };
    let app = api_routes(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown requested");
        })
        .await?;

    // The router (and with it the last queue sender) is gone; let the worker drain.
    scheduler_shutdown.store(true, Ordering::Relaxed);
    scheduler_handle.abort();
    auto_forward_handle.await.ok();

    eprintln!("Goodbye!");
    Ok(())
}
