//! REST endpoints: SMS intake, batch processing, rules, settings, statistics
//! and Google sign-in.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, warn};

use crate::auth::TokenManager;
use crate::error::{AuthError, DatabaseError, PipelineError};
use crate::ingest::{IncomingSms, IngestOutcome, Ingestor};
use crate::pipeline::processor::BatchProcessor;
use crate::pipeline::rules::{FilterRule, RuleSet, default_rules};
use crate::pipeline::types::{AutoProcessingOptions, DateFilter};
use crate::store::Database;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub processor: Arc<BatchProcessor>,
    pub ingestor: Arc<Ingestor>,
    /// Present when Google sign-in is configured.
    pub tokens: Option<Arc<TokenManager>>,
    /// Recipient used when resetting to the default rules.
    pub default_recipient: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn db_error(e: DatabaseError) -> Response {
    error!(error = %e, "Database error in request");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn pipeline_error(e: PipelineError) -> Response {
    match e {
        PipelineError::ConfigurationIncomplete { .. } => {
            warn!(error = %e, "Processing refused");
            error_response(StatusCode::PRECONDITION_FAILED, e.to_string())
        }
        PipelineError::Database(e) => db_error(e),
    }
}

fn auth_error(e: AuthError) -> Response {
    match e {
        AuthError::NotSignedIn | AuthError::NoRefreshToken => {
            error_response(StatusCode::UNAUTHORIZED, e.to_string())
        }
        AuthError::TokenEndpoint { .. } | AuthError::InvalidResponse(_) | AuthError::Request(_) => {
            warn!(error = %e, "Google token request failed");
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
        AuthError::Storage(e) => db_error(e),
    }
}

fn oauth_not_configured() -> Response {
    error_response(StatusCode::NOT_FOUND, "Google sign-in is not configured")
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── SMS ─────────────────────────────────────────────────────────────

/// POST /api/sms
///
/// 201 with the new id, or 200 with `"duplicate"` when already stored.
async fn receive_sms(State(state): State<AppState>, Json(incoming): Json<IncomingSms>) -> Response {
    match state.ingestor.receive(incoming).await {
        Ok(IngestOutcome::Stored(sms)) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "status": "stored", "id": sms.id })),
        )
            .into_response(),
        Ok(IngestOutcome::Duplicate { id }) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "duplicate", "id": id })),
        )
            .into_response(),
        Err(e) => db_error(e),
    }
}

/// GET /api/sms: newest first.
async fn list_sms(State(state): State<AppState>) -> Response {
    match state.db.list_messages().await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProcessRequest {
    #[serde(default)]
    force_all: bool,
    #[serde(default)]
    date_filter: Option<DateFilter>,
}

/// POST /api/process
async fn process(
    State(state): State<AppState>,
    body: Option<Json<ProcessRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    match state
        .processor
        .process_batch(request.date_filter, request.force_all)
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => pipeline_error(e),
    }
}

// ── Rules ───────────────────────────────────────────────────────────

/// GET /api/rules: priority order.
async fn list_rules(State(state): State<AppState>) -> Response {
    match state.db.list_rules().await {
        Ok(rules) => Json(rules).into_response(),
        Err(e) => db_error(e),
    }
}

/// PUT /api/rules: replace the whole rule set.
async fn replace_rules(
    State(state): State<AppState>,
    Json(rules): Json<Vec<FilterRule>>,
) -> Response {
    let rules: Vec<FilterRule> = rules.into_iter().map(FilterRule::normalized).collect();
    for (index, rule) in rules.iter().enumerate() {
        if let Some(field) = rule.missing_field() {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("rule {index}: {field} is required"),
            );
        }
    }

    if let Err(e) = state.db.save_rules(&rules).await {
        return db_error(e);
    }
    Json(RuleSet::new(rules).into_rules()).into_response()
}

/// POST /api/rules/defaults: overwrite with the default rule set.
async fn reset_rules(State(state): State<AppState>) -> Response {
    let rules = default_rules(&state.default_recipient);
    if let Err(e) = state.db.save_rules(&rules).await {
        return db_error(e);
    }
    Json(RuleSet::new(rules).into_rules()).into_response()
}

// ── Settings ────────────────────────────────────────────────────────

async fn get_auto_options(State(state): State<AppState>) -> Response {
    match state.db.get_auto_options().await {
        Ok(options) => Json(options).into_response(),
        Err(e) => db_error(e),
    }
}

async fn put_auto_options(
    State(state): State<AppState>,
    Json(options): Json<AutoProcessingOptions>,
) -> Response {
    match state.db.set_auto_options(&options).await {
        Ok(()) => Json(options).into_response(),
        Err(e) => db_error(e),
    }
}

async fn get_date_filter(State(state): State<AppState>) -> Response {
    match state.db.get_date_filter().await {
        Ok(filter) => Json(filter).into_response(),
        Err(e) => db_error(e),
    }
}

async fn put_date_filter(
    State(state): State<AppState>,
    Json(filter): Json<DateFilter>,
) -> Response {
    if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
        if start > end {
            return error_response(StatusCode::BAD_REQUEST, "start_date is after end_date");
        }
    }
    match state.db.set_date_filter(&filter).await {
        Ok(()) => Json(filter).into_response(),
        Err(e) => db_error(e),
    }
}

/// GET /api/stats
async fn statistics(State(state): State<AppState>) -> Response {
    match state.processor.statistics().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => pipeline_error(e),
    }
}

// ── Auth ────────────────────────────────────────────────────────────

/// GET /api/auth/url: Google consent URL.
async fn auth_url(State(state): State<AppState>) -> Response {
    let Some(tokens) = &state.tokens else {
        return oauth_not_configured();
    };
    match tokens.authorization_url(None) {
        Ok(url) => Json(serde_json::json!({ "url": url })).into_response(),
        Err(e) => auth_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct CodeRequest {
    code: String,
}

/// POST /api/auth/code: finish sign-in with an authorization code.
async fn auth_code(State(state): State<AppState>, Json(request): Json<CodeRequest>) -> Response {
    let Some(tokens) = &state.tokens else {
        return oauth_not_configured();
    };
    if request.code.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "code is required");
    }
    match tokens.exchange_code(request.code.trim()).await {
        Ok(token) => Json(serde_json::json!({
            "signed_in": true,
            "email": token.email,
        }))
        .into_response(),
        Err(e) => auth_error(e),
    }
}

/// GET /api/auth/status
async fn auth_status(State(state): State<AppState>) -> Response {
    let transport = state.processor.mailer().name().to_string();
    let authenticated = state.processor.mailer().is_authenticated().await;
    let email = match &state.tokens {
        Some(tokens) => match tokens.account_email().await {
            Ok(email) => email,
            Err(e) => return auth_error(e),
        },
        None => None,
    };
    Json(serde_json::json!({
        "transport": transport,
        "authenticated": authenticated,
        "email": email,
    }))
    .into_response()
}

/// POST /api/auth/sign-out
async fn sign_out(State(state): State<AppState>) -> Response {
    let Some(tokens) = &state.tokens else {
        return oauth_not_configured();
    };
    match tokens.sign_out().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => auth_error(e),
    }
}

/// Build the REST routes.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sms", post(receive_sms).get(list_sms))
        .route("/api/process", post(process))
        .route("/api/rules", get(list_rules).put(replace_rules))
        .route("/api/rules/defaults", post(reset_rules))
        .route("/api/settings/auto", get(get_auto_options).put(put_auto_options))
        .route(
            "/api/settings/date-filter",
            get(get_date_filter).put(put_date_filter),
        )
        .route("/api/stats", get(statistics))
        .route("/api/auth/url", get(auth_url))
        .route("/api/auth/code", post(auth_code))
        .route("/api/auth/status", get(auth_status))
        .route("/api/auth/sign-out", post(sign_out))
        .with_state(state)
}
