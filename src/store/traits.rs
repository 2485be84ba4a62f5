//! Unified `Database` trait: single async interface for all persistence.
//!
//! The pipeline only ever talks to this trait: SMS records, the rule set,
//! processing settings and the OAuth2 token all live behind it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::token::TokenRecord;
use crate::error::DatabaseError;
use crate::pipeline::rules::{FilterRule, default_rules};
use crate::pipeline::types::{AutoProcessingOptions, DateFilter, SmsMessage};

/// Stored SMS counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCounts {
    pub total: usize,
    pub sent: usize,
    pub pending: usize,
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Persist a new SMS. Returns `false` if a record with the same hash exists.
    async fn insert_sms(&self, sms: &SmsMessage) -> Result<bool, DatabaseError>;

    /// Get an SMS by id.
    async fn get_sms(&self, id: &str) -> Result<Option<SmsMessage>, DatabaseError>;

    /// All stored SMS, newest first.
    async fn list_messages(&self) -> Result<Vec<SmsMessage>, DatabaseError>;

    /// Unsent SMS, newest first.
    async fn list_pending_messages(&self) -> Result<Vec<SmsMessage>, DatabaseError>;

    /// Flip `sent` to true. Returns `false` if the id is unknown.
    async fn mark_sent(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Total / sent / pending counts.
    async fn message_counts(&self) -> Result<MessageCounts, DatabaseError>;

    // ── Rules ───────────────────────────────────────────────────────

    /// All rules, sorted by descending priority (ties in saved order).
    async fn list_rules(&self) -> Result<Vec<FilterRule>, DatabaseError>;

    /// Replace the whole rule set.
    async fn save_rules(&self, rules: &[FilterRule]) -> Result<(), DatabaseError>;

    /// Seed the default rules if the store holds none. Returns whether it did.
    async fn initialize_default_rules(&self, recipient_email: &str) -> Result<bool, DatabaseError> {
        if !self.list_rules().await?.is_empty() {
            return Ok(false);
        }
        self.save_rules(&default_rules(recipient_email)).await?;
        Ok(true)
    }

    // ── Settings ────────────────────────────────────────────────────

    /// Auto-processing options, defaults if never saved.
    async fn get_auto_options(&self) -> Result<AutoProcessingOptions, DatabaseError>;

    async fn set_auto_options(&self, options: &AutoProcessingOptions) -> Result<(), DatabaseError>;

    /// Date filter, defaults if never saved.
    async fn get_date_filter(&self) -> Result<DateFilter, DatabaseError>;

    async fn set_date_filter(&self, filter: &DateFilter) -> Result<(), DatabaseError>;

    /// Advance the "last processed" watermark, leaving the rest of the filter alone.
    async fn update_last_processed(&self, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let mut filter = self.get_date_filter().await?;
        filter.last_processed = Some(at);
        self.set_date_filter(&filter).await
    }

    // ── OAuth2 ──────────────────────────────────────────────────────

    async fn get_token(&self) -> Result<Option<TokenRecord>, DatabaseError>;

    async fn set_token(&self, token: &TokenRecord) -> Result<(), DatabaseError>;

    async fn clear_token(&self) -> Result<(), DatabaseError>;
}
