//! Shared types for the SMS processing pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum number of error strings kept in a [`ProcessingResult`].
pub const MAX_REPORTED_ERRORS: usize = 50;

// ── SMS record ──────────────────────────────────────────────────────

/// A received SMS as persisted by the store.
///
/// Created on receipt, deduplicated by `hash`, and flipped once from
/// `sent = false` to `sent = true` after a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsMessage {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Content-derived dedup key.
    pub hash: String,
    pub sent: bool,
}

impl SmsMessage {
    /// Build a new unsent record with its hash and id.
    pub fn new(
        sender: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let sender = sender.into();
        let content = content.into();
        let hash = Self::content_hash(&sender, &content, timestamp);
        let id = format!("sms_{}_{}", timestamp.timestamp_millis(), &hash[..8]);
        Self {
            id,
            sender,
            content,
            timestamp,
            hash,
            sent: false,
        }
    }

    /// Lowercase hex SHA-256 of `sender|content|timestamp_millis`.
    pub fn content_hash(sender: &str, content: &str, timestamp: DateTime<Utc>) -> String {
        let input = format!("{sender}|{content}|{}", timestamp.timestamp_millis());
        hex::encode(Sha256::digest(input.as_bytes()))
    }
}

// ── Options ─────────────────────────────────────────────────────────

/// Options for unattended processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoProcessingOptions {
    pub enabled: bool,
    /// Seconds between scheduled batch runs.
    pub batch_interval_secs: u64,
    /// Cap on individual sends per label group.
    pub max_batch_size: usize,
    /// Skip scheduled runs while the mail transport is unreachable.
    pub only_when_connected: bool,
    /// Combine multi-message groups into one mail.
    pub group_by_label: bool,
}

impl Default for AutoProcessingOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_interval_secs: 300,
            max_batch_size: 10,
            only_when_connected: true,
            group_by_label: true,
        }
    }
}

impl AutoProcessingOptions {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs(self.batch_interval_secs.max(1))
    }
}

/// Date window plus the "last processed" watermark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateFilter {
    pub enabled: bool,
    /// Inclusive lower bound.
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub end_date: Option<DateTime<Utc>>,
    pub last_processed: Option<DateTime<Utc>>,
}

impl DateFilter {
    /// Always true while the filter is disabled. Missing bounds are open.
    pub fn is_in_range(&self, timestamp: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let after_start = self.start_date.is_none_or(|start| timestamp >= start);
        let before_end = self.end_date.is_none_or(|end| timestamp <= end);
        after_start && before_end
    }

    /// Strictly newer than the watermark (or no watermark yet).
    pub fn is_after_watermark(&self, timestamp: DateTime<Utc>) -> bool {
        self.last_processed.is_none_or(|mark| timestamp > mark)
    }

    /// Whether a message survives the date stage of a batch run.
    pub fn accepts(&self, timestamp: DateTime<Utc>) -> bool {
        self.is_in_range(timestamp) && self.is_after_watermark(timestamp)
    }
}

// ── Result ──────────────────────────────────────────────────────────

/// How a group was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    /// One mail summarising the whole group.
    Combined,
    /// One mail per SMS.
    Individual,
}

/// A successfully dispatched group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub label: String,
    pub kind: DispatchKind,
    /// SMS covered by the successful sends.
    pub sms_count: usize,
}

/// Aggregate outcome of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// Messages that survived the date stage.
    pub total_processed: usize,
    /// Successful dispatch units (one per combined mail, one per individual mail).
    pub emails_sent: usize,
    /// Human-readable failures, capped at [`MAX_REPORTED_ERRORS`].
    pub errors: Vec<String>,
    /// Errors dropped because of the cap.
    pub errors_truncated: usize,
    /// Group sizes before the dispatch decision.
    pub grouped_by_label: BTreeMap<String, usize>,
    pub dispatched: Vec<DispatchSummary>,
}

impl ProcessingResult {
    pub fn push_error(&mut self, error: impl Into<String>) {
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(error.into());
        } else {
            self.errors_truncated += 1;
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len() + self.errors_truncated
    }
}

/// Overview of stored SMS and rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStatistics {
    pub total_sms: usize,
    pub sent_sms: usize,
    pub pending_sms: usize,
    pub total_rules: usize,
    pub active_rules: usize,
    pub auto_forward_rules: usize,
    pub grouped_labels: usize,
    pub label_distribution: BTreeMap<String, usize>,
    pub last_processed: Option<DateTime<Utc>>,
}
