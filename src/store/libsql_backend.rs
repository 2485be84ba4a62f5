//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::auth::token::TokenRecord;
use crate::error::DatabaseError;
use crate::pipeline::rules::{FilterRule, RulePriority};
use crate::pipeline::types::{AutoProcessingOptions, DateFilter, SmsMessage};
use crate::store::migrations;
use crate::store::traits::{Database, MessageCounts};

const AUTO_OPTIONS_KEY: &str = "auto_processing_options";
const DATE_FILTER_KEY: &str = "date_filter";
const OAUTH_TOKEN_KEY: &str = "oauth_token";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT value FROM settings WHERE key = ?1", params![key])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_setting: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_setting: {e}")))?;
                serde_json::from_str(&raw)
                    .map(Some)
                    .map_err(|e| DatabaseError::Decode {
                        entity: key.to_string(),
                        reason: e.to_string(),
                    })
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_setting: {e}"))),
        }
    }

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), DatabaseError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET value = ?2, updated_at = ?3",
                params![key, raw, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_setting: {e}")))?;

        debug!(key, "Setting saved");
        Ok(())
    }

    async fn query_messages(&self, sql: &str, op: &str) -> Result<Vec<SmsMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut messages = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => messages.push(row_to_sms(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
            }
        }
        Ok(messages)
    }

    async fn count(&self, sql: &str) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("message_counts: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("message_counts: {e}")))?
            .ok_or_else(|| row_err("message_count", "query returned no row"))?;
        let count = row
            .get::<i64>(0)
            .map_err(|e| row_err("message_count", e))?;
        usize::try_from(count).map_err(|e| row_err("message_count", format!("{count}: {e}")))
    }
}

// ── Helper functions ────────────────────────────────────────────────

const MESSAGE_COLUMNS: &str = "id, sender, content, timestamp, hash, sent";

const RULE_COLUMNS: &str =
    "id, name, keywords, label, recipient_email, enabled, auto_forward, priority, color, created_at";

fn row_err(entity: &str, e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Decode {
        entity: entity.to_string(),
        reason: e.to_string(),
    }
}

fn row_to_sms(row: &libsql::Row) -> Result<SmsMessage, DatabaseError> {
    let id: String = row.get(0).map_err(|e| row_err("sms", e))?;
    let millis: i64 = row.get(3).map_err(|e| row_err("sms", e))?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| row_err("sms", format!("timestamp {millis} out of range for {id}")))?;

    Ok(SmsMessage {
        sender: row.get(1).map_err(|e| row_err("sms", e))?,
        content: row.get(2).map_err(|e| row_err("sms", e))?,
        timestamp,
        hash: row.get(4).map_err(|e| row_err("sms", e))?,
        sent: row.get::<i64>(5).map_err(|e| row_err("sms", e))? != 0,
        id,
    })
}

fn row_to_rule(row: &libsql::Row) -> Result<FilterRule, DatabaseError> {
    let id: String = row.get(0).map_err(|e| row_err("filter_rule", e))?;
    let keywords_raw: String = row.get(2).map_err(|e| row_err("filter_rule", e))?;
    let keywords: Vec<String> = serde_json::from_str(&keywords_raw)
        .map_err(|e| row_err("filter_rule", format!("keywords of {id}: {e}")))?;
    let priority_raw: i64 = row.get(7).map_err(|e| row_err("filter_rule", e))?;
    let priority = u8::try_from(priority_raw)
        .map_err(|e| e.to_string())
        .and_then(RulePriority::try_from)
        .map_err(|e| row_err("filter_rule", format!("priority of {id}: {e}")))?;
    let created_raw: String = row.get(9).map_err(|e| row_err("filter_rule", e))?;
    let created_at = DateTime::parse_from_rfc3339(&created_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| row_err("filter_rule", format!("created_at of {id}: {e}")))?;

    Ok(FilterRule {
        name: row.get(1).map_err(|e| row_err("filter_rule", e))?,
        keywords,
        label: row.get(3).map_err(|e| row_err("filter_rule", e))?,
        recipient_email: row.get(4).map_err(|e| row_err("filter_rule", e))?,
        enabled: row.get::<i64>(5).map_err(|e| row_err("filter_rule", e))? != 0,
        auto_forward: row.get::<i64>(6).map_err(|e| row_err("filter_rule", e))? != 0,
        priority,
        color: row.get(8).map_err(|e| row_err("filter_rule", e))?,
        created_at,
        id,
    })
}

// ── Database trait implementation ───────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_sms(&self, sms: &SmsMessage) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO messages (id, sender, content, timestamp, hash, sent, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    sms.id.as_str(),
                    sms.sender.as_str(),
                    sms.content.as_str(),
                    sms.timestamp.timestamp_millis(),
                    sms.hash.as_str(),
                    i64::from(sms.sent),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_sms: {e}")))?;

        if inserted == 0 {
            debug!(id = %sms.id, "Duplicate SMS ignored");
            return Ok(false);
        }
        debug!(id = %sms.id, sender = %sms.sender, "SMS inserted into DB");
        Ok(true)
    }

    async fn get_sms(&self, id: &str) -> Result<Option<SmsMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_sms: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_sms(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_sms: {e}"))),
        }
    }

    async fn list_messages(&self) -> Result<Vec<SmsMessage>, DatabaseError> {
        self.query_messages(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY timestamp DESC, id DESC"),
            "list_messages",
        )
        .await
    }

    async fn list_pending_messages(&self) -> Result<Vec<SmsMessage>, DatabaseError> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE sent = 0 ORDER BY timestamp DESC, id DESC"
            ),
            "list_pending_messages",
        )
        .await
    }

    async fn mark_sent(&self, id: &str) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("UPDATE messages SET sent = 1 WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_sent: {e}")))?;
        Ok(count > 0)
    }

    async fn message_counts(&self) -> Result<MessageCounts, DatabaseError> {
        let total = self.count("SELECT COUNT(*) FROM messages").await?;
        let sent = self
            .count("SELECT COUNT(*) FROM messages WHERE sent = 1")
            .await?;
        Ok(MessageCounts {
            total,
            sent,
            pending: total.saturating_sub(sent),
        })
    }

    // ── Rules ───────────────────────────────────────────────────────

    async fn list_rules(&self) -> Result<Vec<FilterRule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM filter_rules ORDER BY priority DESC, position ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_rules: {e}")))?;

        let mut rules = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => rules.push(row_to_rule(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_rules: {e}"))),
            }
        }
        Ok(rules)
    }

    async fn save_rules(&self, rules: &[FilterRule]) -> Result<(), DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("save_rules: {e}")))?;

        tx.execute("DELETE FROM filter_rules", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("save_rules: {e}")))?;

        for (position, rule) in rules.iter().enumerate() {
            let keywords = serde_json::to_string(&rule.keywords)
                .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            tx.execute(
                &format!(
                    "INSERT INTO filter_rules (position, {RULE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    position as i64,
                    rule.id.as_str(),
                    rule.name.as_str(),
                    keywords,
                    rule.label.as_str(),
                    rule.recipient_email.as_str(),
                    i64::from(rule.enabled),
                    i64::from(rule.auto_forward),
                    i64::from(u8::from(rule.priority)),
                    rule.color.as_str(),
                    rule.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_rules: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("save_rules commit: {e}")))?;

        debug!(count = rules.len(), "Rules saved");
        Ok(())
    }

    // ── Settings ────────────────────────────────────────────────────

    async fn get_auto_options(&self) -> Result<AutoProcessingOptions, DatabaseError> {
        Ok(self.get_json(AUTO_OPTIONS_KEY).await?.unwrap_or_default())
    }

    async fn set_auto_options(&self, options: &AutoProcessingOptions) -> Result<(), DatabaseError> {
        self.set_json(AUTO_OPTIONS_KEY, options).await
    }

    async fn get_date_filter(&self) -> Result<DateFilter, DatabaseError> {
        Ok(self.get_json(DATE_FILTER_KEY).await?.unwrap_or_default())
    }

    async fn set_date_filter(&self, filter: &DateFilter) -> Result<(), DatabaseError> {
        self.set_json(DATE_FILTER_KEY, filter).await
    }

    // ── OAuth2 ──────────────────────────────────────────────────────

    async fn get_token(&self) -> Result<Option<TokenRecord>, DatabaseError> {
        self.get_json(OAUTH_TOKEN_KEY).await
    }

    async fn set_token(&self, token: &TokenRecord) -> Result<(), DatabaseError> {
        self.set_json(OAUTH_TOKEN_KEY, token).await
    }

    async fn clear_token(&self) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM settings WHERE key = ?1", params![OAUTH_TOKEN_KEY])
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_token: {e}")))?;
        Ok(())
    }
}
