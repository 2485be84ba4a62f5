//! SMS intake. Stores new messages once and offers them for auto-forward.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::SmsMessage;
use crate::pipeline::worker::AutoForwardQueue;
use crate::store::Database;

/// Sender recorded when the carrier gives none.
pub const UNKNOWN_SENDER: &str = "Inconnu";

/// An SMS as delivered by the phone-side relay.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingSms {
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Receipt time; defaults to now.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl IncomingSms {
    /// Build the stored record, filling in the sender and time if missing.
    pub fn into_message(self, now: DateTime<Utc>) -> SmsMessage {
        let sender = self
            .sender
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
        SmsMessage::new(
            sender,
            self.content.unwrap_or_default(),
            self.timestamp.unwrap_or(now),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(SmsMessage),
    /// Same sender, content and time already stored under `id`.
    Duplicate { id: String },
}

/// Receives SMS into the store.
pub struct Ingestor {
    db: Arc<dyn Database>,
    auto_forward: Option<AutoForwardQueue>,
}

impl Ingestor {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            auto_forward: None,
        }
    }

    /// Offer every newly stored SMS to the auto-forward worker.
    pub fn with_auto_forward(mut self, queue: AutoForwardQueue) -> Self {
        self.auto_forward = Some(queue);
        self
    }

    pub async fn receive(&self, incoming: IncomingSms) -> Result<IngestOutcome, DatabaseError> {
        let sms = incoming.into_message(Utc::now());

        if !self.db.insert_sms(&sms).await? {
            debug!(id = %sms.id, "Duplicate SMS dropped");
            return Ok(IngestOutcome::Duplicate { id: sms.id });
        }

        info!(id = %sms.id, sender = %sms.sender, "SMS received");
        if let Some(queue) = &self.auto_forward {
            queue.enqueue(sms.clone());
        }
        Ok(IngestOutcome::Stored(sms))
    }
}
