//! Recording fake transport for unit tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::MailError;
use crate::mail::{MailSender, OutgoingMail};

/// Records every mail. Fails sends whose subject carries a blocked `[label]`
/// or whose body contains a blocked marker.
pub struct RecordingSender {
    sent: Mutex<Vec<OutgoingMail>>,
    failing_labels: Mutex<HashSet<String>>,
    failing_markers: Mutex<HashSet<String>>,
    authenticated: AtomicBool,
    healthy: AtomicBool,
}

impl Default for RecordingSender {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing_labels: Mutex::new(HashSet::new()),
            failing_markers: Mutex::new(HashSet::new()),
            authenticated: AtomicBool::new(true),
            healthy: AtomicBool::new(true),
        }
    }
}

impl RecordingSender {
    pub fn fail_label(&self, label: &str) {
        self.failing_labels.lock().unwrap().insert(label.to_string());
    }

    /// Fail any mail whose body contains `marker`.
    pub fn fail_body_containing(&self, marker: &str) {
        self.failing_markers.lock().unwrap().insert(marker.to_string());
    }

    pub fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, value: bool) {
        self.healthy.store(value, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for RecordingSender {
    fn name(&self) -> &str {
        "recording"
    }

    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let blocked = self
            .failing_labels
            .lock()
            .unwrap()
            .iter()
            .any(|label| mail.subject.contains(&format!("[{label}]")))
            || self
                .failing_markers
                .lock()
                .unwrap()
                .iter()
                .any(|marker| mail.body.contains(marker.as_str()));
        if blocked {
            return Err(MailError::Rejected {
                status: 500,
                body: "backend error".into(),
            });
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), MailError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MailError::Transport {
                transport: "recording".into(),
                reason: "offline".into(),
            })
        }
    }
}
