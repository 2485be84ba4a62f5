//! Background workers: the scheduled batch run and the auto-forward queue.
//!
//! Both return their `JoinHandle` so callers can await them deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pipeline::processor::{AutoForwardOutcome, BatchProcessor};
use crate::pipeline::types::{AutoProcessingOptions, ProcessingResult, SmsMessage};
use crate::store::Database;

/// Default capacity of the auto-forward queue.
pub const AUTO_FORWARD_QUEUE_CAPACITY: usize = 256;

/// Outcome of one scheduler tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// Auto-processing is switched off.
    Disabled,
    /// `only_when_connected` is set and the transport is unreachable.
    Offline,
    Ran(ProcessingResult),
    Failed(String),
}

/// Run one scheduled batch if the current options allow it.
pub async fn run_scheduled_tick(db: &Arc<dyn Database>, processor: &BatchProcessor) -> TickOutcome {
    let options = match db.get_auto_options().await {
        Ok(options) => options,
        Err(e) => {
            error!("Failed to load auto-processing options: {e}");
            return TickOutcome::Failed(e.to_string());
        }
    };
    if !options.enabled {
        return TickOutcome::Disabled;
    }

    if options.only_when_connected {
        if let Err(e) = processor.mailer().health_check().await {
            warn!(error = %e, "Mail transport unreachable, skipping scheduled batch");
            return TickOutcome::Offline;
        }
    }

    match processor.process_batch(None, false).await {
        Ok(result) => TickOutcome::Ran(result),
        Err(e) => {
            error!("Scheduled batch failed: {e}");
            TickOutcome::Failed(e.to_string())
        }
    }
}

/// Spawn the scheduled batch loop.
///
/// The interval is re-read from the stored options before every sleep, so
/// changes apply from the next tick. Returns a `JoinHandle` and shutdown flag.
pub fn spawn_batch_scheduler(
    db: Arc<dyn Database>,
    processor: Arc<BatchProcessor>,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Batch scheduler started");

        loop {
            let interval = match db.get_auto_options().await {
                Ok(options) => options.batch_interval(),
                Err(e) => {
                    warn!("Falling back to default batch interval: {e}");
                    AutoProcessingOptions::default().batch_interval()
                }
            };
            tokio::time::sleep(interval).await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Batch scheduler shutting down");
                return;
            }

            match run_scheduled_tick(&db, &processor).await {
                TickOutcome::Ran(result) => debug!(
                    processed = result.total_processed,
                    emails_sent = result.emails_sent,
                    "Scheduled batch finished"
                ),
                other => debug!(outcome = ?other, "Scheduled batch not run"),
            }
        }
    });

    (handle, shutdown_flag)
}

/// Producer side of the auto-forward queue.
#[derive(Clone)]
pub struct AutoForwardQueue {
    tx: mpsc::Sender<SmsMessage>,
}

impl AutoForwardQueue {
    /// Offer an SMS without waiting. Returns `false` if the queue is full or
    /// closed; the SMS then stays pending for the next batch run.
    pub fn enqueue(&self, sms: SmsMessage) -> bool {
        match self.tx.try_send(sms) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(sms)) => {
                warn!(id = %sms.id, "Auto-forward queue full, leaving SMS for batch run");
                false
            }
            Err(mpsc::error::TrySendError::Closed(sms)) => {
                warn!(id = %sms.id, "Auto-forward worker stopped, leaving SMS for batch run");
                false
            }
        }
    }
}

/// Spawn the worker that auto-forwards queued SMS one at a time.
///
/// The worker exits once every [`AutoForwardQueue`] clone is dropped.
pub fn spawn_auto_forwarder(
    processor: Arc<BatchProcessor>,
    capacity: usize,
) -> (AutoForwardQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<SmsMessage>(capacity.max(1));

    let handle = tokio::spawn(async move {
        info!("Auto-forward worker started");
        while let Some(sms) = rx.recv().await {
            match processor.process_new_sms(&sms).await {
                Ok(AutoForwardOutcome::Sent { label }) => {
                    debug!(id = %sms.id, label = %label, "Queued SMS forwarded");
                }
                Ok(AutoForwardOutcome::Failed { label, error }) => {
                    warn!(id = %sms.id, label = %label, error = %error, "Queued SMS not forwarded");
                }
                Ok(outcome) => debug!(id = %sms.id, outcome = ?outcome, "Queued SMS skipped"),
                Err(e) => warn!(id = %sms.id, error = %e, "Auto-forward unavailable"),
            }
        }
        info!("Auto-forward worker shutting down");
    });

    (AutoForwardQueue { tx }, handle)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::config::EmailConfig;
    use crate::mail::MailSender;
    use crate::mail::testing::RecordingSender;
    use crate::pipeline::rules::{FilterRule, RulePriority};
    use crate::store::LibSqlBackend;

    async fn setup(
        options: AutoProcessingOptions,
    ) -> (Arc<dyn Database>, Arc<RecordingSender>, Arc<BatchProcessor>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.save_rules(&[FilterRule::new(
            "Codes",
            vec!["otp".into()],
            "Sécurité",
            "security@example.com",
        )
        .with_priority(RulePriority::Critical)
        .with_auto_forward(true)])
            .await
            .unwrap();
        db.set_auto_options(&options).await.unwrap();

        let sender = Arc::new(RecordingSender::default());
        let processor = Arc::new(BatchProcessor::new(
            Arc::clone(&db),
            Arc::clone(&sender) as Arc<dyn MailSender>,
            EmailConfig {
                user_email: "me@gmail.com".into(),
                recipient_email: "inbox@example.com".into(),
            },
            "SMS to Mail",
        ));
        (db, sender, processor)
    }

    fn enabled() -> AutoProcessingOptions {
        AutoProcessingOptions {
            enabled: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn tick_is_noop_when_disabled() {
        let (db, sender, processor) = setup(AutoProcessingOptions::default()).await;
        db.insert_sms(&SmsMessage::new("SVC", "otp 1", Utc::now()))
            .await
            .unwrap();
        assert!(matches!(
            run_scheduled_tick(&db, &processor).await,
            TickOutcome::Disabled
        ));
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn tick_skips_when_offline() {
        let (db, sender, processor) = setup(enabled()).await;
        db.insert_sms(&SmsMessage::new("SVC", "otp 1", Utc::now()))
            .await
            .unwrap();
        sender.set_healthy(false);
        assert!(matches!(
            run_scheduled_tick(&db, &processor).await,
            TickOutcome::Offline
        ));

        let mut options = enabled();
        options.only_when_connected = false;
        db.set_auto_options(&options).await.unwrap();
        match run_scheduled_tick(&db, &processor).await {
            TickOutcome::Ran(result) => assert_eq!(result.emails_sent, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn tick_runs_batch_when_enabled() {
        let (db, sender, processor) = setup(enabled()).await;
        db.insert_sms(&SmsMessage::new("SVC", "otp 1", Utc::now()))
            .await
            .unwrap();
        match run_scheduled_tick(&db, &processor).await {
            TickOutcome::Ran(result) => {
                assert_eq!(result.total_processed, 1);
                assert_eq!(result.emails_sent, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn auto_forwarder_drains_queue_then_stops() {
        let (db, sender, processor) = setup(enabled()).await;
        let (queue, handle) = spawn_auto_forwarder(processor, 8);

        let matching = SmsMessage::new("SVC", "Your OTP is 4821", Utc::now());
        let other = SmsMessage::new("Mom", "Dinner?", Utc::now());
        db.insert_sms(&matching).await.unwrap();
        db.insert_sms(&other).await.unwrap();

        assert!(queue.enqueue(matching.clone()));
        assert!(queue.enqueue(other.clone()));
        drop(queue);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(sender.sent().len(), 1);
        assert!(db.get_sms(&matching.id).await.unwrap().unwrap().sent);
        assert!(!db.get_sms(&other.id).await.unwrap().unwrap().sent);
    }

    #[tokio::test]
    async fn full_queue_rejects_without_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let queue = AutoForwardQueue { tx };
        assert!(queue.enqueue(SmsMessage::new("A", "otp", Utc::now())));
        assert!(!queue.enqueue(SmsMessage::new("B", "otp", Utc::now())));
    }

    #[tokio::test]
    async fn scheduler_stops_on_shutdown_flag() {
        let (db, _sender, processor) = setup(AutoProcessingOptions {
            batch_interval_secs: 1,
            ..Default::default()
        })
        .await;
        let (handle, shutdown) = spawn_batch_scheduler(db, processor);
        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
