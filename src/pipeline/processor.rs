//! Batch processor: turns pending SMS into forwarded mails.
//!
//! A batch run is a single sequential pass:
//! 1. Load pending SMS (newest first)
//! 2. Date filter (skipped with `force_all`)
//! 3. Group by label of the primary rule
//! 4. Per group: combined or individual dispatch through the `MailSender`
//! 5. Advance the "last processed" watermark (skipped with `force_all`)
//!
//! A failing group never aborts the run; it becomes an entry in
//! [`ProcessingResult::errors`]. Only a missing configuration is returned as `Err`.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::EmailConfig;
use crate::error::PipelineError;
use crate::mail::{MailSender, OutgoingMail};
use crate::pipeline::compose::{self, Footer};
use crate::pipeline::grouper::group_by_label;
use crate::pipeline::rules::{FilterRule, RuleSet};
use crate::pipeline::types::{
    DateFilter, DispatchKind, DispatchSummary, FilterStatistics, ProcessingResult, SmsMessage,
};
use crate::store::Database;

/// What happened to a single SMS offered for auto-forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoForwardOutcome {
    /// Auto-processing is switched off.
    Disabled,
    /// Already forwarded by an earlier run.
    AlreadySent,
    /// No enabled auto-forward rule matches.
    NoMatch,
    Sent { label: String },
    Failed { label: String, error: String },
}

impl AutoForwardOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// Orchestrates batch and single-message dispatch.
pub struct BatchProcessor {
    db: Arc<dyn Database>,
    mailer: Arc<dyn MailSender>,
    email: EmailConfig,
    app_name: String,
    /// Serialises runs so two of them never send the same SMS.
    run_lock: Mutex<()>,
}

impl BatchProcessor {
    pub fn new(
        db: Arc<dyn Database>,
        mailer: Arc<dyn MailSender>,
        email: EmailConfig,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            db,
            mailer,
            email,
            app_name: app_name.into(),
            run_lock: Mutex::new(()),
        }
    }

    pub fn mailer(&self) -> &Arc<dyn MailSender> {
        &self.mailer
    }

    async fn ensure_configured(&self) -> Result<(), PipelineError> {
        if let Some(missing) = self.email.missing() {
            return Err(PipelineError::ConfigurationIncomplete {
                missing: missing.to_string(),
            });
        }
        if !self.mailer.is_authenticated().await {
            return Err(PipelineError::ConfigurationIncomplete {
                missing: format!("{} authentication", self.mailer.name()),
            });
        }
        Ok(())
    }

    /// Process every pending SMS.
    ///
    /// `date_filter` overrides the stored filter for this run. `force_all`
    /// bypasses the date filter and the auto-forward gate and leaves the
    /// watermark untouched.
    pub async fn process_batch(
        &self,
        date_filter: Option<DateFilter>,
        force_all: bool,
    ) -> Result<ProcessingResult, PipelineError> {
        self.ensure_configured().await?;
        let _run = self.run_lock.lock().await;

        let options = self.db.get_auto_options().await?;
        let filter = match date_filter {
            Some(filter) => filter,
            None => self.db.get_date_filter().await?,
        };
        let rules = RuleSet::new(self.db.list_rules().await?);
        let pending = self.db.list_pending_messages().await?;
        let loaded = pending.len();

        let survivors: Vec<SmsMessage> = if filter.enabled && !force_all {
            pending
                .into_iter()
                .filter(|sms| filter.accepts(sms.timestamp))
                .collect()
        } else {
            pending
        };

        info!(
            loaded,
            selected = survivors.len(),
            rules = rules.len(),
            force_all,
            "Starting batch run"
        );

        let mut result = ProcessingResult {
            total_processed: survivors.len(),
            ..Default::default()
        };

        let groups = group_by_label(survivors, &rules);
        for (label, count) in groups.counts() {
            result.grouped_by_label.insert(label.to_string(), count);
        }

        let footer = Footer {
            app_name: &self.app_name,
            processed_at: Utc::now(),
        };

        for (label, group) in groups.iter() {
            let Some(first) = group.first() else {
                continue;
            };
            let Some(rule) = rules.find_first_match(&first.sender, &first.content) else {
                debug!(label, count = group.len(), "No rule for group, skipping");
                continue;
            };
            if options.enabled && !rule.auto_forward && !force_all {
                debug!(label, rule = %rule.name, "Rule is not auto-forward, skipping");
                continue;
            }

            if options.group_by_label && group.len() > 1 {
                self.dispatch_combined(rule, label, group, &footer, &mut result)
                    .await;
            } else {
                self.dispatch_individual(
                    rule,
                    label,
                    group,
                    options.max_batch_size,
                    &footer,
                    &mut result,
                )
                .await;
            }
        }

        if !force_all {
            if let Err(e) = self.db.update_last_processed(Utc::now()).await {
                warn!(error = %e, "Failed to update last processed date");
                result.push_error(format!("Erreur mise à jour de la date de traitement: {e}"));
            }
        }

        info!(
            processed = result.total_processed,
            emails_sent = result.emails_sent,
            errors = result.error_count(),
            "Batch run complete"
        );
        Ok(result)
    }

    async fn dispatch_combined(
        &self,
        rule: &FilterRule,
        label: &str,
        group: &[SmsMessage],
        footer: &Footer<'_>,
        result: &mut ProcessingResult,
    ) {
        let mail = OutgoingMail::new(
            rule.recipient_email.as_str(),
            compose::subject(rule, group.len()),
            compose::grouped_body(rule, group, footer),
        );

        match self.mailer.send(&mail).await {
            Ok(()) => {
                result.emails_sent += 1;
                for sms in group {
                    self.mark_sent(sms).await;
                }
                result.dispatched.push(DispatchSummary {
                    label: label.to_string(),
                    kind: DispatchKind::Combined,
                    sms_count: group.len(),
                });
                info!(label, count = group.len(), to = %rule.recipient_email, "Group sent");
            }
            Err(e) => {
                error!(label, error = %e, "Combined send failed");
                result.push_error(format!("Erreur envoi groupé pour {label}: {e}"));
            }
        }
    }

    async fn dispatch_individual(
        &self,
        rule: &FilterRule,
        label: &str,
        group: &[SmsMessage],
        max_batch_size: usize,
        footer: &Footer<'_>,
        result: &mut ProcessingResult,
    ) {
        let mut succeeded = 0;
        for sms in group.iter().take(max_batch_size) {
            let mail = OutgoingMail::new(
                rule.recipient_email.as_str(),
                compose::subject(rule, 1),
                compose::individual_body(rule, sms, footer),
            );
            match self.mailer.send(&mail).await {
                Ok(()) => {
                    succeeded += 1;
                    self.mark_sent(sms).await;
                }
                Err(e) => {
                    error!(label, id = %sms.id, error = %e, "Individual send failed");
                    result.push_error(format!("Erreur envoi SMS de {label} ({}): {e}", sms.sender));
                }
            }
        }

        if group.len() > max_batch_size {
            debug!(
                label,
                deferred = group.len() - max_batch_size,
                "Batch size reached, remaining SMS left pending"
            );
        }

        if succeeded > 0 {
            result.emails_sent += succeeded;
            result.dispatched.push(DispatchSummary {
                label: label.to_string(),
                kind: DispatchKind::Individual,
                sms_count: succeeded,
            });
            info!(label, count = succeeded, to = %rule.recipient_email, "SMS sent individually");
        }
    }

    async fn mark_sent(&self, sms: &SmsMessage) {
        if let Err(e) = self.db.mark_sent(&sms.id).await {
            warn!(id = %sms.id, error = %e, "Failed to mark SMS as sent");
        }
    }

    /// Forward one freshly received SMS with the best auto-forward rule.
    pub async fn process_new_sms(
        &self,
        sms: &SmsMessage,
    ) -> Result<AutoForwardOutcome, PipelineError> {
        let options = self.db.get_auto_options().await?;
        if !options.enabled {
            return Ok(AutoForwardOutcome::Disabled);
        }
        self.ensure_configured().await?;
        let _run = self.run_lock.lock().await;

        if sms.sent || self.db.get_sms(&sms.id).await?.is_some_and(|stored| stored.sent) {
            return Ok(AutoForwardOutcome::AlreadySent);
        }

        let rules = RuleSet::new(self.db.list_rules().await?);
        let Some(rule) = rules.select_auto_forward(&sms.sender, &sms.content) else {
            debug!(id = %sms.id, "No auto-forward rule matches");
            return Ok(AutoForwardOutcome::NoMatch);
        };

        let footer = Footer {
            app_name: &self.app_name,
            processed_at: Utc::now(),
        };
        let mail = OutgoingMail::new(
            rule.recipient_email.as_str(),
            compose::subject(rule, 1),
            compose::individual_body(rule, sms, &footer),
        );

        match self.mailer.send(&mail).await {
            Ok(()) => {
                self.mark_sent(sms).await;
                info!(id = %sms.id, label = %rule.label, "SMS auto-forwarded");
                Ok(AutoForwardOutcome::Sent {
                    label: rule.label.clone(),
                })
            }
            Err(e) => {
                error!(id = %sms.id, label = %rule.label, error = %e, "Auto-forward failed");
                Ok(AutoForwardOutcome::Failed {
                    label: rule.label.clone(),
                    error: e.to_string(),
                })
            }
        }
    }

    /// Snapshot of stored SMS and rules.
    pub async fn statistics(&self) -> Result<FilterStatistics, PipelineError> {
        let counts = self.db.message_counts().await?;
        let rules = RuleSet::new(self.db.list_rules().await?);
        let messages = self.db.list_messages().await?;
        let filter = self.db.get_date_filter().await?;

        let groups = group_by_label(messages, &rules);
        Ok(FilterStatistics {
            total_sms: counts.total,
            sent_sms: counts.sent,
            pending_sms: counts.pending,
            total_rules: rules.len(),
            active_rules: rules.active_count(),
            auto_forward_rules: rules.auto_forward_count(),
            grouped_labels: groups.len(),
            label_distribution: groups
                .counts()
                .map(|(label, n)| (label.to_string(), n))
                .collect(),
            last_processed: filter.last_processed,
        })
    }
}
