//! SMS forwarding pipeline.
//!
//! Every stored SMS flows through:
//! 1. `RuleSet`: keyword matching, priority-sorted
//! 2. `group_by_label()`: partition by the primary rule's label
//! 3. `BatchProcessor`: combined or individual dispatch via `MailSender`
//!
//! Freshly received SMS can also take the auto-forward path through the
//! worker queue, which picks the highest-priority auto-forward rule.

pub mod compose;
pub mod grouper;
pub mod processor;
pub mod rules;
pub mod types;
pub mod worker;
