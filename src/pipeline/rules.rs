//! Keyword filter rules and the matcher that applies them.
//!
//! A rule matches an SMS when any of its keywords occurs, case-insensitively,
//! in the sender or in the content. Rules are always evaluated from a
//! [`RuleSet`] snapshot, which keeps them sorted by descending priority:
//! - the first matching rule classifies the message (grouping, batch dispatch)
//! - all matching auto-forward rules compete on priority for unattended dispatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Default UI color for a new rule.
pub const DEFAULT_RULE_COLOR: &str = "#2196F3";

/// Rule rank. Higher wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RulePriority {
    #[default]
    Normal,
    High,
    Critical,
}

impl RulePriority {
    /// Subject-line prefix for this priority (includes the trailing space).
    pub fn subject_prefix(self) -> &'static str {
        match self {
            Self::Normal => "",
            Self::High => "[URGENT] ",
            Self::Critical => "[CRITIQUE] ",
        }
    }
}

impl TryFrom<u8> for RulePriority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::High),
            2 => Ok(Self::Critical),
            other => Err(format!("invalid rule priority {other}, expected 0, 1 or 2")),
        }
    }
}

impl From<RulePriority> for u8 {
    fn from(priority: RulePriority) -> Self {
        match priority {
            RulePriority::Normal => 0,
            RulePriority::High => 1,
            RulePriority::Critical => 2,
        }
    }
}

/// A keyword-based classifier mapping matched SMS to a label and a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Generated at creation, never changes.
    #[serde(default = "new_rule_id")]
    pub id: String,
    pub name: String,
    /// Case-insensitive substrings; any one of them is enough.
    pub keywords: Vec<String>,
    /// Grouping tag, also the mailbox category on the receiving side.
    pub label: String,
    pub recipient_email: String,
    pub enabled: bool,
    /// Eligible for unattended dispatch.
    #[serde(default)]
    pub auto_forward: bool,
    #[serde(default)]
    pub priority: RulePriority,
    /// Cosmetic only.
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_color() -> String {
    DEFAULT_RULE_COLOR.to_string()
}

fn new_rule_id() -> String {
    Uuid::new_v4().to_string()
}

impl FilterRule {
    /// Create an enabled, normal-priority rule without auto-forward.
    pub fn new(
        name: impl Into<String>,
        keywords: Vec<String>,
        label: impl Into<String>,
        recipient_email: impl Into<String>,
    ) -> Self {
        Self {
            id: new_rule_id(),
            name: name.into(),
            keywords,
            label: label.into(),
            recipient_email: recipient_email.into(),
            enabled: true,
            auto_forward: false,
            priority: RulePriority::Normal,
            color: default_color(),
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: RulePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_auto_forward(mut self, auto_forward: bool) -> Self {
        self.auto_forward = auto_forward;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// Trim keywords and drop the blank ones.
    pub fn normalized(mut self) -> Self {
        self.keywords = self
            .keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    /// Name the first required field left blank, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.name.trim().is_empty() {
            Some("name")
        } else if self.label.trim().is_empty() {
            Some("label")
        } else if self.keywords.iter().all(|k| k.trim().is_empty()) {
            Some("keywords")
        } else if self.recipient_email.trim().is_empty() {
            Some("recipient_email")
        } else {
            None
        }
    }

    /// True iff the rule is enabled and some keyword occurs in `sender` or `content`,
    /// ignoring case.
    pub fn matches(&self, sender: &str, content: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let sender = fold_case(sender);
        let content = fold_case(content);
        self.keywords.iter().any(|keyword| {
            let keyword = fold_case(keyword);
            content.contains(&keyword) || sender.contains(&keyword)
        })
    }
}

/// Lowercase character by character. `str::to_lowercase` maps a word-final
/// `Σ` to `ς`, which would break substring matching against a keyword.
fn fold_case(s: &str) -> String {
    s.chars().flat_map(char::to_lowercase).collect()
}

/// Priority-sorted snapshot of the rules used for one evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<FilterRule>,
}

impl RuleSet {
    /// Sort by descending priority. Ties keep their input order.
    pub fn new(mut rules: Vec<FilterRule>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules }
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn into_rules(self) -> Vec<FilterRule> {
        self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.rules.iter().filter(|r| r.enabled).count()
    }

    pub fn auto_forward_count(&self) -> usize {
        self.rules.iter().filter(|r| r.auto_forward).count()
    }

    /// The primary rule for a message: the first match in priority order.
    pub fn find_first_match(&self, sender: &str, content: &str) -> Option<&FilterRule> {
        self.rules.iter().find(|r| r.matches(sender, content))
    }

    /// Every matching rule, in priority order.
    pub fn find_all_matches(&self, sender: &str, content: &str) -> Vec<&FilterRule> {
        self.rules
            .iter()
            .filter(|r| r.matches(sender, content))
            .collect()
    }

    /// Pick the rule for unattended dispatch: among matching auto-forward rules,
    /// the highest priority wins; on a tie the earliest rule in this set wins.
    pub fn select_auto_forward(&self, sender: &str, content: &str) -> Option<&FilterRule> {
        let selected = self
            .find_all_matches(sender, content)
            .into_iter()
            .filter(|r| r.auto_forward)
            .fold(None, |best: Option<&FilterRule>, rule| match best {
                Some(b) if b.priority >= rule.priority => Some(b),
                _ => Some(rule),
            });

        if let Some(rule) = selected {
            debug!(
                rule = %rule.name,
                label = %rule.label,
                priority = u8::from(rule.priority),
                "Selected auto-forward rule"
            );
        }
        selected
    }
}

/// The rule set seeded on first start.
pub fn default_rules(recipient_email: &str) -> Vec<FilterRule> {
    let kw = |words: &[&str]| words.iter().map(|w| (*w).to_string()).collect::<Vec<_>>();

    vec![
        FilterRule::new(
            "Codes de vérification",
            kw(&["code", "verification", "authentification", "otp", "pin"]),
            "Sécurité",
            recipient_email,
        )
        .with_auto_forward(true)
        .with_priority(RulePriority::Critical)
        .with_color("#F44336"),
        FilterRule::new(
            "Banque et Finance",
            kw(&["banque", "carte", "virement", "solde", "transaction", "paypal"]),
            "Finance",
            recipient_email,
        )
        .with_auto_forward(true)
        .with_priority(RulePriority::High)
        .with_color("#4CAF50"),
        FilterRule::new(
            "Livraisons",
            kw(&["livraison", "colis", "expédié", "dhl", "fedex", "colissimo"]),
            "Livraisons",
            recipient_email,
        )
        .with_color("#FF9800"),
        FilterRule::new(
            "Factures",
            kw(&["facture", "échéance", "paiement", "mensualité"]),
            "Factures",
            recipient_email,
        )
        .with_color("#9C27B0"),
        FilterRule::new(
            "Promotion",
            kw(&["promo", "offre", "réduction", "soldes", "gratuit"]),
            "Marketing",
            recipient_email,
        )
        .with_color("#607D8B"),
    ]
}
