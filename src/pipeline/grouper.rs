//! Partition a batch of SMS by the label of their primary rule.

use crate::pipeline::rules::RuleSet;
use crate::pipeline::types::SmsMessage;

/// Label given to SMS that no rule matches.
pub const UNCLASSIFIED_LABEL: &str = "Non classé";

/// Label → messages, iterated in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelGroups {
    groups: Vec<(String, Vec<SmsMessage>)>,
}

impl LabelGroups {
    fn push(&mut self, label: &str, message: SmsMessage) {
        match self.groups.iter_mut().find(|(l, _)| l == label) {
            Some((_, messages)) => messages.push(message),
            None => self.groups.push((label.to_string(), vec![message])),
        }
    }

    pub fn get(&self, label: &str) -> Option<&[SmsMessage]> {
        self.groups
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, m)| m.as_slice())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(l, _)| l.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[SmsMessage])> {
        self.groups.iter().map(|(l, m)| (l.as_str(), m.as_slice()))
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Label → group size.
    pub fn counts(&self) -> impl Iterator<Item = (&str, usize)> {
        self.groups.iter().map(|(l, m)| (l.as_str(), m.len()))
    }
}

/// Assign every message to the label of its first matching rule, or to
/// [`UNCLASSIFIED_LABEL`]. Input order is kept inside each group.
pub fn group_by_label(messages: impl IntoIterator<Item = SmsMessage>, rules: &RuleSet) -> LabelGroups {
    let mut groups = LabelGroups::default();
    for message in messages {
        let label = rules
            .find_first_match(&message.sender, &message.content)
            .map_or(UNCLASSIFIED_LABEL, |r| r.label.as_str());
        groups.push(label, message);
    }
    groups
}
