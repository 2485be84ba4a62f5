//! Subject and plain-text body of forwarded mails.
//!
//! Builders are pure: the processing time is passed in, so the same input
//! always renders the same text.

use chrono::{DateTime, Local, Utc};

use crate::pipeline::rules::FilterRule;
use crate::pipeline::types::SmsMessage;

const HEAVY_RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";
const LIGHT_RULE: &str = "────────────────────────────────────────";

/// Identifies the relay build in the footer.
pub const APPLICATION_ID: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

/// Trailer printed at the bottom of every mail.
#[derive(Debug, Clone)]
pub struct Footer<'a> {
    pub app_name: &'a str,
    pub processed_at: DateTime<Utc>,
}

/// `dd/mm/yyyy HH:MM` in local time.
pub fn format_date(timestamp: DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%d/%m/%Y %H:%M")
        .to_string()
}

/// `[PRIORITY] [label] N SMS - name`, with `N SMS` collapsing to `SMS` for one message.
pub fn subject(rule: &FilterRule, sms_count: usize) -> String {
    let count = if sms_count > 1 {
        format!("{sms_count} SMS")
    } else {
        "SMS".to_string()
    };
    format!(
        "{}[{}] {} - {}",
        rule.priority.subject_prefix(),
        rule.label,
        count,
        rule.name
    )
}

/// Body for a single forwarded SMS.
pub fn individual_body(rule: &FilterRule, sms: &SmsMessage, footer: &Footer<'_>) -> String {
    let mut out = format!(
        "📱 SMS - Libellé: {}\n🏷️ Règle: {}\n🔑 Mots-clés correspondants: {}\n\n{HEAVY_RULE}\n\n",
        rule.label,
        rule.name,
        rule.keywords.join(", ")
    );
    push_sms(&mut out, sms);
    push_footer(&mut out, footer);
    out
}

/// Body summarising a whole label group, newest SMS first.
pub fn grouped_body(rule: &FilterRule, group: &[SmsMessage], footer: &Footer<'_>) -> String {
    let mut sorted: Vec<&SmsMessage> = group.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut out = format!(
        "📱 Groupe de SMS - Libellé: {}\n🏷️ Règle: {}\n📊 Nombre de messages: {}\n🔑 Mots-clés: {}\n\n{HEAVY_RULE}\n\n",
        rule.label,
        rule.name,
        group.len(),
        rule.keywords.join(", ")
    );

    for (index, sms) in sorted.iter().enumerate() {
        out.push_str(&format!("📧 Message {}/{}\n", index + 1, group.len()));
        push_sms(&mut out, sms);
        if index + 1 < sorted.len() {
            out.push_str(LIGHT_RULE);
            out.push_str("\n\n");
        }
    }

    push_footer(&mut out, footer);
    out
}

fn push_sms(out: &mut String, sms: &SmsMessage) {
    out.push_str(&format!(
        "👤 Expéditeur: {}\n🕐 Date: {}\n💬 Contenu:\n{}\n\n",
        sms.sender,
        format_date(sms.timestamp),
        sms.content
    ));
}

fn push_footer(out: &mut String, footer: &Footer<'_>) {
    out.push_str(&format!(
        "{HEAVY_RULE}\n🤖 Envoyé automatiquement par {}\n📱 Application: {APPLICATION_ID}\n⏰ Traité le: {}",
        footer.app_name,
        format_date(footer.processed_at)
    ));
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::pipeline::rules::RulePriority;

    fn rule(priority: RulePriority) -> FilterRule {
        FilterRule::new(
            "Codes de vérification",
            vec!["code".into(), "otp".into()],
            "Sécurité",
            "me@example.com",
        )
        .with_priority(priority)
    }

    fn sms(content: &str, secs: i64) -> SmsMessage {
        SmsMessage::new("BANK", content, Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn footer() -> Footer<'static> {
        Footer {
            app_name: "SMS to Mail",
            processed_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn subject_for_single_critical_sms() {
        assert_eq!(
            subject(&rule(RulePriority::Critical), 1),
            "[CRITIQUE] [Sécurité] SMS - Codes de vérification"
        );
    }

    #[test]
    fn subject_prefixes_by_priority() {
        assert_eq!(
            subject(&rule(RulePriority::Normal), 1),
            "[Sécurité] SMS - Codes de vérification"
        );
        assert_eq!(
            subject(&rule(RulePriority::High), 3),
            "[URGENT] [Sécurité] 3 SMS - Codes de vérification"
        );
    }

    #[test]
    fn individual_body_contains_rule_and_sms() {
        let body = individual_body(&rule(RulePriority::Normal), &sms("Your OTP is 4821", 10), &footer());
        assert!(body.contains("Libellé: Sécurité"));
        assert!(body.contains("Règle: Codes de vérification"));
        assert!(body.contains("code, otp"));
        assert!(body.contains("Expéditeur: BANK"));
        assert!(body.contains("Your OTP is 4821"));
        assert!(body.contains(&format_date(Utc.timestamp_opt(10, 0).unwrap())));
        assert!(body.contains("SMS to Mail"));
    }

    #[test]
    fn grouped_body_lists_newest_first() {
        let group = vec![sms("older", 100), sms("newest", 300), sms("middle", 200)];
        let body = grouped_body(&rule(RulePriority::Normal), &group, &footer());

        assert!(body.contains("Nombre de messages: 3"));
        let newest = body.find("newest").unwrap();
        let middle = body.find("middle").unwrap();
        let older = body.find("older").unwrap();
        assert!(newest < middle && middle < older);
        assert!(body.contains("Message 1/3"));
        assert!(body.contains("Message 3/3"));
        assert_eq!(body.matches(LIGHT_RULE).count(), 2);
    }

    #[test]
    fn individual_body_layout() {
        let r = FilterRule::new("Banque", vec!["virement".into()], "Finance", "me@example.com");
        let message = sms("Virement reçu", 10);
        let expected = format!(
            "📱 SMS - Libellé: Finance\n\
             🏷️ Règle: Banque\n\
             🔑 Mots-clés correspondants: virement\n\n\
             {HEAVY_RULE}\n\n\
             👤 Expéditeur: BANK\n\
             🕐 Date: {}\n\
             💬 Contenu:\nVirement reçu\n\n\
             {HEAVY_RULE}\n\
             🤖 Envoyé automatiquement par SMS to Mail\n\
             📱 Application: {APPLICATION_ID}\n\
             ⏰ Traité le: {}",
            format_date(message.timestamp),
            format_date(footer().processed_at)
        );
        assert_eq!(individual_body(&r, &message, &footer()), expected);
        assert!(APPLICATION_ID.starts_with("sms-to-mail "));
    }

    #[test]
    fn grouped_body_is_deterministic() {
        let group = vec![sms("a", 1), sms("b", 2)];
        let r = rule(RulePriority::High);
        assert_eq!(
            grouped_body(&r, &group, &footer()),
            grouped_body(&r, &group, &footer())
        );
    }
}
