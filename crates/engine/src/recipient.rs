use flow_core::{Recipient, RecipientMatchType};
use regex::Regex;

use crate::util::digit_stream;

/// A recipient resolved from free-text counterparty data, with provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipientMatch {
    pub recipient: Recipient,
    pub match_type: RecipientMatchType,
}

struct CompiledRecipient {
    recipient: Recipient,
    phone_digits: Option<String>,
    account_lower: Option<String>,
    account_last4: Option<String>,
    long_words: Vec<String>,
    short_name_re: Option<Regex>,
}

/// Resolves a transfer's free-text counterparty to a known contact.
///
/// Matching is strategy-major: every recipient is tried at one priority
/// level before any recipient is tried at the next, so a text containing
/// both a recognizable phone number and a recognizable short name always
/// resolves via the phone. Within a level, recipients keep their stored
/// order. No match is not an error.
pub struct RecipientMatcher {
    recipients: Vec<CompiledRecipient>,
}

/// Strip non-digits and a leading 974 country code (when at least 8 digits
/// remain without it).
pub fn normalize_phone(raw: &str) -> String {
    let digits = digit_stream(raw);
    if let Some(rest) = digits.strip_prefix("974") {
        if rest.len() >= 8 {
            return rest.to_string();
        }
    }
    digits
}

impl RecipientMatcher {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        let recipients = recipients
            .into_iter()
            .map(|recipient| {
                let phone_digits = recipient
                    .phone
                    .as_deref()
                    .map(normalize_phone)
                    .filter(|p| !p.is_empty());
                let account_lower = recipient
                    .bank_account
                    .as_deref()
                    .map(|a| a.trim().to_lowercase())
                    .filter(|a| !a.is_empty());
                let account_last4 = account_lower.as_deref().map(digit_stream).and_then(|d| {
                    (d.len() >= 4).then(|| d[d.len() - 4..].to_string())
                });
                let long_words = recipient
                    .long_name
                    .as_deref()
                    .map(|n| {
                        n.to_lowercase()
                            .split_whitespace()
                            .filter(|w| w.len() > 2)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                // Whole-word match on the short name; SMS names are unpredictable
                // enough that the pattern must be escaped.
                let short_name_re = recipient
                    .short_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| s.len() >= 3)
                    .and_then(|s| {
                        Regex::new(&format!(r"(?i)\b{}\b", regex::escape(s))).ok()
                    });
                CompiledRecipient {
                    recipient,
                    phone_digits,
                    account_lower,
                    account_last4,
                    long_words,
                    short_name_re,
                }
            })
            .collect();
        Self { recipients }
    }

    pub fn match_text(&self, counterparty: &str) -> Option<RecipientMatch> {
        let text = counterparty.trim();
        if text.is_empty() {
            return None;
        }
        let text_lower = text.to_lowercase();
        let text_digits = digit_stream(text);

        let strategies: [(RecipientMatchType, fn(&CompiledRecipient, &str, &str, &str) -> bool);
            5] = [
            (RecipientMatchType::Phone, match_phone),
            (RecipientMatchType::Account, match_account),
            (RecipientMatchType::Name, match_name_forward),
            (RecipientMatchType::Name, match_name_reverse),
            (RecipientMatchType::ShortName, match_short_name),
        ];

        for (match_type, matches) in strategies {
            for cr in &self.recipients {
                if matches(cr, text, &text_lower, &text_digits) {
                    return Some(RecipientMatch {
                        recipient: cr.recipient.clone(),
                        match_type,
                    });
                }
            }
        }
        None
    }
}

fn match_phone(cr: &CompiledRecipient, _text: &str, _lower: &str, digits: &str) -> bool {
    cr.phone_digits
        .as_deref()
        .is_some_and(|p| !digits.is_empty() && digits.contains(p))
}

fn match_account(cr: &CompiledRecipient, _text: &str, lower: &str, digits: &str) -> bool {
    if cr.account_lower.as_deref().is_some_and(|a| lower.contains(a)) {
        return true;
    }
    cr.account_last4
        .as_deref()
        .is_some_and(|last4| digits.contains(last4))
}

/// Every significant word of the recipient's long name appears in the text.
fn match_name_forward(cr: &CompiledRecipient, _text: &str, lower: &str, _digits: &str) -> bool {
    !cr.long_words.is_empty() && cr.long_words.iter().all(|w| lower.contains(w.as_str()))
}

/// Every significant word of the text appears in the recipient's long name.
/// Handles truncated or reordered SMS names ("Afif Bou Nassif" matching
/// "AFIF BOU NASSIF OR NICOLE DAOU").
fn match_name_reverse(cr: &CompiledRecipient, _text: &str, lower: &str, _digits: &str) -> bool {
    let Some(long_name) = cr.recipient.long_name.as_deref() else {
        return false;
    };
    let long_lower = long_name.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().filter(|w| w.len() > 2).collect();
    !words.is_empty() && words.iter().all(|w| long_lower.contains(w))
}

fn match_short_name(cr: &CompiledRecipient, text: &str, _lower: &str, _digits: &str) -> bool {
    cr.short_name_re.as_ref().is_some_and(|re| re.is_match(text))
}
