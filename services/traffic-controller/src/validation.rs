//! Input normalization and message classification

use regex::Regex;
use std::sync::OnceLock;

/// Normalize a phone identifier for keyed lookups
///
/// Separators people type (spaces, dashes, dots, parentheses) are dropped; a
/// leading `+` is kept. No other rewriting happens: lookups are exact.
pub fn normalize_phone(phone: &str) -> String {
    let trimmed = phone.trim();
    let mut normalized = String::with_capacity(trimmed.len());

    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '+' if i == 0 => normalized.push(c),
            '+' | ' ' | '-' | '.' | '(' | ')' => {}
            _ => normalized.push(c),
        }
    }

    normalized
}

/// Whether a message body is a PIN attempt: 4 to 6 digits and nothing else
pub fn is_pin_attempt(message: &str) -> bool {
    static PIN_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex =
        PIN_REGEX.get_or_init(|| Regex::new(r"^[0-9]{4,6}$").expect("Failed to compile PIN regex"));

    regex.is_match(message.trim())
}

/// Lowercase with Turkish dotted/dotless `i` folded together
fn fold_case(text: &str) -> String {
    text.to_lowercase()
        .replace('\u{307}', "")
        .replace('ı', "i")
}

/// Whether the message asks to end the session
///
/// Matching is case-insensitive containment of any vocabulary entry.
pub fn has_cancel_intent(message: &str, vocabulary: &[String]) -> bool {
    let folded = fold_case(message);

    vocabulary
        .iter()
        .map(|word| fold_case(word))
        .filter(|word| !word.is_empty())
        .any(|word| folded.contains(&word))
}
