//! Sensitive-content detection.
//!
//! Best effort: over-blurring is preferred to leaking, so the patterns are
//! deliberately loose.

use std::sync::OnceLock;

use regex::Regex;

use crate::dom::ElementData;

/// Inline `filter` applied to redacted elements. Blurs and suppresses colour
/// without touching layout.
pub const REDACTION_FILTER: &str = "blur(6px) grayscale(100%)";

/// Opt-in marker attribute for elements that must always be redacted
pub const SENSITIVE_MARKER: &str = "data-sensitive";

const FIELD_TOKENS: &[&str] = &[
    "password", "passwd", "pwd", "cc-number", "ccnumber", "cardnumber", "card-number", "card_number",
    "creditcard", "credit-card", "cvc", "cvv", "csc", "securitycode", "security-code", "ssn",
    "social-security", "socialsecurity", "email", "e-mail",
];

/// Pattern classes scanned for in rendered text and free-text field values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternClass {
    CreditCard,
    Email,
    Ssn,
    Phone,
}

fn patterns() -> &'static [(PatternClass, Regex)] {
    static PATTERNS: OnceLock<Vec<(PatternClass, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                PatternClass::CreditCard,
                Regex::new(r"\b(?:\d{4}[ -]?){3}\d{1,4}\b|\b\d{4}[ -]?\d{6}[ -]?\d{5}\b").unwrap(),
            ),
            (
                PatternClass::Email,
                Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
            ),
            (PatternClass::Ssn, Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()),
            (
                PatternClass::Phone,
                Regex::new(r"(?:\+\d{1,3}[ .-]?)?(?:\(\d{3}\)|\b\d{3})[ .-]?\d{3}[ .-]?\d{4}\b").unwrap(),
            ),
        ]
    })
}

/// Pattern classes found in `text`.
pub fn classify(text: &str) -> Vec<PatternClass> {
    patterns()
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(class, _)| *class)
        .collect()
}

pub fn contains_sensitive_text(text: &str) -> bool {
    patterns().iter().any(|(_, re)| re.is_match(text))
}

/// Whether an element matches a sensitive input-field signature or carries
/// the opt-in marker.
pub fn is_sensitive_field(el: &ElementData) -> bool {
    if el.attr(SENSITIVE_MARKER).is_some() {
        return true;
    }
    if !el.is_form_field() {
        return false;
    }
    if let Some(t) = el.attr("type") {
        let t = t.to_ascii_lowercase();
        if t == "password" || t == "email" {
            return true;
        }
    }
    ["name", "id", "placeholder", "autocomplete", "aria-label"]
        .iter()
        .filter_map(|a| el.attr(a))
        .map(|v| v.to_ascii_lowercase())
        .any(|v| FIELD_TOKENS.iter().any(|tok| v.contains(tok)))
}

/// Whether the element holds free text whose value should be scanned.
pub fn is_free_text_field(el: &ElementData) -> bool {
    match el.tag.as_str() {
        "textarea" => true,
        "input" => matches!(
            el.attr("type").map(|t| t.to_ascii_lowercase()).as_deref(),
            None | Some("text") | Some("search") | Some("tel") | Some("url") | Some("number")
        ),
        _ => false,
    }
}
