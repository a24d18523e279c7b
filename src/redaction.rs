//! Pattern-driven PII redaction.
//!
//! The default rule set covers phone numbers, email addresses, US SSNs
//! (with the standard validity constraints checked outside the regex), and
//! credit-card numbers for the major brands. Custom rules can be appended.
//! Replacement happens right-to-left so recorded match offsets stay valid
//! against the original text, and replacement tokens never re-match any
//! rule, making redaction idempotent.

use miette::Diagnostic;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RedactionError {
    #[error("invalid redaction pattern '{name}': {source}")]
    #[diagnostic(code(safetydesk::redaction::pattern))]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// One redaction rule: a named pattern and its replacement token.
pub struct RedactionRule {
    pub name: String,
    pattern: Regex,
    pub replacement: String,
    validator: Option<fn(&str) -> bool>,
}

/// A single redacted span, positioned against the original text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RedactionMatch {
    pub rule: String,
    pub original_value: String,
    pub redacted_value: String,
    pub start_position: usize,
    pub length: usize,
}

/// Outcome of one redaction pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RedactionResult {
    pub original: String,
    pub redacted: String,
    pub matches: Vec<RedactionMatch>,
}

impl RedactionResult {
    pub fn was_redacted(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// Compiled redaction engine.
pub struct Redactor {
    rules: Vec<RedactionRule>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Redactor {
    /// Build a redactor with the default PII rule set.
    pub fn new() -> Self {
        // Compile order is priority order: earlier rules win overlaps.
        let rules = vec![
            RedactionRule {
                name: "ssn".to_string(),
                pattern: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("static ssn pattern"),
                replacement: "[SSN-REDACTED]".to_string(),
                validator: Some(is_valid_ssn),
            },
            RedactionRule {
                name: "credit_card".to_string(),
                pattern: Regex::new(
                    r"\b(?:3[47]\d{2}[ -]?\d{6}[ -]?\d{5}|(?:4\d{3}|5[1-5]\d{2}|6011|65\d{2})(?:[ -]?\d{4}){3})\b",
                )
                .expect("static card pattern"),
                replacement: "[CARD-REDACTED]".to_string(),
                validator: Some(is_valid_card),
            },
            RedactionRule {
                name: "email".to_string(),
                pattern: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                    .expect("static email pattern"),
                replacement: "[EMAIL-REDACTED]".to_string(),
                validator: None,
            },
            RedactionRule {
                name: "phone".to_string(),
                pattern: Regex::new(r"\b(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b")
                    .expect("static phone pattern"),
                replacement: "[PHONE-REDACTED]".to_string(),
                validator: None,
            },
        ];
        Self { rules }
    }

    /// Append a custom rule. Later rules lose overlap conflicts against
    /// earlier ones.
    pub fn add_rule(
        &mut self,
        name: impl Into<String>,
        pattern: &str,
        replacement: impl Into<String>,
    ) -> Result<(), RedactionError> {
        let name = name.into();
        let pattern = Regex::new(pattern).map_err(|source| RedactionError::InvalidPattern {
            name: name.clone(),
            source,
        })?;
        self.rules.push(RedactionRule {
            name,
            pattern,
            replacement: replacement.into(),
            validator: None,
        });
        Ok(())
    }

    /// Redact all rule matches in `text`.
    pub fn redact(&self, text: &str) -> RedactionResult {
        let mut matches: Vec<RedactionMatch> = Vec::new();

        for rule in &self.rules {
            for found in rule.pattern.find_iter(text) {
                if let Some(validator) = rule.validator {
                    if !validator(found.as_str()) {
                        continue;
                    }
                }
                let overlaps = matches.iter().any(|existing| {
                    found.start() < existing.start_position + existing.length
                        && existing.start_position < found.end()
                });
                if overlaps {
                    continue;
                }
                matches.push(RedactionMatch {
                    rule: rule.name.clone(),
                    original_value: found.as_str().to_string(),
                    redacted_value: rule.replacement.clone(),
                    start_position: found.start(),
                    length: found.len(),
                });
            }
        }

        // Right-to-left so earlier offsets stay valid while splicing.
        let mut redacted = text.to_string();
        let mut ordered: Vec<&RedactionMatch> = matches.iter().collect();
        ordered.sort_by(|a, b| b.start_position.cmp(&a.start_position));
        for m in ordered {
            redacted.replace_range(
                m.start_position..m.start_position + m.length,
                &m.redacted_value,
            );
        }

        matches.sort_by_key(|m| m.start_position);
        RedactionResult {
            original: text.to_string(),
            redacted,
            matches,
        }
    }
}

/// Standard SSN validity: area not 000/666/9xx, group not 00, serial not
/// 0000.
fn is_valid_ssn(candidate: &str) -> bool {
    let mut parts = candidate.split('-');
    let (Some(area), Some(group), Some(serial)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if area == "000" || area == "666" || area.starts_with('9') {
        return false;
    }
    group != "00" && serial != "0000"
}

/// Brand prefix plus digit-count check on the separator-stripped number.
fn is_valid_card(candidate: &str) -> bool {
    let digits: String = candidate.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.as_bytes().first() {
        Some(b'3') => digits.len() == 15,
        Some(b'4') => digits.len() == 13 || digits.len() == 16,
        Some(b'5') | Some(b'6') => digits.len() == 16,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn redacts_email_and_ssn() {
        let redactor = Redactor::new();
        let result =
            redactor.redact("my email is test@example.com and SSN 123-45-6789, thanks");
        assert_eq!(
            result.redacted,
            "my email is [EMAIL-REDACTED] and SSN [SSN-REDACTED], thanks"
        );
        assert_eq!(result.matches.len(), 2);
        assert_eq!(result.matches[0].rule, "email");
        assert_eq!(result.matches[1].rule, "ssn");
        assert_eq!(
            &result.original[result.matches[1].start_position
                ..result.matches[1].start_position + result.matches[1].length],
            "123-45-6789"
        );
    }

    #[test]
    fn invalid_ssn_area_is_left_alone() {
        let redactor = Redactor::new();
        for ssn in ["000-45-6789", "666-45-6789", "900-45-6789", "123-00-6789", "123-45-0000"] {
            let result = redactor.redact(&format!("ref {ssn} end"));
            assert!(!result.was_redacted(), "{ssn} should not redact");
        }
    }

    #[test]
    fn redacts_phone_numbers() {
        let redactor = Redactor::new();
        for phone in ["555-867-5309", "(555) 867-5309", "+1 555.867.5309"] {
            let result = redactor.redact(&format!("call {phone} today"));
            assert!(result.redacted.contains("[PHONE-REDACTED]"), "{phone}");
        }
    }

    #[test]
    fn redacts_major_card_brands() {
        let redactor = Redactor::new();
        for card in [
            "4111 1111 1111 1111",
            "5500-0000-0000-0004",
            "340000000000009",
            "6011000000000004",
        ] {
            let result = redactor.redact(&format!("card {card} on file"));
            assert!(result.redacted.contains("[CARD-REDACTED]"), "{card}");
            assert!(!result.redacted.contains("[PHONE-REDACTED]"), "{card}");
        }
    }

    #[test]
    fn custom_rule_applies() {
        let mut redactor = Redactor::new();
        redactor
            .add_rule("claim_number", r"\bWC-\d{6}\b", "[CLAIM-REDACTED]")
            .unwrap();
        let result = redactor.redact("claim WC-123456 is pending");
        assert_eq!(result.redacted, "claim [CLAIM-REDACTED] is pending");
    }

    #[test]
    fn invalid_custom_pattern_errors() {
        let mut redactor = Redactor::new();
        assert!(redactor.add_rule("broken", r"[unclosed", "[X]").is_err());
    }

    #[test]
    fn redaction_is_idempotent_on_defaults() {
        let redactor = Redactor::new();
        let once = redactor.redact("test@example.com / 123-45-6789 / 555-867-5309");
        let twice = redactor.redact(&once.redacted);
        assert_eq!(once.redacted, twice.redacted);
        assert!(!twice.was_redacted());
    }

    proptest! {
        #[test]
        fn idempotence_holds_for_arbitrary_text(text in ".{0,200}") {
            let redactor = Redactor::new();
            let once = redactor.redact(&text);
            let twice = redactor.redact(&once.redacted);
            prop_assert_eq!(&once.redacted, &twice.redacted);
        }
    }
}
