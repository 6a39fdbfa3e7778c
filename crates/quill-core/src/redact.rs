//! Secret redaction for text that may reach the user.
//!
//! Upstream error messages sometimes echo part of the credential that was
//! rejected ("Incorrect API key provided: sk-abc..."). Error chunks are shown
//! to children in the UI, so they pass through [`redact_secrets`] first.

use lazy_static::lazy_static;
use regex::Regex;

/// Replacement text for any detected secret.
pub const REDACTED: &str = "[REDACTED]";

lazy_static! {
    /// OpenAI-style keys (`sk-...`, `sk-proj-...`)
    pub static ref OPENAI_KEY_PATTERN: Regex = Regex::new(
        r"\bsk-[A-Za-z0-9_-]{8,}"
    ).expect("Invalid regex");

    /// Groq keys (`gsk_...`)
    pub static ref GROQ_KEY_PATTERN: Regex = Regex::new(
        r"\bgsk_[A-Za-z0-9]{8,}"
    ).expect("Invalid regex");

    /// Bearer tokens in echoed headers
    pub static ref BEARER_PATTERN: Regex = Regex::new(
        r"(?i)bearer\s+[A-Za-z0-9._~+/-]{8,}=*"
    ).expect("Invalid regex");
}

/// Check if text contains anything that looks like a credential.
pub fn contains_secret(text: &str) -> bool {
    OPENAI_KEY_PATTERN.is_match(text)
        || GROQ_KEY_PATTERN.is_match(text)
        || BEARER_PATTERN.is_match(text)
}

/// Replace credential-shaped substrings with [`REDACTED`].
pub fn redact_secrets(text: &str) -> String {
    let out = OPENAI_KEY_PATTERN.replace_all(text, REDACTED);
    let out = GROQ_KEY_PATTERN.replace_all(&out, REDACTED);
    BEARER_PATTERN
        .replace_all(&out, format!("Bearer {REDACTED}").as_str())
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_key_redacted() {
        let msg = "Incorrect API key provided: sk-proj-abcdef123456. Check it.";
        let out = redact_secrets(msg);
        assert!(!out.contains("abcdef123456"));
        assert!(out.contains(REDACTED));
        assert!(out.ends_with("Check it."));
    }

    #[test]
    fn test_groq_key_redacted() {
        let out = redact_secrets("key gsk_ABCDEFGH12345678 rejected");
        assert_eq!(out, "key [REDACTED] rejected");
    }

    #[test]
    fn test_bearer_redacted() {
        let out = redact_secrets("Authorization: Bearer abcdefghijklmnop");
        assert_eq!(out, "Authorization: Bearer [REDACTED]");
    }

    #[test]
    fn test_plain_text_untouched() {
        let msg = "Connection refused (os error 111)";
        assert!(!contains_secret(msg));
        assert_eq!(redact_secrets(msg), msg);
    }
}
