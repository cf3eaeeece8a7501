//! Scrub API-key-like substrings from text before it reaches disk.

use regex::Regex;
use std::sync::LazyLock;

static BEARER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9_\-.=]{12,}").expect("valid bearer regex")
});

static SK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bsk-[A-Za-z0-9]{12,}\b").expect("valid sk- regex"));

static AIZA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bAIza[A-Za-z0-9_\-]{16,}\b").expect("valid AIza regex"));

/// Replaces bearer tokens, `sk-` keys, and `AIza` keys with `[REDACTED]`.
///
/// The `bearer` keyword is preserved; the token itself is replaced. Idempotent:
/// running `redact` on its own output is a no-op.
pub fn redact(s: &str) -> String {
    let pass1 = BEARER_RE.replace_all(s, "bearer [REDACTED]");
    let pass2 = SK_RE.replace_all(&pass1, "[REDACTED]");
    let pass3 = AIZA_RE.replace_all(&pass2, "[REDACTED]");
    pass3.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1() {
        let input = "key sk-ABCDEFGHIJKL and bearer eyJhbGciOi.DEF_12345678";
        assert_eq!(redact(input), "key [REDACTED] and bearer [REDACTED]");
    }

    #[test]
    fn idempotent() {
        let input = "key sk-ABCDEFGHIJKL and bearer eyJhbGciOi.DEF_12345678 AIzaSyABCDEFGHIJKLMNOP";
        let once = redact(input);
        let twice = redact(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn leaves_short_tokens_alone() {
        // Below the length threshold; not a real key-shaped token.
        let input = "sk-short bearer abc";
        assert_eq!(redact(input), input);
    }

    #[test]
    fn redacts_aiza_key() {
        let input = "gemini key AIzaSyDxxxxxxxxxxxxxxxxxxxxxxxx in use";
        let out = redact(input);
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains("AIzaSyD"));
    }

    #[test]
    fn no_secret_passthrough() {
        let input = "just a normal sentence with no secrets";
        assert_eq!(redact(input), input);
    }

    #[test]
    fn bearer_case_insensitive() {
        let input = "Authorization: Bearer abcDEF123456789";
        let out = redact(input);
        assert!(out.to_lowercase().contains("bearer [redacted]"));
    }

    #[test]
    fn multiple_secrets_in_one_string() {
        let input = "sk-AAAAAAAAAAAA then AIzaBBBBBBBBBBBBBBBB then bearer CCCCCCCCCCCC";
        let out = redact(input);
        assert_eq!(out.matches("[REDACTED]").count(), 3);
    }
}
