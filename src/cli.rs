//! Shared CLI helpers for the three binaries.

use regex::Regex;

/// Clap value parser for user-supplied exclusion patterns, so a bad regex
/// is reported at argument-parse time instead of mid-sync.
pub fn parse_regex(s: &str) -> Result<Regex, regex::Error> {
    Regex::new(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_pattern() {
        assert!(parse_regex(r"\.tmp$").is_ok());
    }

    #[test]
    fn rejects_invalid_pattern() {
        assert!(parse_regex("(").is_err());
    }
}
