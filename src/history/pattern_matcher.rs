//! Pattern matching for history target filtering
//!
//! A filter is matched exactly unless it contains glob characters, in which
//! case it is treated as a glob pattern (`10.0.0.*`, `*.example.org`).

use anyhow::{anyhow, Result};
use glob::Pattern;

/// Check if a filter string contains glob pattern characters
pub fn is_glob_pattern(filter: &str) -> bool {
    filter.contains('*') || filter.contains('?') || filter.contains('[')
}

/// Match a scan target against a filter using either exact or glob matching
///
/// An invalid glob falls back to exact comparison.
pub fn matches_target_filter(target: &str, filter: &str) -> bool {
    if is_glob_pattern(filter) {
        match Pattern::new(filter) {
            Ok(pattern) => pattern.matches(target),
            Err(_) => target == filter,
        }
    } else {
        target == filter
    }
}

/// Reject filters that look like globs but do not compile
pub fn validate_target_filter(filter: &str) -> Result<()> {
    if is_glob_pattern(filter) {
        Pattern::new(filter).map_err(|e| anyhow!("Invalid glob pattern '{}': {}", filter, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_glob_pattern() {
        assert!(!is_glob_pattern("10.0.0.5"));
        assert!(!is_glob_pattern("scanme.example.org"));
        assert!(is_glob_pattern("10.0.0.*"));
        assert!(is_glob_pattern("host?"));
        assert!(is_glob_pattern("10.0.0.[12]"));
    }

    #[test]
    fn test_exact_matching() {
        assert!(matches_target_filter("10.0.0.5", "10.0.0.5"));
        // Substrings are not matches
        assert!(!matches_target_filter("10.0.0.50", "10.0.0.5"));
        assert!(!matches_target_filter("WEB01", "web01"));
    }

    #[test]
    fn test_glob_matching() {
        assert!(matches_target_filter("10.0.0.5", "10.0.0.*"));
        assert!(matches_target_filter("10.0.0.0/24", "10.0.0.*"));
        assert!(matches_target_filter("db.example.org", "*.example.org"));
        assert!(!matches_target_filter("192.168.1.1", "10.*"));
        assert!(matches_target_filter("host1", "host?"));
        assert!(!matches_target_filter("host12", "host?"));
    }

    #[test]
    fn test_invalid_glob_falls_back_to_exact() {
        assert!(matches_target_filter("10.0.0.[", "10.0.0.["));
        assert!(validate_target_filter("10.0.0.[").is_err());
        assert!(validate_target_filter("10.0.0.*").is_ok());
        assert!(validate_target_filter("plain").is_ok());
    }
}
