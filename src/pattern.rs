//! Matchers for rendered debugger output

use std::fmt;

use regex::Regex;

use crate::common::{Error, Result};

/// Something that must appear somewhere in a rendering
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Literal text
    Substring(String),
    /// Regular expression, searched anywhere in the text
    Regex(Regex),
}

impl Matcher {
    pub fn substring(text: impl Into<String>) -> Self {
        Matcher::Substring(text.into())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Matcher::Regex)
            .map_err(|e| Error::Config(format!("Invalid regex '{}': {}", pattern, e)))
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Substring(s) => text.contains(s.as_str()),
            Matcher::Regex(re) => re.is_match(text),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Substring(s) => write!(f, "'{}'", s),
            Matcher::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// Matchers not satisfied by `text`, in their given order
pub fn missing(matchers: &[Matcher], text: &str) -> Vec<String> {
    matchers
        .iter()
        .filter(|m| !m.is_match(text))
        .map(Matcher::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MMAP: &str = "(std::__1::unordered_multimap<int, std::__1::basic_string<char> >) mmap = size=6 {\n  [0] = (first = 3, second = \"this\")\n  [1] = (first = 2, second = \"hello\")\n}";

    #[test]
    fn test_substring_anywhere() {
        assert!(Matcher::substring("size=6 {").is_match(MMAP));
        assert!(Matcher::substring("second = \"this\"").is_match(MMAP));
        assert!(!Matcher::substring("size=5 {").is_match(MMAP));
    }

    #[test]
    fn test_regex_spans_lines() {
        let m = Matcher::regex(r"\[\d\] = \(first = 3(\n|.)+first = 2").unwrap();
        assert!(m.is_match(MMAP));
    }

    #[test]
    fn test_substring_is_literal() {
        assert!(!Matcher::substring(r"\[\d\]").is_match(MMAP));
        assert!(Matcher::regex(r"\[\d\]").unwrap().is_match(MMAP));
    }

    #[test]
    fn test_missing_preserves_order() {
        let matchers = vec![
            Matcher::substring("size=6 {"),
            Matcher::substring("first = 9"),
            Matcher::regex("world$").unwrap(),
        ];
        assert_eq!(missing(&matchers, MMAP), vec!["'first = 9'", "/world$/"]);
        assert!(missing(&matchers[..1], MMAP).is_empty());
    }

    #[test]
    fn test_invalid_regex() {
        assert!(matches!(Matcher::regex("[").unwrap_err(), Error::Config(_)));
    }
}
