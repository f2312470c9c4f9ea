//! Breakpoint placement by source marker
//!
//! Scenarios name a sentinel comment instead of a line number.

use std::path::Path;

use regex::Regex;

use crate::common::{Error, Result};

/// Find the 1-based line whose text matches `marker`
///
/// `marker` is a regular expression. Exactly one line must match; zero or
/// several matches are resolution errors.
pub fn locate(source_text: &str, marker: &str) -> Result<u32> {
    let re = Regex::new(marker)
        .map_err(|e| Error::unresolved(marker, format!("invalid pattern: {}", e)))?;

    let hits: Vec<u32> = source_text
        .lines()
        .enumerate()
        .filter(|(_, line)| re.is_match(line))
        .map(|(i, _)| i as u32 + 1)
        .collect();

    match hits.as_slice() {
        [line] => Ok(*line),
        [] => Err(Error::unresolved(marker, "no matching line")),
        many => Err(Error::unresolved(
            marker,
            format!(
                "ambiguous, matches lines {}",
                many.iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        )),
    }
}

/// [`locate`] over the contents of a file
pub fn locate_in_file(path: &Path, marker: &str) -> Result<u32> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, &e))?;
    locate(&text, marker).map_err(|e| match e {
        Error::BreakpointResolution { pattern, reason } => Error::BreakpointResolution {
            pattern,
            reason: format!("{} in {}", reason, path.display()),
        },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "int main() {\n  int x = 0;\n  x++; // Set break point at this line.\n  return x;\n}\n";

    #[test]
    fn test_single_match() {
        assert_eq!(locate(SOURCE, "Set break point at this line.").unwrap(), 3);
    }

    #[test]
    fn test_first_line_is_one() {
        assert_eq!(locate(SOURCE, "^int main").unwrap(), 1);
    }

    #[test]
    fn test_no_match() {
        let err = locate(SOURCE, "not in the file").unwrap_err();
        assert!(matches!(err, Error::BreakpointResolution { .. }));
        assert!(err.to_string().contains("no matching line"));
    }

    #[test]
    fn test_ambiguous_match_lists_lines() {
        let err = locate(SOURCE, "x").unwrap_err();
        assert!(err.to_string().contains("2, 3, 4"), "{}", err);
    }

    #[test]
    fn test_invalid_regex() {
        let err = locate(SOURCE, "(unclosed").unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[test]
    fn test_crlf_source() {
        assert_eq!(locate("a\r\nb // mark\r\nc\r\n", "mark$").unwrap(), 2);
    }

    #[test]
    fn test_locate_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.cpp");
        std::fs::write(&path, SOURCE).unwrap();
        assert_eq!(locate_in_file(&path, "Set break point").unwrap(), 3);

        let err = locate_in_file(&dir.path().join("missing.cpp"), "x").unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }
}
