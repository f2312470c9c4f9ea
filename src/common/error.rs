//! Error types for the session driver
//!
//! The first group of variants is the harness failure taxonomy: what a
//! scenario author sees in a failure report. The rest are plumbing errors
//! from the adapter, the wire protocol and the filesystem.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the driver
#[derive(Error, Debug)]
pub enum Error {
    // === Harness Failures ===
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Failed to launch target: {0}")]
    Launch(String),

    #[error("Cannot resolve breakpoint pattern '{pattern}': {reason}")]
    BreakpointResolution { pattern: String, reason: String },

    #[error("Expected stop reason '{expected}', got '{actual}'")]
    UnexpectedStopReason { expected: String, actual: String },

    #[error("'{expression}' is missing pattern(s) {}", .missing.join(", "))]
    PatternMismatch {
        expression: String,
        missing: Vec<String>,
        rendered: String,
    },

    #[error("Target did not stop within {0:?}")]
    Timeout(Duration),

    // === Session Errors ===
    #[error("Cannot {action} while session is {state}")]
    InvalidState { action: String, state: String },

    // === Adapter Errors ===
    #[error("Debug adapter '{name}' not found. Searched: {searched}")]
    AdapterNotFound { name: String, searched: String },

    #[error("Debug adapter failed to start: {0}")]
    AdapterStartFailed(String),

    #[error("Debug adapter exited unexpectedly")]
    AdapterCrashed,

    // === DAP Protocol Errors ===
    #[error("DAP protocol error: {0}")]
    DapProtocol(String),

    #[error("DAP request '{command}' failed: {message}")]
    DapRequestFailed { command: String, message: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an adapter not found error with search paths
    pub fn adapter_not_found<S: AsRef<str>>(name: &str, paths: &[S]) -> Self {
        Self::AdapterNotFound {
            name: name.to_string(),
            searched: paths.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }

    /// Create a DAP request failed error
    pub fn dap_request_failed(command: &str, message: &str) -> Self {
        Self::DapRequestFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: &str) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create a breakpoint resolution error
    pub fn unresolved(pattern: &str, reason: impl Into<String>) -> Self {
        Self::BreakpointResolution {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a file read error
    pub fn file_read(path: &std::path::Path, error: &io::Error) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Whether this error aborts the remaining scripted steps.
    ///
    /// Assertion-class outcomes leave the session usable; everything else
    /// means the session can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::UnexpectedStopReason { .. }
                | Error::PatternMismatch { .. }
                | Error::TestAssertion(_)
        )
    }

    /// Stable code used in failure reports
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Setup(_) => "SETUP",
            Error::Launch(_) => "LAUNCH",
            Error::BreakpointResolution { .. } => "BREAKPOINT_RESOLUTION",
            Error::UnexpectedStopReason { .. } => "UNEXPECTED_STOP_REASON",
            Error::PatternMismatch { .. } => "PATTERN_MISMATCH",
            Error::Timeout(_) => "TIMEOUT",
            Error::InvalidState { .. } => "INVALID_STATE",
            Error::AdapterNotFound { .. } => "ADAPTER_NOT_FOUND",
            Error::AdapterStartFailed(_) | Error::AdapterCrashed => "ADAPTER_FAILED",
            Error::DapProtocol(_) | Error::DapRequestFailed { .. } => "DAP",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG",
            Error::Io(_) | Error::FileRead { .. } => "IO",
            Error::Json(_) => "JSON",
            Error::TestAssertion(_) => "ASSERTION",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assertion_class_errors_are_not_fatal() {
        let mismatch = Error::PatternMismatch {
            expression: "iset".to_string(),
            missing: vec!["size=5 {".to_string()],
            rendered: String::new(),
        };
        assert!(!mismatch.is_fatal());
        assert!(!Error::UnexpectedStopReason {
            expected: "breakpoint".to_string(),
            actual: "signal".to_string(),
        }
        .is_fatal());
        assert!(!Error::TestAssertion("modules".to_string()).is_fatal());
    }

    #[test]
    fn test_setup_class_errors_are_fatal() {
        assert!(Error::Setup("no a.out".to_string()).is_fatal());
        assert!(Error::Launch("exec failed".to_string()).is_fatal());
        assert!(Error::unresolved("marker", "not found").is_fatal());
        assert!(Error::Timeout(Duration::from_secs(30)).is_fatal());
        assert!(Error::AdapterCrashed.is_fatal());
    }

    #[test]
    fn test_pattern_mismatch_names_expression_and_patterns() {
        let err = Error::PatternMismatch {
            expression: "mmap".to_string(),
            missing: vec!["first = 3".to_string(), "second = \"this\"".to_string()],
            rendered: "size=6 {}".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("'mmap'"));
        assert!(message.contains("first = 3, second = \"this\""));
        assert_eq!(err.kind(), "PATTERN_MISMATCH");
    }
}
