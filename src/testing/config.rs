//! Test scenario configuration types
//!
//! Defines the data structures for deserializing YAML test scenarios.

use serde::Deserialize;
use std::path::PathBuf;

use crate::build::BuildMode;
use crate::common::{Error, Result};
use crate::pattern::Matcher;

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct TestScenario {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// Optional setup steps to run before the test
    pub setup: Option<Vec<SetupStep>>,
    /// How to compile the fixture, if the scenario builds it
    pub build: Option<BuildConfig>,
    /// Configuration for the debug target
    pub target: TargetConfig,
    /// Where the session breaks
    pub breakpoint: BreakpointConfig,
    /// Register the formatter reset cleanup (default: true)
    #[serde(default = "default_true")]
    pub formatter_reset: bool,
    /// Extra raw commands run during teardown
    #[serde(default)]
    pub cleanup: Vec<String>,
    /// Per-resume stop timeout in seconds
    pub timeout_secs: Option<u64>,
    /// The sequence of test steps to execute
    pub steps: Vec<TestStep>,
    /// Inspections run after cleanup, while the target is still stopped
    #[serde(default)]
    pub verify_after_cleanup: Vec<Inspection>,
}

fn default_true() -> bool {
    true
}

/// A setup step that runs before the test
#[derive(Deserialize, Debug)]
pub struct SetupStep {
    /// Shell command to execute
    pub shell: String,
}

/// Fixture build section
#[derive(Deserialize, Debug)]
pub struct BuildConfig {
    /// Source files, relative to the scenario
    pub sources: Vec<PathBuf>,
    /// Executable to produce (default: `a.out`)
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// Compiler (default from config file)
    pub compiler: Option<String>,
    /// Compiler flags (default from config file)
    pub flags: Option<Vec<String>>,
    /// Debug-info layouts to run the scenario under (default: all)
    #[serde(default = "BuildMode::all")]
    pub modes: Vec<BuildMode>,
}

fn default_output() -> PathBuf {
    PathBuf::from("a.out")
}

/// Configuration for the debug target
#[derive(Deserialize, Debug)]
pub struct TargetConfig {
    /// Path to the program to debug; defaults to the build output
    pub program: Option<PathBuf>,
    /// Arguments to pass to the program
    #[serde(default)]
    pub args: Vec<String>,
    /// Debug adapter to use (e.g., "lldb-dap")
    pub adapter: Option<String>,
}

/// Source-marker breakpoint
#[derive(Deserialize, Debug)]
pub struct BreakpointConfig {
    /// Regex matching exactly one line of `source`
    pub marker: String,
    /// Source file holding the marker, relative to the scenario
    pub source: PathBuf,
}

/// A single test step in the execution flow
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Check why the target is stopped
    AssertStopped {
        #[serde(default = "default_reason")]
        reason: String,
    },
    /// Check that libraries are loaded
    ExpectModules {
        #[serde(default)]
        contains: Vec<String>,
        /// Add the host's libc++ runtime names
        #[serde(default)]
        libcxx: bool,
    },
    /// Inspect a variable, check its rendering, resume
    InspectAndContinue {
        expression: String,
        patterns: Vec<PatternSpec>,
    },
    /// Inspect a variable without resuming
    Inspect {
        expression: String,
        patterns: Vec<PatternSpec>,
    },
    /// Resume to the next breakpoint hit
    Continue,
    /// Run a raw debugger command
    Command {
        command: String,
        /// Patterns the command output must contain
        #[serde(default)]
        expect: Vec<PatternSpec>,
    },
    /// Check that the target has exited
    ExpectExit { exit_code: Option<i32> },
}

fn default_reason() -> String {
    crate::session::BREAKPOINT.to_string()
}

impl TestStep {
    /// Short description for progress and failure reports
    pub fn label(&self) -> String {
        match self {
            TestStep::AssertStopped { reason } => format!("assert stopped ({})", reason),
            TestStep::ExpectModules { .. } => "expect modules".to_string(),
            TestStep::InspectAndContinue { expression, .. } => {
                format!("inspect and continue '{}'", expression)
            }
            TestStep::Inspect { expression, .. } => format!("inspect '{}'", expression),
            TestStep::Continue => "continue".to_string(),
            TestStep::Command { command, .. } => format!("command '{}'", command),
            TestStep::ExpectExit { .. } => "expect exit".to_string(),
        }
    }
}

/// An inspection without a resume
#[derive(Deserialize, Debug)]
pub struct Inspection {
    pub expression: String,
    pub patterns: Vec<PatternSpec>,
}

/// Pattern as written in YAML: a bare string is a literal substring
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum PatternSpec {
    Substring(String),
    Regex { regex: String },
}

impl PatternSpec {
    pub fn compile(&self) -> Result<Matcher> {
        match self {
            PatternSpec::Substring(s) => Ok(Matcher::substring(s.clone())),
            PatternSpec::Regex { regex } => Matcher::regex(regex),
        }
    }
}

/// Compile a list of patterns
pub fn compile_all(patterns: &[PatternSpec]) -> Result<Vec<Matcher>> {
    patterns.iter().map(PatternSpec::compile).collect()
}

/// Names of the libc++ runtime libraries on this host
pub fn libcxx_modules() -> Vec<String> {
    if cfg!(target_os = "macos") {
        vec!["libc++.1.dylib".to_string(), "libc++abi.dylib".to_string()]
    } else {
        vec!["libc++.so.1".to_string()]
    }
}

impl TestScenario {
    /// Check everything that can be checked without a debugger
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::Config(format!("Scenario '{}' has no steps", self.name)));
        }
        if self.target.program.is_none() && self.build.is_none() {
            return Err(Error::Config(
                "target.program is required when there is no build section".to_string(),
            ));
        }
        if let Some(build) = &self.build {
            if build.sources.is_empty() {
                return Err(Error::Config("build.sources is empty".to_string()));
            }
            if build.modes.is_empty() {
                return Err(Error::Config("build.modes is empty".to_string()));
            }
        }
        if self.timeout_secs == Some(0) {
            return Err(Error::Config("timeout_secs must be positive".to_string()));
        }

        regex::Regex::new(&self.breakpoint.marker).map_err(|e| {
            Error::Config(format!("Invalid breakpoint marker '{}': {}", self.breakpoint.marker, e))
        })?;

        for (i, step) in self.steps.iter().enumerate() {
            let patterns = match step {
                TestStep::InspectAndContinue { patterns, .. }
                | TestStep::Inspect { patterns, .. } => patterns.as_slice(),
                TestStep::Command { expect, .. } => expect.as_slice(),
                TestStep::ExpectModules { contains, libcxx } => {
                    if contains.is_empty() && !libcxx {
                        return Err(Error::Config(format!(
                            "Step {}: expect_modules names no module",
                            i + 1
                        )));
                    }
                    continue;
                }
                _ => continue,
            };
            compile_all(patterns)
                .map_err(|e| Error::Config(format!("Step {} ({}): {}", i + 1, step.label(), e)))?;
        }

        for check in &self.verify_after_cleanup {
            compile_all(&check.patterns)?;
        }
        Ok(())
    }
}
