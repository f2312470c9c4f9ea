//! Scenario-driven test runner
//!
//! Reads declarative YAML scenarios and interprets their steps against a
//! [`crate::session::Session`], one run per fixture build mode.

mod config;
mod runner;

pub use config::*;
pub use runner::{build_spec, load_scenario, run_scenario, RunOptions, Status, StepFailure, TestResult};
