//! sdbg - scripted debug session driver
//!
//! Drives a debugger through the Debug Adapter Protocol to run data
//! formatter regression scenarios: build a fixture, break on a source
//! marker, inspect variables against expected patterns and restore the
//! debugger's formatter configuration afterwards.

pub mod build;
pub mod cli;
pub mod commands;
pub mod common;
pub mod dap;
pub mod formatter;
pub mod locate;
pub mod pattern;
pub mod session;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use session::{Session, SessionState};
