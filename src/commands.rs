//! CLI command definitions
//!
//! Defines the clap commands for the sdbg CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::build::BuildMode;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a YAML test scenario against a debug adapter
    Run {
        /// Path to the YAML test scenario file
        path: PathBuf,

        /// Only run this build mode (default: every mode the scenario lists)
        #[arg(long, value_enum)]
        mode: Option<BuildMode>,

        /// Debug adapter to use (overrides the scenario and config)
        #[arg(long)]
        adapter: Option<String>,

        /// Seconds to wait for each stop after a resume
        #[arg(long)]
        timeout: Option<u64>,

        /// Record assertion failures and keep running the remaining steps
        #[arg(long)]
        keep_going: bool,
    },

    /// Build a scenario's fixture without running it
    Build {
        /// Path to the YAML test scenario file
        path: PathBuf,

        /// Build mode (default: dwarf)
        #[arg(long, value_enum, default_value = "dwarf")]
        mode: BuildMode,
    },

    /// Print the line of a source file that a marker resolves to
    Locate {
        /// Source file to scan
        source: PathBuf,

        /// Regular expression matching exactly one line
        marker: String,
    },

    /// Parse and validate a scenario without running it
    Check {
        /// Path to the YAML test scenario file
        path: PathBuf,
    },
}
