//! CLI command handling
//!
//! Runs scenarios and prints results.

use std::path::Path;

use colored::Colorize;

use crate::build::build_target;
use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::locate::locate_in_file;
use crate::testing::{self, RunOptions, Status, TestResult};

/// Dispatch a CLI command
///
/// Returns whether the command succeeded; errors are reserved for problems
/// that stop the command from running at all.
pub async fn dispatch(command: Commands, config: &Config, verbose: bool) -> Result<bool> {
    match command {
        Commands::Run {
            path,
            mode,
            adapter,
            timeout,
            keep_going,
        } => {
            let opts = RunOptions {
                mode,
                adapter,
                timeout_secs: timeout,
                keep_going,
                verbose,
            };
            let results = testing::run_scenario(&path, config, &opts).await?;
            print_summary(&results);
            Ok(results.iter().all(TestResult::ok))
        }

        Commands::Build { path, mode } => {
            let scenario = testing::load_scenario(&path)?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let spec = testing::build_spec(&scenario, dir, config).ok_or_else(|| {
                Error::Config(format!("Scenario '{}' has no build section", scenario.name))
            })?;
            let artifact = build_target(&spec, mode).await?;
            println!("{}", artifact.display());
            Ok(true)
        }

        Commands::Locate { source, marker } => {
            let line = locate_in_file(&source, &marker)?;
            println!("{}:{}", source.display(), line);
            Ok(true)
        }

        Commands::Check { path } => {
            let scenario = testing::load_scenario(&path)?;
            scenario.validate()?;
            println!(
                "{} {} ({} steps)",
                "✓".green(),
                scenario.name,
                scenario.steps.len()
            );
            Ok(true)
        }
    }
}

fn print_summary(results: &[TestResult]) {
    if results.len() < 2 {
        return;
    }

    println!("{}", "Summary:".bold());
    for result in results {
        let mode = result
            .mode
            .map(|m| m.to_string())
            .unwrap_or_else(|| "prebuilt".to_string());
        match &result.status {
            Status::Passed => println!("  {} {} [{}]", "✓".green(), result.name, mode),
            Status::Failed => println!(
                "  {} {} [{}]: {} failure(s), {}/{} steps run",
                "✗".red(),
                result.name,
                mode,
                result.failures.len(),
                result.steps_run,
                result.steps_total
            ),
            Status::Skipped(reason) => println!(
                "  {} {} [{}]: skipped, {}",
                "-".yellow(),
                result.name,
                mode,
                reason
            ),
        }
    }
}
