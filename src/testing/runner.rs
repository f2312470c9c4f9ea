//! Test runner implementation
//!
//! Executes a scenario once per build mode: build the fixture, drive a
//! [`Session`] through the scripted steps, then tear down.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use colored::Colorize;
use tokio::process::Command as TokioCommand;

use crate::build::{build_target, BuildMode, BuildSpec};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::formatter::FormatterConfig;
use crate::pattern;
use crate::session::{cleanup, DapDebugger, Session, SessionState, StopEvent};

use super::config::{compile_all, libcxx_modules, PatternSpec, TestScenario, TestStep};

/// Knobs from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only run this build mode
    pub mode: Option<BuildMode>,
    /// Override the scenario's adapter
    pub adapter: Option<String>,
    /// Override the per-resume timeout
    pub timeout_secs: Option<u64>,
    /// Record non-fatal failures and keep going
    pub keep_going: bool,
    pub verbose: bool,
}

/// Outcome of one scenario run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Passed,
    Failed,
    Skipped(String),
}

/// A step that did not hold
#[derive(Debug, Clone)]
pub struct StepFailure {
    /// 1-based scripted step; 0 for the preamble
    pub step: usize,
    pub label: String,
    pub kind: &'static str,
    pub message: String,
}

/// Result of a test run
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub mode: Option<BuildMode>,
    pub status: Status,
    pub steps_run: usize,
    pub steps_total: usize,
    pub failures: Vec<StepFailure>,
    pub cleanup_errors: Vec<String>,
}

impl TestResult {
    fn new(scenario: &TestScenario, mode: Option<BuildMode>) -> Self {
        Self {
            name: scenario.name.clone(),
            mode,
            status: Status::Passed,
            steps_run: 0,
            steps_total: scenario.steps.len(),
            failures: Vec::new(),
            cleanup_errors: Vec::new(),
        }
    }

    /// Passed or skipped
    pub fn ok(&self) -> bool {
        self.status != Status::Failed
    }

    fn fail(&mut self, step: usize, label: &str, error: &Error) {
        println!("  {} Step {}: {}", "✗".red(), step, label);
        println!("      {} {}", error.kind().red(), error);
        if let Error::PatternMismatch { rendered, .. } = error {
            for line in rendered.lines() {
                println!("      {}", line.dimmed());
            }
        }
        self.failures.push(StepFailure {
            step,
            label: label.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        });
        self.status = Status::Failed;
    }
}

/// Load a scenario file without validating it
pub fn load_scenario(path: &Path) -> Result<TestScenario> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read test scenario '{}': {}",
            path.display(),
            e
        ))
    })?;

    serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse test scenario: {}", e)))
}

fn scenario_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn resolve(dir: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Modes this invocation runs; `None` means a prebuilt program
fn modes(scenario: &TestScenario, opts: &RunOptions) -> Vec<Option<BuildMode>> {
    match (&scenario.build, opts.mode) {
        (None, _) => vec![None],
        (Some(_), Some(mode)) => vec![Some(mode)],
        (Some(build), None) => build.modes.iter().copied().map(Some).collect(),
    }
}

/// Compiler invocation for the scenario's build section
pub fn build_spec(scenario: &TestScenario, dir: &Path, config: &Config) -> Option<BuildSpec> {
    scenario.build.as_ref().map(|build| BuildSpec {
        dir: dir.to_path_buf(),
        sources: build.sources.clone(),
        output: build.output.clone(),
        compiler: build
            .compiler
            .clone()
            .unwrap_or_else(|| config.build.compiler.clone()),
        flags: build
            .flags
            .clone()
            .unwrap_or_else(|| config.build.flags.clone()),
    })
}

async fn run_setup(scenario: &TestScenario, dir: &Path, verbose: bool) -> Result<()> {
    let Some(setup_steps) = &scenario.setup else {
        return Ok(());
    };

    println!("\n{}", "Setup:".cyan());
    for step in setup_steps {
        if verbose {
            println!("  $ {}", step.shell.dimmed());
        }

        let status = TokioCommand::new("sh")
            .arg("-c")
            .arg(&step.shell)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(if verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .stderr(if verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .status()
            .await
            .map_err(|e| Error::Setup(format!("Setup command failed to execute: {}", e)))?;

        if !status.success() {
            return Err(Error::Setup(format!(
                "Setup command '{}' failed with exit code {:?}",
                step.shell,
                status.code()
            )));
        }
        println!("  {} {}", "✓".green(), step.shell.dimmed());
    }
    Ok(())
}

/// Run a test scenario from a YAML file, once per selected build mode
pub async fn run_scenario(path: &Path, config: &Config, opts: &RunOptions) -> Result<Vec<TestResult>> {
    let scenario = load_scenario(path)?;
    scenario.validate()?;
    let dir = scenario_dir(path);

    println!(
        "\n{} {}",
        "Running Test:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    if let Err(e) = run_setup(&scenario, &dir, opts.verbose).await {
        let mut result = TestResult::new(&scenario, None);
        result.fail(0, "setup", &e);
        return Ok(vec![result]);
    }

    let mut results = Vec::new();
    for mode in modes(&scenario, opts) {
        if let Some(mode) = mode {
            println!("\n{} {}", "Mode:".cyan(), mode.to_string().bold());
            let skip = build_spec(&scenario, &dir, config).and_then(|spec| spec.skip_reason(mode));
            if let Some(reason) = skip {
                println!("  {} {}", "-".yellow(), reason.yellow());
                let mut result = TestResult::new(&scenario, Some(mode));
                result.status = Status::Skipped(reason);
                results.push(result);
                continue;
            }
        }
        results.push(run_mode(&scenario, &dir, mode, config, opts).await);
    }
    Ok(results)
}

async fn run_mode(
    scenario: &TestScenario,
    dir: &Path,
    mode: Option<BuildMode>,
    config: &Config,
    opts: &RunOptions,
) -> TestResult {
    let mut result = TestResult::new(scenario, mode);

    let program = match (build_spec(scenario, dir, config), mode) {
        (Some(spec), Some(mode)) => match build_target(&spec, mode).await {
            Ok(artifact) => {
                println!("  {} Built {}", "✓".green(), artifact.display().to_string().dimmed());
                scenario
                    .target
                    .program
                    .as_ref()
                    .map(|p| resolve(dir, p))
                    .unwrap_or(artifact)
            }
            Err(e) => {
                result.fail(0, "build", &e);
                return result;
            }
        },
        _ => match &scenario.target.program {
            Some(program) => resolve(dir, program),
            None => {
                result.fail(0, "setup", &Error::Setup("No program to debug".to_string()));
                return result;
            }
        },
    };

    let adapter = opts.adapter.as_deref().or(scenario.target.adapter.as_deref());
    let debugger = match DapDebugger::new(config, adapter) {
        Ok(debugger) => debugger.with_args(scenario.target.args.clone()),
        Err(e) => {
            result.fail(0, "setup", &e);
            return result;
        }
    };

    let timeout = opts
        .timeout_secs
        .or(scenario.timeout_secs)
        .unwrap_or(config.timeouts.resume_secs);
    let session = Session::new(
        Box::new(debugger),
        Duration::from_secs(timeout),
        FormatterConfig::new(config.formatter.max_children_count),
    );

    run_session(session, scenario, dir, &program, opts, result).await
}

/// Drive a fresh session through the scenario and tear it down
async fn run_session(
    mut session: Session,
    scenario: &TestScenario,
    dir: &Path,
    program: &Path,
    opts: &RunOptions,
    mut result: TestResult,
) -> TestResult {
    if scenario.formatter_reset {
        session.register_cleanup(cleanup::formatter_reset());
    }
    if !scenario.cleanup.is_empty() {
        session.register_cleanup(cleanup::commands("scenario cleanup", scenario.cleanup.clone()));
    }

    println!("\n{}", "Steps:".cyan());
    let aborted = match preamble(&mut session, scenario, dir, program).await {
        Err((label, e)) => {
            result.fail(0, label, &e);
            true
        }
        Ok(()) => drive(&mut session, scenario, opts, &mut result).await,
    };

    let cleanup_errors = session.run_cleanups().await;
    // The debugger is gone or stuck after a fatal error
    if !aborted {
        verify_after_cleanup(&mut session, scenario, &mut result).await;
    }

    let report = session.teardown().await;
    result.cleanup_errors = report.cleanup_errors;
    if scenario.formatter_reset && !report.formatter_at_baseline && cleanup_errors.is_empty() {
        result
            .cleanup_errors
            .push("formatter state is not at baseline after cleanup".to_string());
    }
    for error in &result.cleanup_errors {
        println!("  {} cleanup: {}", "!".yellow(), error.yellow());
    }

    match &result.status {
        Status::Passed => println!("\n{} {}\n", "✓".green().bold(), "Test Passed".green().bold()),
        _ => println!(
            "\n{} {} ({} failure(s))\n",
            "✗".red().bold(),
            "Test Failed".red().bold(),
            result.failures.len()
        ),
    }
    result
}

/// Load, break and run; any failure here is fatal
async fn preamble(
    session: &mut Session,
    scenario: &TestScenario,
    dir: &Path,
    program: &Path,
) -> std::result::Result<(), (&'static str, Error)> {
    session
        .load_executable(program)
        .await
        .map_err(|e| ("load executable", e))?;

    let source = resolve(dir, &scenario.breakpoint.source);
    let line = session
        .set_breakpoint_by_pattern(&source, &scenario.breakpoint.marker)
        .await
        .map_err(|e| ("set breakpoint", e))?
        .line;
    println!(
        "  {} Breakpoint at {}:{}",
        "✓".green(),
        source.display().to_string().dimmed(),
        line
    );

    session.run().await.map_err(|e| ("run", e))?;
    println!("  {} Target running", "✓".green());
    Ok(())
}

/// Interpret the scripted steps; `true` when a fatal error ended them
async fn drive(session: &mut Session, scenario: &TestScenario, opts: &RunOptions, result: &mut TestResult) -> bool {
    for (i, step) in scenario.steps.iter().enumerate() {
        let step_num = i + 1;
        let label = step.label();
        result.steps_run = step_num;

        let outcome = match step {
            TestStep::InspectAndContinue { expression, patterns } if opts.keep_going => {
                // Resume even after a mismatch so later steps stay aligned
                match inspect(session, expression, patterns, opts.verbose).await {
                    Err(e) if !e.is_fatal() => {
                        result.fail(step_num, &label, &e);
                        session.continue_to_next_stop().await.map(|_| ())
                    }
                    Err(e) => Err(e),
                    Ok(()) => session.continue_to_next_stop().await.map(|_| ()),
                }
            }
            _ => execute_step(session, step, opts.verbose).await,
        };

        match outcome {
            Ok(()) => {
                if result.failures.last().map(|f| f.step) != Some(step_num) {
                    println!("  {} Step {}: {}", "✓".green(), step_num, label.dimmed());
                }
            }
            Err(e) => {
                let fatal = e.is_fatal();
                result.fail(step_num, &label, &e);
                if fatal || !opts.keep_going {
                    return fatal;
                }
            }
        }
    }
    false
}

async fn inspect(
    session: &mut Session,
    expression: &str,
    patterns: &[PatternSpec],
    verbose: bool,
) -> Result<()> {
    let matchers = compile_all(patterns)?;
    let rendered = session.inspect(expression, &matchers).await?;
    if verbose {
        for line in rendered.lines() {
            println!("      {}", line.dimmed());
        }
    }
    Ok(())
}

/// Execute a single test step
async fn execute_step(session: &mut Session, step: &TestStep, verbose: bool) -> Result<()> {
    match step {
        TestStep::AssertStopped { reason } => session.assert_stopped(reason).await,
        TestStep::ExpectModules { contains, libcxx } => {
            let mut names = contains.clone();
            if *libcxx {
                names.extend(libcxx_modules());
            }
            session.expect_modules(&names).await
        }
        TestStep::InspectAndContinue { expression, patterns } => {
            inspect(session, expression, patterns, verbose).await?;
            session.continue_to_next_stop().await.map(|_| ())
        }
        TestStep::Inspect { expression, patterns } => {
            inspect(session, expression, patterns, verbose).await
        }
        TestStep::Continue => session.continue_to_next_stop().await.map(|_| ()),
        TestStep::Command { command, expect } => {
            let output = session.execute(command).await?;
            if verbose && !output.is_empty() {
                for line in output.lines() {
                    println!("      {}", line.dimmed());
                }
            }
            let missing = pattern::missing(&compile_all(expect)?, &output);
            if missing.is_empty() {
                Ok(())
            } else {
                Err(Error::PatternMismatch {
                    expression: command.clone(),
                    missing,
                    rendered: output,
                })
            }
        }
        TestStep::ExpectExit { exit_code } => expect_exit(session, *exit_code),
    }
}

fn expect_exit(session: &Session, expected: Option<i32>) -> Result<()> {
    match (session.last_stop(), expected) {
        (Some(StopEvent::Exited { exit_code }), Some(want)) if *exit_code != want => {
            Err(Error::TestAssertion(format!(
                "target exited with code {}, expected {}",
                exit_code, want
            )))
        }
        (Some(StopEvent::Exited { .. }), _) => Ok(()),
        _ => Err(Error::TestAssertion(format!(
            "target has not exited (session is {})",
            session.state()
        ))),
    }
}

async fn verify_after_cleanup(session: &mut Session, scenario: &TestScenario, result: &mut TestResult) {
    for (i, check) in scenario.verify_after_cleanup.iter().enumerate() {
        let step_num = scenario.steps.len() + i + 1;
        let label = format!("verify '{}' after cleanup", check.expression);

        if session.state() != SessionState::Stopped {
            let e = Error::TestAssertion(format!(
                "cannot inspect after cleanup, session is {}",
                session.state()
            ));
            result.fail(step_num, &label, &e);
            return;
        }

        match inspect(session, &check.expression, &check.patterns, false).await {
            Ok(()) => println!("  {} Step {}: {}", "✓".green(), step_num, label.dimmed()),
            Err(e) => result.fail(step_num, &label, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fake::FakeDebugger;

    const SOURCE: &str = "int main() {\n  for (int i = 0; i < 2; ++i)\n    touch(i); // Set break point at this line.\n}\n";

    fn write_fixture(dir: &Path) {
        std::fs::write(dir.join("main.cpp"), SOURCE).unwrap();
    }

    fn scenario(steps: &str) -> TestScenario {
        let yaml = format!(
            r#"
name: fake
target:
  program: a.out
breakpoint:
  marker: "Set break point at this line."
  source: main.cpp
steps:
{}
"#,
            steps
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    async fn run(fake: FakeDebugger, scenario: &TestScenario, keep_going: bool) -> TestResult {
        run_with_timeout(fake, scenario, keep_going, Duration::from_secs(5)).await
    }

    async fn run_with_timeout(
        fake: FakeDebugger,
        scenario: &TestScenario,
        keep_going: bool,
        timeout: Duration,
    ) -> TestResult {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let session = Session::new(Box::new(fake), timeout, FormatterConfig::default());
        let opts = RunOptions {
            keep_going,
            ..Default::default()
        };
        let program = dir.path().join("a.out");
        run_session(
            session,
            scenario,
            dir.path(),
            &program,
            &opts,
            TestResult::new(scenario, None),
        )
        .await
    }

    const TWO_HITS: &str = r#"
  - action: assert_stopped
  - action: inspect_and_continue
    expression: iset
    patterns: ["size=5 {", { regex: '\[\d\] = 5' }]
  - action: inspect_and_continue
    expression: sset
    patterns: ['"is"']
  - action: expect_exit
    exit_code: 0
"#;

    fn two_hit_fake() -> FakeDebugger {
        FakeDebugger::new()
            .with_breakpoint_hits(2)
            .render("iset", "size=5 {\n  [0] = 5\n}")
            .render("sset", "size=5 {\n  [0] = \"is\"\n}")
    }

    #[tokio::test]
    async fn test_passing_scenario() {
        let scenario = scenario(TWO_HITS);
        let result = run(two_hit_fake(), &scenario, false).await;
        assert_eq!(result.status, Status::Passed, "{:?}", result.failures);
        assert_eq!(result.steps_run, 4);
        assert!(result.cleanup_errors.is_empty());
    }

    #[tokio::test]
    async fn test_first_mismatch_stops_linear_run() {
        let scenario = scenario(TWO_HITS);
        let fake = two_hit_fake().render("iset", "size=4 {\n}");
        let log = fake.log();
        let result = run(fake, &scenario, false).await;

        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.steps_run, 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].kind, "PATTERN_MISMATCH");
        assert!(result.failures[0].message.contains("'iset'"));

        // Cleanup ran anyway
        let log = log.lock().unwrap();
        assert!(log.iter().any(|l| l == "exec type synth clear"));
    }

    #[tokio::test]
    async fn test_keep_going_collects_all_failures() {
        let scenario = scenario(TWO_HITS);
        let fake = two_hit_fake()
            .render("iset", "size=4 {\n}")
            .render("sset", "size=0 {}");
        let result = run(fake, &scenario, true).await;

        assert_eq!(result.steps_run, 4);
        let steps: Vec<usize> = result.failures.iter().map(|f| f.step).collect();
        // Both inspections failed, yet the target was resumed to its exit
        assert_eq!(steps, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_even_with_keep_going() {
        let scenario = scenario(TWO_HITS);
        let fake = FakeDebugger::new()
            .with_breakpoint_hits(2)
            .render("sset", "\"is\"");
        let result = run(fake, &scenario, true).await;

        // `iset` has no rendering, which is a debugger error
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].kind, "DAP");
        assert_eq!(result.steps_run, 2);
    }

    #[tokio::test]
    async fn test_preamble_failure_is_step_zero() {
        let scenario = scenario(TWO_HITS);
        let result = run(FakeDebugger::new().missing_executable(), &scenario, false).await;
        assert_eq!(result.steps_run, 0);
        assert_eq!(result.failures[0].step, 0);
        assert_eq!(result.failures[0].label, "load executable");
        assert_eq!(result.failures[0].kind, "SETUP");
    }

    #[tokio::test]
    async fn test_command_step_checks_output_and_formatter() {
        let scenario = scenario(
            r#"
  - action: command
    command: settings set target.max-children-count 2
  - action: inspect
    expression: iset
    patterns: ["size=5"]
"#,
        );
        let fake = FakeDebugger::new()
            .with_breakpoint_hits(1)
            .render("iset", "size=5 {...}");
        let result = run(fake, &scenario, false).await;
        assert_eq!(result.status, Status::Passed, "{:?}", result.failures);
        assert!(result.cleanup_errors.is_empty());
    }

    #[tokio::test]
    async fn test_verify_after_cleanup_requires_stopped_target() {
        let mut scenario = scenario(TWO_HITS);
        scenario.verify_after_cleanup = serde_yaml::from_str(
            r#"
- expression: iset
  patterns: ["size=5 {"]
"#,
        )
        .unwrap();
        let result = run(two_hit_fake(), &scenario, false).await;
        assert_eq!(result.status, Status::Failed);
        assert!(result.failures[0].message.contains("cannot inspect after cleanup"));
    }

    #[tokio::test]
    async fn test_verify_after_cleanup_while_stopped() {
        let mut scenario = scenario(
            r#"
  - action: inspect
    expression: iset
    patterns: ["size=5 {"]
"#,
        );
        scenario.verify_after_cleanup = serde_yaml::from_str(
            r#"
- expression: iset
  patterns: ["size=5 {"]
"#,
        )
        .unwrap();
        let fake = FakeDebugger::new()
            .with_breakpoint_hits(1)
            .render("iset", "size=5 {}");
        let log = fake.log();
        let result = run(fake, &scenario, false).await;
        assert_eq!(result.status, Status::Passed, "{:?}", result.failures);

        let log = log.lock().unwrap();
        let reset = log.iter().position(|l| l == "exec type format clear").unwrap();
        let verify = log.iter().rposition(|l| l == "print iset").unwrap();
        assert!(reset < verify);
    }

    #[tokio::test]
    async fn test_timeout_skips_verify_after_cleanup() {
        let mut scenario = scenario("  - action: assert_stopped\n  - action: continue\n");
        scenario.verify_after_cleanup = serde_yaml::from_str(
            r#"
- expression: iset
  patterns: ["size=5 {"]
"#,
        )
        .unwrap();
        // One stop, then the target never stops again
        let fake = FakeDebugger::new().with_stop(crate::session::fake::breakpoint_stop());
        let log = fake.log();
        let result = run_with_timeout(fake, &scenario, true, Duration::from_millis(100)).await;

        assert_eq!(result.failures.len(), 1, "{:?}", result.failures);
        assert_eq!(result.failures[0].kind, "TIMEOUT");
        assert_eq!(result.failures[0].step, 2);

        let log = log.lock().unwrap();
        assert!(log.iter().any(|l| l == "exec type synth clear"));
        assert!(!log.iter().any(|l| l == "print iset"));
    }

    #[tokio::test]
    async fn test_gcc_dwarf_build_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.yaml");
        std::fs::write(
            &path,
            r#"
name: gcc
build:
  sources: [main.cpp]
  compiler: g++
  modes: [dwarf]
target: {}
breakpoint:
  marker: "Set break point at this line."
  source: main.cpp
steps:
  - action: assert_stopped
"#,
        )
        .unwrap();

        let results = run_scenario(&path, &Config::default(), &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].mode, Some(BuildMode::Dwarf));
        assert!(
            matches!(&results[0].status, Status::Skipped(reason) if reason.contains("GCC")),
            "{:?}",
            results[0].status
        );
        // Nothing was compiled
        assert!(!dir.path().join("main.o").exists());
    }

    #[tokio::test]
    async fn test_expect_exit_while_stopped_fails() {
        let scenario = scenario("  - action: expect_exit\n");
        let result = run(FakeDebugger::new().with_breakpoint_hits(1), &scenario, false).await;
        assert_eq!(result.failures[0].kind, "ASSERTION");
    }

    #[test]
    fn test_modes_selection() {
        let mut scenario = scenario("  - action: continue\n");
        assert_eq!(modes(&scenario, &RunOptions::default()), vec![None]);

        scenario.build = Some(serde_yaml::from_str("sources: [main.cpp]").unwrap());
        assert_eq!(
            modes(&scenario, &RunOptions::default()),
            vec![Some(BuildMode::Dwarf), Some(BuildMode::Dsym)]
        );
        let opts = RunOptions {
            mode: Some(BuildMode::Dwarf),
            ..Default::default()
        };
        assert_eq!(modes(&scenario, &opts), vec![Some(BuildMode::Dwarf)]);
    }
}
