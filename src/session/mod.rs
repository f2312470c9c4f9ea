//! Scripted debug session driver
//!
//! A [`Session`] owns one debugger controlling one target process and walks
//! it through `Unloaded → Loaded → Running → Stopped ⇄ Running → Terminated`.
//! Every resume is paired with a bounded wait for the next stop. Teardown
//! runs the registered cleanups whatever state the session ended in.

pub mod backend;
pub mod cleanup;
pub mod dap_backend;
#[cfg(test)]
pub mod fake;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{Error, Result};
use crate::formatter::FormatterConfig;
use crate::locate;
use crate::pattern::{self, Matcher};

pub use backend::{Debugger, ResolvedBreakpoint, StopEvent, ThreadStatus};
pub use cleanup::Cleanup;
pub use dap_backend::DapDebugger;

/// Stop reason of a breakpoint hit
pub const BREAKPOINT: &str = "breakpoint";

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unloaded,
    Loaded,
    Running,
    Stopped,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Loaded => write!(f, "loaded"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// The session's breakpoint, fixed once set
#[derive(Debug, Clone)]
pub struct BreakpointSpec {
    pub source: PathBuf,
    pub marker: String,
    pub line: u32,
    pub id: Option<u32>,
    pub verified: bool,
}

/// Outcome of [`Session::teardown`]
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// `hook name: error` for every cleanup that failed
    pub cleanup_errors: Vec<String>,
    /// Whether the formatter model ended at baseline
    pub formatter_at_baseline: bool,
}

/// One debug session against one target
pub struct Session {
    debugger: Box<dyn Debugger>,
    state: SessionState,
    program: Option<PathBuf>,
    breakpoint: Option<BreakpointSpec>,
    last_stop: Option<StopEvent>,
    resume_timeout: Duration,
    formatter: FormatterConfig,
    cleanups: Vec<Cleanup>,
    cleanup_errors: Vec<String>,
    hits: usize,
}

impl Session {
    pub fn new(debugger: Box<dyn Debugger>, resume_timeout: Duration, formatter: FormatterConfig) -> Self {
        Self {
            debugger,
            state: SessionState::Unloaded,
            program: None,
            breakpoint: None,
            last_stop: None,
            resume_timeout,
            formatter,
            cleanups: Vec::new(),
            cleanup_errors: Vec::new(),
            hits: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn formatter(&self) -> &FormatterConfig {
        &self.formatter
    }

    pub fn program(&self) -> Option<&Path> {
        self.program.as_deref()
    }

    pub fn breakpoint(&self) -> Option<&BreakpointSpec> {
        self.breakpoint.as_ref()
    }

    pub fn last_stop(&self) -> Option<&StopEvent> {
        self.last_stop.as_ref()
    }

    /// Number of breakpoint stops so far
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Exit code once the target has exited
    pub fn exit_code(&self) -> Option<i32> {
        match self.last_stop {
            Some(StopEvent::Exited { exit_code }) => Some(exit_code),
            _ => None,
        }
    }

    fn ensure(&self, action: &str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::invalid_state(action, &self.state.to_string()))
        }
    }

    fn stopped_thread(&self) -> Result<i64> {
        match &self.last_stop {
            Some(StopEvent::Stopped { thread_id, .. }) => Ok(*thread_id),
            _ => Err(Error::invalid_state("find the stopped thread", &self.state.to_string())),
        }
    }

    /// Bind the session to the executable at `path`
    #[tracing::instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn load_executable(&mut self, path: &Path) -> Result<()> {
        self.ensure("load an executable", &[SessionState::Unloaded])?;
        self.debugger.load_executable(path).await.map_err(|e| match e {
            Error::Setup(_) => e,
            other => Error::Setup(format!("Cannot load {}: {}", path.display(), other)),
        })?;
        self.program = Some(path.to_path_buf());
        self.state = SessionState::Loaded;
        tracing::info!("Executable loaded");
        Ok(())
    }

    /// Break on the single line of `source` matching `marker`
    #[tracing::instrument(skip(self, source), fields(source = %source.display()))]
    pub async fn set_breakpoint_by_pattern(&mut self, source: &Path, marker: &str) -> Result<&BreakpointSpec> {
        self.ensure("set a breakpoint", &[SessionState::Loaded, SessionState::Stopped])?;
        if let Some(existing) = &self.breakpoint {
            return Err(Error::unresolved(
                marker,
                format!("session already breaks at line {}", existing.line),
            ));
        }

        let line = locate::locate_in_file(source, marker)?;
        let resolved = self.debugger.set_breakpoint(source, line).await?;
        if resolved.line != line {
            tracing::warn!(requested = line, actual = resolved.line, "Breakpoint moved by debugger");
        }
        tracing::info!(line = resolved.line, "Breakpoint set");

        Ok(self.breakpoint.insert(BreakpointSpec {
            source: source.to_path_buf(),
            marker: marker.to_string(),
            line: resolved.line,
            id: resolved.id,
            verified: resolved.verified,
        }))
    }

    /// Wait, bounded, for the target to stop or exit
    async fn wait_for_stop(&mut self) -> Result<StopEvent> {
        let stop = tokio::time::timeout(self.resume_timeout, self.debugger.next_stop())
            .await
            .map_err(|_| Error::Timeout(self.resume_timeout))??;

        match &stop {
            StopEvent::Stopped { reason, thread_id, .. } => {
                tracing::debug!(%reason, thread_id, "Target stopped");
                if reason == BREAKPOINT {
                    self.hits += 1;
                }
                self.state = SessionState::Stopped;
            }
            StopEvent::Exited { exit_code } => {
                tracing::info!(exit_code, "Target exited");
                self.state = SessionState::Terminated;
            }
        }
        self.last_stop = Some(stop.clone());
        Ok(stop)
    }

    /// Start the target and wait for its first stop
    pub async fn run(&mut self) -> Result<StopEvent> {
        self.ensure("run", &[SessionState::Loaded])?;
        self.debugger.launch().await.map_err(|e| match e {
            Error::Launch(_) => e,
            other => Error::Launch(other.to_string()),
        })?;
        self.refresh_breakpoint();
        self.state = SessionState::Running;
        self.wait_for_stop().await
    }

    /// Take the debugger's id and verification for a breakpoint set before
    /// launch
    fn refresh_breakpoint(&mut self) {
        let Some(bp) = self.breakpoint.as_mut() else {
            return;
        };
        let Some(resolved) = self.debugger.resolved_breakpoint(&bp.source, bp.line) else {
            return;
        };
        if resolved.line != bp.line {
            tracing::warn!(requested = bp.line, actual = resolved.line, "Breakpoint moved by debugger");
        }
        if !resolved.verified {
            tracing::warn!(line = resolved.line, message = ?resolved.message, "Breakpoint not verified");
        }
        bp.id = resolved.id;
        bp.line = resolved.line;
        bp.verified = resolved.verified;
    }

    /// A breakpoint stop must be at the session's breakpoint when both ids
    /// are known
    fn ensure_own_hit(&self, hit_breakpoints: &[u32]) -> Result<()> {
        let Some(id) = self.breakpoint.as_ref().and_then(|bp| bp.id) else {
            return Ok(());
        };
        if hit_breakpoints.is_empty() || hit_breakpoints.contains(&id) {
            return Ok(());
        }
        Err(Error::UnexpectedStopReason {
            expected: format!("breakpoint {}", id),
            actual: format!("breakpoint {:?}", hit_breakpoints),
        })
    }

    /// Check that the target is stopped for `expected`
    ///
    /// The reason comes from the debugger's thread list, falling back to the
    /// recorded stop event.
    pub async fn assert_stopped(&mut self, expected: &str) -> Result<()> {
        self.ensure("check the stop reason", &[SessionState::Stopped])?;
        let thread_id = self.stopped_thread()?;

        let threads = self.debugger.threads().await?;
        let reason = threads
            .iter()
            .find(|t| t.id == thread_id)
            .and_then(|t| t.stop_reason.clone())
            .or_else(|| match &self.last_stop {
                Some(StopEvent::Stopped { reason, .. }) => Some(reason.clone()),
                _ => None,
            })
            .unwrap_or_default();

        if reason != expected {
            return Err(Error::UnexpectedStopReason {
                expected: expected.to_string(),
                actual: reason,
            });
        }

        if expected == BREAKPOINT {
            if let Some(StopEvent::Stopped { hit_breakpoints, .. }) = &self.last_stop {
                self.ensure_own_hit(hit_breakpoints)?;
            }
        }
        Ok(())
    }

    pub async fn assert_stopped_at_breakpoint(&mut self) -> Result<()> {
        self.assert_stopped(BREAKPOINT).await
    }

    /// Require every name to be a substring of some loaded module
    pub async fn expect_modules(&mut self, names: &[String]) -> Result<()> {
        self.ensure("list modules", &[SessionState::Stopped])?;
        let modules = self.debugger.modules().await?;
        let missing: Vec<&str> = names
            .iter()
            .filter(|n| !modules.iter().any(|m| m.contains(n.as_str())))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::TestAssertion(format!(
            "module(s) not loaded: {} (loaded: {})",
            missing.join(", "),
            modules.join(", ")
        )))
    }

    /// Render `expression` and require every matcher to be satisfied
    pub async fn inspect(&mut self, expression: &str, matchers: &[Matcher]) -> Result<String> {
        self.ensure("inspect a variable", &[SessionState::Stopped])?;
        let rendered = self.debugger.print_variable(expression).await?;
        tracing::debug!(expression, rendered = %rendered, "Inspected");

        let missing = pattern::missing(matchers, &rendered);
        if missing.is_empty() {
            Ok(rendered)
        } else {
            Err(Error::PatternMismatch {
                expression: expression.to_string(),
                missing,
                rendered,
            })
        }
    }

    /// Resume and wait for the next stop
    ///
    /// A stop for anything but the session's breakpoint is an
    /// `UnexpectedStopReason`; the session stays usable. Exiting is not an
    /// error here.
    pub async fn continue_to_next_stop(&mut self) -> Result<StopEvent> {
        self.ensure("continue", &[SessionState::Stopped])?;
        let thread_id = self.stopped_thread()?;
        self.debugger.resume(thread_id).await?;
        self.state = SessionState::Running;

        let stop = self.wait_for_stop().await?;
        if let StopEvent::Stopped {
            reason,
            hit_breakpoints,
            ..
        } = &stop
        {
            if reason != BREAKPOINT {
                return Err(Error::UnexpectedStopReason {
                    expected: BREAKPOINT.to_string(),
                    actual: reason.clone(),
                });
            }
            self.ensure_own_hit(hit_breakpoints)?;
        }
        Ok(stop)
    }

    /// [`Session::inspect`] followed by [`Session::continue_to_next_stop`]
    pub async fn inspect_and_continue(&mut self, expression: &str, matchers: &[Matcher]) -> Result<StopEvent> {
        self.inspect(expression, matchers).await?;
        self.continue_to_next_stop().await
    }

    /// Issue a raw debugger command
    pub async fn execute(&mut self, command: &str) -> Result<String> {
        self.ensure("run a command", &[SessionState::Loaded, SessionState::Stopped])?;
        let output = self.debugger.execute(command).await?;
        if self.formatter.observe(command) {
            tracing::debug!(command, "Formatter state changed");
        }
        Ok(output)
    }

    /// Register a hook for teardown; hooks run last-registered first
    pub fn register_cleanup(&mut self, cleanup: Cleanup) {
        tracing::debug!(name = %cleanup.name, "Registered cleanup");
        self.cleanups.push(cleanup);
    }

    /// Run every pending cleanup once, whatever the session state
    ///
    /// Failures are logged and collected; later hooks still run.
    pub async fn run_cleanups(&mut self) -> Vec<String> {
        let mut errors = Vec::new();
        while let Some(cleanup) = self.cleanups.pop() {
            tracing::debug!(name = %cleanup.name, "Running cleanup");
            if let Err(e) = (cleanup.hook)(&mut *self.debugger, &mut self.formatter).await {
                tracing::warn!(name = %cleanup.name, error = %e, "Cleanup failed");
                errors.push(format!("{}: {}", cleanup.name, e));
            }
        }
        self.cleanup_errors.extend(errors.iter().cloned());
        errors
    }

    /// Run remaining cleanups, end the debug session and report
    pub async fn teardown(mut self) -> TeardownReport {
        self.run_cleanups().await;

        if let Err(e) = self.debugger.shutdown().await {
            tracing::warn!(error = %e, "Debugger shutdown failed");
            self.cleanup_errors.push(format!("shutdown: {}", e));
        }
        self.state = SessionState::Terminated;

        TeardownReport {
            cleanup_errors: self.cleanup_errors,
            formatter_at_baseline: self.formatter.is_baseline(),
        }
    }
}
