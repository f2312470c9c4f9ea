//! Scripted in-process debugger for unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::common::{Error, Result};

use super::backend::{Debugger, ResolvedBreakpoint, StopEvent, ThreadStatus};

/// Fake backend; an empty stop queue blocks forever
#[derive(Default)]
pub struct FakeDebugger {
    stops: VecDeque<StopEvent>,
    renderings: HashMap<String, String>,
    modules: Vec<String>,
    failing_commands: HashSet<String>,
    hanging_commands: HashSet<String>,
    missing_executable: bool,
    launch_error: Option<String>,
    /// Breakpoints stay unconfirmed until launch, as over DAP
    deferred: bool,
    launched: bool,
    breakpoints: Vec<(PathBuf, u32)>,
    log: Arc<Mutex<Vec<String>>>,
    stopped: Option<StopEvent>,
}

impl FakeDebugger {
    pub fn new() -> Self {
        Self::default()
    }

    /// `hits` breakpoint stops followed by a clean exit
    pub fn with_breakpoint_hits(mut self, hits: usize) -> Self {
        for _ in 0..hits {
            self.stops.push_back(breakpoint_stop());
        }
        self.stops.push_back(StopEvent::Exited { exit_code: 0 });
        self
    }

    pub fn with_stop(mut self, stop: StopEvent) -> Self {
        self.stops.push_back(stop);
        self
    }

    pub fn render(mut self, name: &str, text: &str) -> Self {
        self.renderings.insert(name.to_string(), text.to_string());
        self
    }

    pub fn with_modules(mut self, modules: &[&str]) -> Self {
        self.modules = modules.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn failing(mut self, command: &str) -> Self {
        self.failing_commands.insert(command.to_string());
        self
    }

    /// `command` never gets an answer
    pub fn hanging(mut self, command: &str) -> Self {
        self.hanging_commands.insert(command.to_string());
        self
    }

    pub fn missing_executable(mut self) -> Self {
        self.missing_executable = true;
        self
    }

    pub fn launch_error(mut self, message: &str) -> Self {
        self.launch_error = Some(message.to_string());
        self
    }

    pub fn deferred_breakpoints(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Shared record of every call, as `op arg`
    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

fn confirmed(line: u32) -> ResolvedBreakpoint {
    ResolvedBreakpoint {
        id: Some(1),
        line,
        verified: true,
        message: None,
    }
}

pub fn breakpoint_stop() -> StopEvent {
    StopEvent::Stopped {
        reason: "breakpoint".to_string(),
        thread_id: 1,
        hit_breakpoints: vec![1],
        description: None,
    }
}

#[async_trait]
impl Debugger for FakeDebugger {
    async fn load_executable(&mut self, path: &Path) -> Result<()> {
        self.record(format!("load {}", path.display()));
        if self.missing_executable {
            return Err(Error::Setup(format!("Executable not found: {}", path.display())));
        }
        Ok(())
    }

    async fn set_breakpoint(&mut self, source: &Path, line: u32) -> Result<ResolvedBreakpoint> {
        self.record(format!("break {}:{}", source.display(), line));
        self.breakpoints.push((source.to_path_buf(), line));
        if self.deferred && !self.launched {
            return Ok(ResolvedBreakpoint {
                id: None,
                line,
                verified: false,
                message: Some("pending until launch".to_string()),
            });
        }
        Ok(confirmed(line))
    }

    fn resolved_breakpoint(&self, source: &Path, line: u32) -> Option<ResolvedBreakpoint> {
        let known = self
            .breakpoints
            .iter()
            .any(|(s, l)| s == source && *l == line);
        (known && (self.launched || !self.deferred)).then(|| confirmed(line))
    }

    async fn launch(&mut self) -> Result<()> {
        self.record("launch".to_string());
        match &self.launch_error {
            Some(message) => Err(Error::dap_request_failed("launch", message)),
            None => {
                self.launched = true;
                Ok(())
            }
        }
    }

    async fn resume(&mut self, thread_id: i64) -> Result<()> {
        self.record(format!("continue {}", thread_id));
        self.stopped = None;
        Ok(())
    }

    async fn next_stop(&mut self) -> Result<StopEvent> {
        match self.stops.pop_front() {
            Some(stop) => {
                self.stopped = Some(stop.clone());
                Ok(stop)
            }
            None => std::future::pending().await,
        }
    }

    async fn threads(&mut self) -> Result<Vec<ThreadStatus>> {
        Ok(match &self.stopped {
            Some(StopEvent::Stopped {
                reason, thread_id, ..
            }) => vec![ThreadStatus {
                id: *thread_id,
                name: "main".to_string(),
                stop_reason: Some(reason.clone()),
            }],
            _ => Vec::new(),
        })
    }

    async fn modules(&mut self) -> Result<Vec<String>> {
        Ok(self.modules.clone())
    }

    async fn print_variable(&mut self, name: &str) -> Result<String> {
        self.record(format!("print {}", name));
        self.renderings
            .get(name)
            .cloned()
            .ok_or_else(|| Error::dap_request_failed("evaluate", &format!("no variable named '{}'", name)))
    }

    async fn execute(&mut self, command: &str) -> Result<String> {
        self.record(format!("exec {}", command));
        if self.hanging_commands.contains(command) {
            std::future::pending::<()>().await;
        }
        if self.failing_commands.contains(command) {
            return Err(Error::dap_request_failed("evaluate", "command failed"));
        }
        Ok(String::new())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.record("shutdown".to_string());
        Ok(())
    }
}
