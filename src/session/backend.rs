//! The command contract a debugger must offer the session driver

use std::path::Path;

use async_trait::async_trait;

use crate::common::Result;

/// Breakpoint as the debugger resolved it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBreakpoint {
    pub id: Option<u32>,
    pub line: u32,
    pub verified: bool,
    pub message: Option<String>,
}

/// What the target did after being resumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopEvent {
    Stopped {
        reason: String,
        thread_id: i64,
        hit_breakpoints: Vec<u32>,
        description: Option<String>,
    },
    Exited {
        exit_code: i32,
    },
}

/// One thread of the stopped target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStatus {
    pub id: i64,
    pub name: String,
    pub stop_reason: Option<String>,
}

/// Abstract debugger control interface
///
/// Calls are strictly sequential. `launch` and `resume` only start the
/// target; the matching stop is collected with `next_stop`, which may wait
/// indefinitely and must be bounded by the caller.
#[async_trait]
pub trait Debugger: Send {
    /// Bind to the executable at `path`
    async fn load_executable(&mut self, path: &Path) -> Result<()>;

    /// Break at `line` of `source`
    async fn set_breakpoint(&mut self, source: &Path, line: u32) -> Result<ResolvedBreakpoint>;

    /// The breakpoint requested at `line` of `source`, as the debugger last
    /// confirmed it; `None` until the debugger has answered for it
    fn resolved_breakpoint(&self, source: &Path, line: u32) -> Option<ResolvedBreakpoint>;

    /// Start the loaded executable
    async fn launch(&mut self) -> Result<()>;

    /// Resume the stopped thread
    async fn resume(&mut self, thread_id: i64) -> Result<()>;

    /// Wait for the next stop or exit
    async fn next_stop(&mut self) -> Result<StopEvent>;

    async fn threads(&mut self) -> Result<Vec<ThreadStatus>>;

    /// Names of the loaded modules
    async fn modules(&mut self) -> Result<Vec<String>>;

    /// Formatted rendering of a variable in the selected frame
    async fn print_variable(&mut self, name: &str) -> Result<String>;

    /// Run a raw debugger command and return its output
    async fn execute(&mut self, command: &str) -> Result<String>;

    /// End the debug session; safe to call more than once
    async fn shutdown(&mut self) -> Result<()>;
}
