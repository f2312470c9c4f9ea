//! [`Debugger`] over the Debug Adapter Protocol

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::common::config::{AdapterConfig, Config};
use crate::common::{Error, Result};
use crate::dap::{DapClient, Event, LaunchArguments};

use super::backend::{Debugger, ResolvedBreakpoint, StopEvent, ThreadStatus};

/// Debugger driven through a DAP adapter such as `lldb-dap`
pub struct DapDebugger {
    adapter_name: String,
    adapter: AdapterConfig,
    init_timeout: Duration,
    request_timeout: Duration,
    command_prefix: String,
    client: Option<DapClient>,
    program: Option<PathBuf>,
    args: Vec<String>,
    /// Breakpoint lines per source; DAP replaces a file's set wholesale
    breakpoints: BTreeMap<PathBuf, Vec<u32>>,
    /// Adapter's answer per requested source and line
    resolved: BTreeMap<(PathBuf, u32), ResolvedBreakpoint>,
    launched: bool,
    stopped_thread: Option<i64>,
    stop_reason: Option<String>,
    exit_code: Option<i32>,
}

impl DapDebugger {
    /// Resolve `adapter_name` (or the configured default) without starting it
    pub fn new(config: &Config, adapter_name: Option<&str>) -> Result<Self> {
        let adapter_name = adapter_name.unwrap_or(&config.defaults.adapter).to_string();
        let adapter = config
            .get_adapter(&adapter_name)
            .ok_or_else(|| Error::adapter_not_found(&adapter_name, &["config file", "PATH"]))?;

        Ok(Self {
            adapter_name,
            adapter,
            init_timeout: Duration::from_secs(config.timeouts.dap_initialize_secs),
            request_timeout: Duration::from_secs(config.timeouts.dap_request_secs),
            command_prefix: config.debugger.command_prefix.clone(),
            client: None,
            program: None,
            args: Vec::new(),
            breakpoints: BTreeMap::new(),
            resolved: BTreeMap::new(),
            launched: false,
            stopped_thread: None,
            stop_reason: None,
            exit_code: None,
        })
    }

    /// Arguments passed to the target on launch
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    fn client(&mut self) -> Result<&mut DapClient> {
        self.client
            .as_mut()
            .ok_or_else(|| Error::invalid_state("talk to the adapter", "unloaded"))
    }

    /// Send every line of `source` and record the answers
    ///
    /// The adapter answers in request order.
    async fn send_breakpoints(&mut self, source: &Path) -> Result<Vec<ResolvedBreakpoint>> {
        let lines = self.breakpoints.get(source).cloned().unwrap_or_default();
        let answers = self.client()?.set_breakpoints(source, &lines).await?;

        let mut resolved = Vec::with_capacity(answers.len());
        for (line, bp) in lines.iter().zip(answers) {
            let bp = ResolvedBreakpoint {
                id: bp.id,
                line: bp.line.unwrap_or(*line),
                verified: bp.verified,
                message: bp.message,
            };
            self.resolved.insert((source.to_path_buf(), *line), bp.clone());
            resolved.push(bp);
        }
        Ok(resolved)
    }

    async fn top_frame(&mut self) -> Result<Option<i64>> {
        let Some(thread_id) = self.stopped_thread else {
            return Ok(None);
        };
        let frames = self.client()?.stack_trace(thread_id, 1).await?;
        Ok(frames.first().map(|f| f.id))
    }
}

#[async_trait]
impl Debugger for DapDebugger {
    #[tracing::instrument(skip(self), fields(adapter = %self.adapter_name))]
    async fn load_executable(&mut self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(Error::Setup(format!(
                "Executable not found: {}",
                path.display()
            )));
        }
        let program = path
            .canonicalize()
            .map_err(|e| Error::Setup(format!("Cannot load {}: {}", path.display(), e)))?;

        if self.client.is_none() {
            let mut client =
                DapClient::spawn(&self.adapter.path, &self.adapter.args, self.request_timeout)
                    .await?;
            let caps = client.initialize(&self.adapter_name, self.init_timeout).await?;
            tracing::debug!(?caps, "DAP adapter initialized");
            self.client = Some(client);
        }

        self.program = Some(program);
        Ok(())
    }

    async fn set_breakpoint(&mut self, source: &Path, line: u32) -> Result<ResolvedBreakpoint> {
        let lines = self.breakpoints.entry(source.to_path_buf()).or_default();
        if !lines.contains(&line) {
            lines.push(line);
        }

        if !self.launched {
            // Sent after the adapter reports `initialized`
            return Ok(ResolvedBreakpoint {
                id: None,
                line,
                verified: false,
                message: Some("pending until launch".to_string()),
            });
        }

        self.send_breakpoints(source).await?;
        self.resolved_breakpoint(source, line).ok_or_else(|| {
            Error::unresolved(&source.display().to_string(), "adapter returned no breakpoint")
        })
    }

    fn resolved_breakpoint(&self, source: &Path, line: u32) -> Option<ResolvedBreakpoint> {
        self.resolved.get(&(source.to_path_buf(), line)).cloned()
    }

    #[tracing::instrument(skip(self))]
    async fn launch(&mut self) -> Result<()> {
        let program = self
            .program
            .clone()
            .ok_or_else(|| Error::invalid_state("launch", "unloaded"))?;
        let cwd = program.parent().map(|p| p.to_string_lossy().into_owned());

        let args = LaunchArguments {
            program: program.to_string_lossy().into_owned(),
            args: self.args.clone(),
            cwd,
            stop_on_entry: false,
            init_commands: None,
        };

        let init_timeout = self.init_timeout;
        let client = self.client()?;
        client
            .launch(args)
            .await
            .map_err(|e| Error::Launch(e.to_string()))?;
        client.wait_initialized(init_timeout).await?;

        let sources: Vec<PathBuf> = self.breakpoints.keys().cloned().collect();
        for source in sources {
            for bp in self.send_breakpoints(&source).await? {
                if !bp.verified {
                    tracing::warn!(
                        source = %source.display(),
                        line = bp.line,
                        message = ?bp.message,
                        "Breakpoint not verified"
                    );
                }
            }
        }

        self.client()?
            .configuration_done()
            .await
            .map_err(|e| Error::Launch(e.to_string()))?;
        self.launched = true;
        tracing::debug!("Target launched");
        Ok(())
    }

    async fn resume(&mut self, thread_id: i64) -> Result<()> {
        self.client()?.continue_execution(thread_id).await?;
        self.stopped_thread = None;
        self.stop_reason = None;
        Ok(())
    }

    async fn next_stop(&mut self) -> Result<StopEvent> {
        loop {
            match self.client()?.next_event().await? {
                Event::Stopped(body) => {
                    let thread_id = body.thread_id.unwrap_or(0);
                    self.stopped_thread = Some(thread_id);
                    self.stop_reason = Some(body.reason.clone());
                    return Ok(StopEvent::Stopped {
                        reason: body.reason,
                        thread_id,
                        hit_breakpoints: body.hit_breakpoint_ids,
                        description: body.description,
                    });
                }
                Event::Exited(body) => {
                    self.exit_code = Some(body.exit_code);
                    return Ok(StopEvent::Exited {
                        exit_code: body.exit_code,
                    });
                }
                Event::Terminated => {
                    return Ok(StopEvent::Exited {
                        exit_code: self.exit_code.unwrap_or(0),
                    });
                }
                Event::Output(body) => {
                    tracing::debug!(category = ?body.category, "target: {}", body.output.trim_end());
                }
                other => tracing::trace!(?other, "Ignoring event"),
            }
        }
    }

    async fn threads(&mut self) -> Result<Vec<ThreadStatus>> {
        let stopped = self.stopped_thread;
        let reason = self.stop_reason.clone();
        let threads = self.client()?.threads().await?;
        Ok(threads
            .into_iter()
            .map(|t| ThreadStatus {
                stop_reason: if Some(t.id) == stopped { reason.clone() } else { None },
                id: t.id,
                name: t.name,
            })
            .collect())
    }

    async fn modules(&mut self) -> Result<Vec<String>> {
        let modules = self.client()?.modules().await?;
        Ok(modules
            .into_iter()
            .map(|m| m.path.unwrap_or(m.name))
            .collect())
    }

    async fn print_variable(&mut self, name: &str) -> Result<String> {
        self.execute(&format!("frame variable {}", name)).await
    }

    async fn execute(&mut self, command: &str) -> Result<String> {
        let frame_id = self.top_frame().await?;
        let expression = format!("{}{}", self.command_prefix, command);
        let response = self.client()?.evaluate(&expression, frame_id, "repl").await?;
        Ok(response.result)
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut client) = self.client.take() {
            client.terminate().await?;
        }
        self.launched = false;
        self.stopped_thread = None;
        Ok(())
    }
}
