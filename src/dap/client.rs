//! DAP client for communicating with debug adapters
//!
//! Owns the adapter subprocess and performs strictly sequential
//! request/response exchanges. Events that arrive while a response is
//! outstanding are queued and handed out by [`DapClient::next_event`].

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::common::{Error, Result};

use super::codec;
use super::types::*;

/// DAP client for communicating with a debug adapter
pub struct DapClient {
    /// Adapter subprocess
    adapter: Child,
    /// Buffered reader for adapter stdout
    reader: BufReader<ChildStdout>,
    /// Buffered writer for adapter stdin
    writer: BufWriter<ChildStdin>,
    /// Sequence number for the next request
    seq: i64,
    /// Adapter capabilities (populated after initialize)
    pub capabilities: Capabilities,
    /// Events received while waiting for responses
    events: VecDeque<Event>,
    /// Bound on a single request/response exchange
    request_timeout: Duration,
}

impl DapClient {
    /// Spawn a new DAP adapter and create a client
    pub async fn spawn(adapter_path: &Path, args: &[String], request_timeout: Duration) -> Result<Self> {
        let mut cmd = Command::new(adapter_path);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut adapter = cmd.spawn().map_err(|e| {
            Error::AdapterStartFailed(format!(
                "Failed to start {}: {}",
                adapter_path.display(),
                e
            ))
        })?;

        let stdin = adapter
            .stdin
            .take()
            .ok_or_else(|| Error::AdapterStartFailed("Failed to get adapter stdin".to_string()))?;
        let stdout = adapter.stdout.take().ok_or_else(|| {
            Error::AdapterStartFailed("Failed to get adapter stdout".to_string())
        })?;

        tracing::debug!(adapter = %adapter_path.display(), ?args, "Spawned debug adapter");

        Ok(Self {
            adapter,
            reader: BufReader::new(stdout),
            writer: BufWriter::new(stdin),
            seq: 1,
            capabilities: Capabilities::default(),
            events: VecDeque::new(),
            request_timeout,
        })
    }

    /// Send a request and return its sequence number
    async fn send_request(&mut self, command: &str, arguments: Option<Value>) -> Result<i64> {
        let seq = self.seq;
        self.seq += 1;

        let mut request = serde_json::json!({
            "seq": seq,
            "type": "request",
            "command": command,
        });
        if let Some(args) = arguments {
            request["arguments"] = args;
        }

        let json = serde_json::to_string(&request)?;
        tracing::trace!("DAP >>> {}", json);
        codec::write_message(&mut self.writer, &json).await?;

        Ok(seq)
    }

    /// Read the next message from the adapter
    async fn read_message(&mut self) -> Result<Value> {
        let json = codec::read_message(&mut self.reader).await?;
        tracing::trace!("DAP <<< {}", json);
        serde_json::from_str(&json).map_err(|e| Error::DapProtocol(format!("Invalid JSON: {}", e)))
    }

    /// Queue an event message; return the message back if it is not one
    fn absorb_event(&mut self, msg: Value) -> Result<Option<Value>> {
        if msg.get("type").and_then(|v| v.as_str()) != Some("event") {
            return Ok(Some(msg));
        }
        let event_msg: EventMessage = serde_json::from_value(msg)?;
        self.events.push_back(Event::from_message(&event_msg));
        Ok(None)
    }

    /// Read messages until the response to `seq` arrives
    async fn await_response(&mut self, command: &str, seq: i64) -> Result<ResponseMessage> {
        loop {
            let raw = self.read_message().await?;
            let Some(msg) = self.absorb_event(raw)? else {
                continue;
            };

            match msg.get("type").and_then(|v| v.as_str()) {
                Some("response") => {
                    let response: ResponseMessage = serde_json::from_value(msg)?;
                    if response.request_seq == seq {
                        return Ok(response);
                    }
                    tracing::warn!(
                        request_seq = response.request_seq,
                        expected = seq,
                        command,
                        "Discarding response to an earlier request"
                    );
                }
                other => {
                    tracing::warn!("Unknown message type: {:?}", other);
                }
            }
        }
    }

    /// Send a request and wait for the response
    ///
    /// Events arriving in between are queued for [`DapClient::next_event`].
    pub async fn request<T: serde::de::DeserializeOwned>(
        &mut self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<T> {
        let seq = self.send_request(command, arguments).await?;
        let timeout = self.request_timeout;

        let response = tokio::time::timeout(timeout, self.await_response(command, seq))
            .await
            .map_err(|_| Error::dap_request_failed(command, &format!("no response within {:?}", timeout)))??;

        if !response.success {
            return Err(Error::dap_request_failed(
                command,
                &response.message.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        let body = response.body.unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(|e| {
            Error::DapProtocol(format!("Failed to parse {} response: {}", command, e))
        })
    }

    /// Return the next event, reading from the adapter if none is queued
    ///
    /// Blocks until an event arrives; callers bound the wait.
    pub async fn next_event(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Ok(event);
            }
            let raw = self.read_message().await?;
            if let Some(msg) = self.absorb_event(raw)? {
                tracing::warn!("Unsolicited message while waiting for events: {}", msg);
            }
        }
    }

    /// Initialize the debug adapter
    pub async fn initialize(&mut self, adapter_id: &str, timeout: Duration) -> Result<Capabilities> {
        let args = InitializeArguments::new(adapter_id);
        let request = self.request::<Capabilities>("initialize", Some(serde_json::to_value(&args)?));

        let caps = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| Error::AdapterStartFailed(format!("initialize timed out after {:?}", timeout)))??;

        self.capabilities = caps.clone();
        Ok(caps)
    }

    /// Wait for the initialized event, keeping other events queued
    pub async fn wait_initialized(&mut self, timeout: Duration) -> Result<()> {
        let wait = async {
            let mut held = Vec::new();
            loop {
                match self.next_event().await? {
                    Event::Initialized => {
                        // Preserve ordering of whatever arrived before it
                        for event in held.into_iter().rev() {
                            self.events.push_front(event);
                        }
                        return Ok::<(), Error>(());
                    }
                    other => held.push(other),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Launch(format!("no initialized event within {:?}", timeout)))?
    }

    /// Launch a program for debugging
    pub async fn launch(&mut self, args: LaunchArguments) -> Result<()> {
        self.request::<Value>("launch", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    /// Signal that configuration is done
    pub async fn configuration_done(&mut self) -> Result<()> {
        self.request::<Value>("configurationDone", None).await?;
        Ok(())
    }

    /// Replace the breakpoints of one source file
    pub async fn set_breakpoints(&mut self, source_path: &Path, lines: &[u32]) -> Result<Vec<Breakpoint>> {
        let args = SetBreakpointsArguments {
            source: Source {
                name: source_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned()),
                path: Some(source_path.to_string_lossy().into_owned()),
            },
            breakpoints: lines
                .iter()
                .map(|&line| SourceBreakpoint { line, condition: None })
                .collect(),
        };

        let response: SetBreakpointsResponseBody = self
            .request("setBreakpoints", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.breakpoints)
    }

    /// Continue execution
    pub async fn continue_execution(&mut self, thread_id: i64) -> Result<bool> {
        let args = ContinueArguments {
            thread_id,
            single_thread: false,
        };

        let response: ContinueResponseBody = self
            .request("continue", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.all_threads_continued)
    }

    /// Get stack trace
    pub async fn stack_trace(&mut self, thread_id: i64, levels: i64) -> Result<Vec<StackFrame>> {
        let args = StackTraceArguments {
            thread_id,
            start_frame: Some(0),
            levels: Some(levels),
        };

        let response: StackTraceResponseBody = self
            .request("stackTrace", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.stack_frames)
    }

    /// Get threads
    pub async fn threads(&mut self) -> Result<Vec<Thread>> {
        let response: ThreadsResponseBody = self.request("threads", None).await?;
        Ok(response.threads)
    }

    /// Get loaded modules
    pub async fn modules(&mut self) -> Result<Vec<Module>> {
        let response: ModulesResponseBody = self
            .request("modules", Some(serde_json::to_value(ModulesArguments::default())?))
            .await?;
        Ok(response.modules)
    }

    /// Evaluate an expression
    pub async fn evaluate(
        &mut self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<EvaluateResponseBody> {
        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id,
            context: Some(context.to_string()),
        };

        self.request("evaluate", Some(serde_json::to_value(&args)?))
            .await
    }

    /// Disconnect from the debug adapter
    pub async fn disconnect(&mut self, terminate_debuggee: bool) -> Result<()> {
        let args = DisconnectArguments {
            restart: false,
            terminate_debuggee: Some(terminate_debuggee),
        };

        // Don't wait for response - adapter might exit immediately
        self.send_request("disconnect", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(())
    }

    /// Terminate the adapter process
    pub async fn terminate(&mut self) -> Result<()> {
        if let Err(e) = self.disconnect(true).await {
            tracing::debug!("Disconnect failed: {}", e);
        }

        // Give the adapter a moment to exit on its own
        if tokio::time::timeout(Duration::from_millis(500), self.adapter.wait())
            .await
            .is_err()
        {
            self.adapter.kill().await?;
        }

        Ok(())
    }
}
