//! Mock DAP adapter binary for integration testing
//!
//! Behaves like lldb-dap debugging the unordered-container fixture: the
//! breakpoint is hit once per loop iteration, `frame variable` renders the
//! containers the way lldb's libc++ formatters do, and `type ... clear` and
//! `settings set target.max-children-count` change later renderings.

use clap::Parser;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, Read, Write};

#[derive(Parser, Debug)]
#[command(name = "mock_adapter")]
struct Args {
    /// Breakpoint hits before the target exits
    #[arg(long, default_value_t = 6)]
    iterations: u32,

    /// Reason reported for the first stop
    #[arg(long, default_value = "breakpoint")]
    stop_reason: String,

    /// Stop producing events after this many stops
    #[arg(long)]
    hang_after: Option<u32>,

    /// Report this stop (1-based) as a hit of a breakpoint the client never set
    #[arg(long)]
    other_breakpoint_at: Option<u32>,

    /// Reject the launch request
    #[arg(long)]
    fail_launch: bool,

    /// Exit code of the target
    #[arg(long, default_value_t = 0)]
    exit_code: i32,
}

fn main() {
    let args = Args::parse();
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    let mut state = MockState::new(args);

    loop {
        // Read Content-Length header
        let mut header_line = String::new();
        if reader.read_line(&mut header_line).unwrap_or(0) == 0 {
            break; // EOF
        }

        if !header_line.starts_with("Content-Length:") {
            continue;
        }

        let content_length: usize = header_line
            .trim_start_matches("Content-Length:")
            .trim()
            .parse()
            .unwrap_or(0);

        // Read empty line
        let mut empty_line = String::new();
        reader.read_line(&mut empty_line).ok();

        // Read JSON body
        let mut body = vec![0u8; content_length];
        if reader.read_exact(&mut body).is_err() {
            break;
        }

        let message: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(_) => continue,
        };

        if let Some(messages) = state.process_message(&message) {
            for out in messages {
                send_message(&mut writer, &out);
            }
        }
        if state.disconnected {
            break;
        }
    }
}

fn send_message<W: Write>(writer: &mut W, message: &Value) {
    let body = message.to_string();
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).ok();
    writer.write_all(body.as_bytes()).ok();
    writer.flush().ok();
}

/// One fixture variable
struct Container {
    type_name: &'static str,
    children: Vec<String>,
}

fn pair(key: i32, value: &str) -> String {
    format!("(first = {}, second = \"{}\")", key, value)
}

fn quoted(s: &str) -> String {
    format!("\"{}\"", s)
}

/// Fixture contents, in the bucket order libc++ iterates them
fn fixture() -> BTreeMap<&'static str, Container> {
    let mut vars = BTreeMap::new();
    vars.insert(
        "map",
        Container {
            type_name: "intstr_map",
            children: vec![
                pair(5, "me"),
                pair(4, "is"),
                pair(3, "this"),
                pair(2, "world"),
                pair(1, "hello"),
            ],
        },
    );
    vars.insert(
        "mmap",
        Container {
            type_name: "intstr_mmap",
            children: vec![
                pair(3, "this"),
                pair(3, "this"),
                pair(3, "this"),
                pair(2, "world"),
                pair(2, "hello"),
                pair(1, "hello"),
            ],
        },
    );
    vars.insert(
        "iset",
        Container {
            type_name: "int_set",
            children: [9, 8, 5, 3, 2].iter().map(|i| i.to_string()).collect(),
        },
    );
    vars.insert(
        "sset",
        Container {
            type_name: "str_set",
            children: ["me", "is", "this", "world", "hello"]
                .iter()
                .map(|s| quoted(s))
                .collect(),
        },
    );
    vars.insert(
        "imset",
        Container {
            type_name: "int_mset",
            children: [4, 3, 3, 3, 2, 1].iter().map(|i| i.to_string()).collect(),
        },
    );
    vars.insert(
        "smset",
        Container {
            type_name: "str_mset",
            children: ["world", "world", "is", "is", "hello"]
                .iter()
                .map(|s| quoted(s))
                .collect(),
        },
    );
    vars
}

struct MockState {
    args: Args,
    seq: i64,
    program: Option<String>,
    breakpoint_line: Option<u32>,
    source_path: String,
    stops: u32,
    disconnected: bool,
    vars: BTreeMap<&'static str, Container>,
    summaries: BTreeMap<String, String>,
    /// Custom entries of the other formatter categories
    custom: BTreeMap<&'static str, BTreeSet<String>>,
    max_children: usize,
}

impl MockState {
    fn new(args: Args) -> Self {
        Self {
            args,
            seq: 1,
            program: None,
            breakpoint_line: None,
            source_path: "main.cpp".to_string(),
            stops: 0,
            disconnected: false,
            vars: fixture(),
            summaries: BTreeMap::new(),
            custom: BTreeMap::new(),
            max_children: 256,
        }
    }

    fn next_seq(&mut self) -> i64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn event(&mut self, event: &str, body: Value) -> Value {
        json!({
            "seq": self.next_seq(),
            "type": "event",
            "event": event,
            "body": body
        })
    }

    /// Events that follow a resume: another hit, or the end of the loop
    fn resume_events(&mut self) -> Vec<Value> {
        if let Some(limit) = self.args.hang_after {
            if self.stops >= limit {
                return Vec::new();
            }
        }

        if self.breakpoint_line.is_some() && self.stops < self.args.iterations {
            self.stops += 1;
            let reason = if self.stops == 1 {
                self.args.stop_reason.clone()
            } else {
                "breakpoint".to_string()
            };
            let hits: Vec<u32> = match reason.as_str() {
                "breakpoint" if self.args.other_breakpoint_at == Some(self.stops) => vec![2],
                "breakpoint" => vec![1],
                _ => Vec::new(),
            };
            let stopped = self.event(
                "stopped",
                json!({
                    "reason": reason,
                    "threadId": 1,
                    "allThreadsStopped": true,
                    "hitBreakpointIds": hits
                }),
            );
            return vec![stopped];
        }

        let exited = self.event("exited", json!({ "exitCode": self.args.exit_code }));
        let terminated = self.event("terminated", json!({}));
        vec![exited, terminated]
    }

    fn render(&self, name: &str) -> Option<String> {
        let var = self.vars.get(name)?;
        if let Some(summary) = self.summaries.get(var.type_name) {
            return Some(format!("({}) {} = {}\n", var.type_name, name, summary));
        }

        let mut out = format!(
            "({}) {} = size={} {{\n",
            var.type_name,
            name,
            var.children.len()
        );
        for (i, child) in var.children.iter().take(self.max_children).enumerate() {
            out.push_str(&format!("  [{}] = {}\n", i, child));
        }
        if var.children.len() > self.max_children {
            out.push_str("  ...\n");
        }
        out.push_str("}\n");
        Some(out)
    }

    /// Run an lldb command; `Err` is the error text
    fn command(&mut self, command: &str) -> Result<String, String> {
        let words: Vec<&str> = command.split_whitespace().collect();
        match words.as_slice() {
            ["frame", "variable", name] => self
                .render(name)
                .ok_or_else(|| format!("error: no variable named '{}' found in this frame", name)),
            ["type", "summary", "add", .., type_name] => {
                let summary = command
                    .split_once("-s ")
                    .map(|(_, rest)| rest.trim_start())
                    .and_then(|rest| rest.strip_prefix('"'))
                    .and_then(|rest| rest.split_once('"'))
                    .map(|(summary, _)| summary.to_string())
                    .ok_or_else(|| "error: only -s summaries are supported".to_string())?;
                self.summaries.insert(type_name.to_string(), summary);
                Ok(String::new())
            }
            ["type", "summary", "delete", type_name] => {
                self.summaries.remove(*type_name);
                Ok(String::new())
            }
            ["type", "summary", "clear"] => {
                self.summaries.clear();
                Ok(String::new())
            }
            ["type", category @ ("format" | "filter" | "synth" | "synthetic"), "add", .., type_name] => {
                self.custom
                    .entry(canonical(category))
                    .or_default()
                    .insert(type_name.to_string());
                Ok(String::new())
            }
            ["type", category @ ("format" | "filter" | "synth" | "synthetic"), "clear"] => {
                self.custom.remove(canonical(category));
                Ok(String::new())
            }
            ["settings", "set", "target.max-children-count", n] => {
                self.max_children = n
                    .parse()
                    .map_err(|_| format!("error: '{}' is not a valid unsigned integer", n))?;
                Ok(String::new())
            }
            ["settings", "clear", "target.max-children-count"] => {
                self.max_children = 256;
                Ok(String::new())
            }
            ["settings", "show", "target.max-children-count"] => {
                Ok(format!("target.max-children-count (unsigned) = {}\n", self.max_children))
            }
            _ => Err(format!("error: '{}' is not a valid command.", command)),
        }
    }

    fn modules(&self) -> Value {
        let program = self.program.clone().unwrap_or_else(|| "a.out".to_string());
        let mut names = vec![program];
        if cfg!(target_os = "macos") {
            names.push("/usr/lib/libc++.1.dylib".to_string());
            names.push("/usr/lib/libc++abi.dylib".to_string());
            names.push("/usr/lib/libSystem.B.dylib".to_string());
        } else {
            names.push("/usr/lib/x86_64-linux-gnu/libc++.so.1".to_string());
            names.push("/usr/lib/x86_64-linux-gnu/libc++abi.so.1".to_string());
            names.push("/lib/x86_64-linux-gnu/libc.so.6".to_string());
        }
        let modules: Vec<Value> = names
            .iter()
            .enumerate()
            .map(|(i, path)| {
                let name = path.rsplit('/').next().unwrap_or(path);
                json!({ "id": i + 1, "name": name, "path": path, "symbolStatus": "Symbols loaded." })
            })
            .collect();
        json!({ "modules": modules, "totalModules": names.len() })
    }

    fn process_message(&mut self, message: &Value) -> Option<Vec<Value>> {
        let msg_type = message.get("type")?.as_str()?;

        if msg_type != "request" {
            return None;
        }

        let command = message.get("command")?.as_str()?;
        let request_seq = message.get("seq")?.as_i64()?;
        let arguments = message.get("arguments").cloned().unwrap_or(json!({}));

        let mut events = Vec::new();

        let (success, body, error) = match command {
            "initialize" => (
                true,
                json!({
                    "supportsConfigurationDoneRequest": true,
                    "supportsModulesRequest": true,
                    "supportsTerminateRequest": true
                }),
                None,
            ),
            "launch" => {
                if self.args.fail_launch {
                    (false, Value::Null, Some("error: process launch failed".to_string()))
                } else {
                    self.program = arguments
                        .get("program")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    events.push(self.event("initialized", Value::Null));
                    (true, Value::Null, None)
                }
            }
            "setBreakpoints" => {
                let source = arguments
                    .get("source")
                    .and_then(|s| s.get("path"))
                    .and_then(|p| p.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let lines: Vec<u32> = arguments
                    .get("breakpoints")
                    .and_then(|b| b.as_array())
                    .map(|bps| {
                        bps.iter()
                            .filter_map(|bp| bp.get("line").and_then(|l| l.as_u64()))
                            .map(|l| l as u32)
                            .collect()
                    })
                    .unwrap_or_default();

                self.breakpoint_line = lines.first().copied();
                self.source_path = source.clone();
                let breakpoints: Vec<Value> = lines
                    .iter()
                    .enumerate()
                    .map(|(i, line)| {
                        json!({
                            "id": i + 1,
                            "verified": true,
                            "line": line,
                            "source": { "path": source }
                        })
                    })
                    .collect();
                (true, json!({ "breakpoints": breakpoints }), None)
            }
            "configurationDone" => {
                events.extend(self.resume_events());
                (true, Value::Null, None)
            }
            "continue" => {
                events.extend(self.resume_events());
                (true, json!({ "allThreadsContinued": true }), None)
            }
            "threads" => (
                true,
                json!({ "threads": [{ "id": 1, "name": "main" }] }),
                None,
            ),
            "stackTrace" => (
                true,
                json!({
                    "stackFrames": [{
                        "id": 1,
                        "name": "main",
                        "source": { "name": "main.cpp", "path": &self.source_path },
                        "line": self.breakpoint_line.unwrap_or(1),
                        "column": 1
                    }],
                    "totalFrames": 1
                }),
                None,
            ),
            "modules" => (true, self.modules(), None),
            "evaluate" => {
                let expression = arguments
                    .get("expression")
                    .and_then(|e| e.as_str())
                    .unwrap_or("");
                match expression.strip_prefix('`') {
                    Some(lldb_command) => match self.command(lldb_command.trim()) {
                        Ok(output) => (true, json!({ "result": output, "variablesReference": 0 }), None),
                        Err(message) => (false, Value::Null, Some(message)),
                    },
                    None => (
                        false,
                        Value::Null,
                        Some(format!("error: use of undeclared identifier '{}'", expression)),
                    ),
                }
            }
            "disconnect" => {
                self.disconnected = true;
                (true, Value::Null, None)
            }
            _ => (false, Value::Null, Some(format!("Unknown command: {}", command))),
        };

        let mut response = json!({
            "seq": self.next_seq(),
            "type": "response",
            "request_seq": request_seq,
            "success": success,
            "command": command
        });
        if !body.is_null() {
            response["body"] = body;
        }
        if let Some(message) = error {
            response["message"] = json!(message);
        }

        // Response goes out before the events it triggered
        let mut messages = vec![response];
        messages.extend(events);
        Some(messages)
    }
}

fn canonical(category: &str) -> &'static str {
    match category {
        "format" => "format",
        "filter" => "filter",
        _ => "synth",
    }
}
