//! Teardown callbacks
//!
//! A hook gets the debugger and the formatter model by reference, so it can
//! both issue commands and keep the model in step with them.

use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::common::{Error, Result};
use crate::formatter::FormatterConfig;

use super::backend::Debugger;

/// Bound on each command a cleanup issues
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Boxed teardown callback
pub type CleanupHook = Box<
    dyn for<'a> FnOnce(&'a mut dyn Debugger, &'a mut FormatterConfig) -> BoxFuture<'a, Result<()>>
        + Send,
>;

/// A named hook waiting to run
pub struct Cleanup {
    pub name: String,
    pub hook: CleanupHook,
}

impl Cleanup {
    pub fn new<F>(name: impl Into<String>, hook: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut dyn Debugger, &'a mut FormatterConfig) -> BoxFuture<'a, Result<()>>
            + Send
            + 'static,
    {
        Self {
            name: name.into(),
            hook: Box::new(hook),
        }
    }
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleanup").field("name", &self.name).finish()
    }
}

/// Issue every command, even after one fails, and report the failures
async fn issue_all(
    debugger: &mut dyn Debugger,
    formatter: &mut FormatterConfig,
    commands: &[String],
) -> Result<()> {
    let mut failed = Vec::new();
    for command in commands {
        let outcome = tokio::time::timeout(COMMAND_TIMEOUT, debugger.execute(command))
            .await
            .unwrap_or_else(|_| {
                Err(Error::dap_request_failed(
                    "evaluate",
                    &format!("no answer within {:?}", COMMAND_TIMEOUT),
                ))
            });
        match outcome {
            Ok(_) => {
                formatter.observe(command);
            }
            Err(e) => {
                tracing::warn!(command = %command, error = %e, "Cleanup command failed");
                failed.push(format!("{}: {}", command, e));
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::Internal(format!(
            "cleanup command(s) failed: {}",
            failed.join("; ")
        )))
    }
}

/// Restore formats, summaries, filters, synthetic providers and the
/// max-children limit to baseline
pub fn formatter_reset() -> Cleanup {
    Cleanup::new("formatter reset", |debugger, formatter| {
        Box::pin(async move {
            let commands = formatter.reset_commands();
            let result = issue_all(debugger, formatter, &commands).await;
            // A failed command leaves its category as last observed
            if result.is_ok() {
                formatter.reset();
            }
            result
        })
    })
}

/// Run extra raw commands during teardown
pub fn commands(name: impl Into<String>, commands: Vec<String>) -> Cleanup {
    Cleanup::new(name, move |debugger, formatter| {
        Box::pin(async move { issue_all(debugger, formatter, &commands).await })
    })
}
