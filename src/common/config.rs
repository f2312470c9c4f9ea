//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Debug adapter configurations
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// How raw debugger commands are sent through the adapter
    #[serde(default)]
    pub debugger: DebuggerConfig,

    /// Formatter baseline restored during teardown
    #[serde(default)]
    pub formatter: FormatterDefaults,

    /// Fixture build defaults
    #[serde(default)]
    pub build: BuildDefaults,
}

/// Configuration for a debug adapter
#[derive(Debug, Deserialize, Clone)]
pub struct AdapterConfig {
    /// Path to the adapter executable
    pub path: PathBuf,

    /// Additional arguments to pass to the adapter
    #[serde(default)]
    pub args: Vec<String>,
}

/// Default settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Default adapter to use
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
        }
    }
}

fn default_adapter() -> String {
    "lldb-dap".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Timeout for DAP initialize request
    #[serde(default = "default_dap_initialize")]
    pub dap_initialize_secs: u64,

    /// Timeout for general DAP requests
    #[serde(default = "default_dap_request")]
    pub dap_request_secs: u64,

    /// Bound on one resume-and-wait-for-stop cycle
    #[serde(default = "default_resume")]
    pub resume_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dap_initialize_secs: default_dap_initialize(),
            dap_request_secs: default_dap_request(),
            resume_secs: default_resume(),
        }
    }
}

fn default_dap_initialize() -> u64 {
    10
}
fn default_dap_request() -> u64 {
    30
}
fn default_resume() -> u64 {
    30
}

/// Raw command passthrough settings
#[derive(Debug, Deserialize)]
pub struct DebuggerConfig {
    /// Prefix that makes the adapter's REPL treat input as a debugger
    /// command rather than an expression (lldb-dap: backtick)
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
        }
    }
}

fn default_command_prefix() -> String {
    "`".to_string()
}

/// Formatter baseline
#[derive(Debug, Deserialize)]
pub struct FormatterDefaults {
    /// Value of `target.max-children-count` restored on teardown
    #[serde(default = "default_max_children")]
    pub max_children_count: u32,
}

impl Default for FormatterDefaults {
    fn default() -> Self {
        Self {
            max_children_count: default_max_children(),
        }
    }
}

fn default_max_children() -> u32 {
    256
}

/// Fixture build defaults, used when a scenario does not name its own
#[derive(Debug, Deserialize)]
pub struct BuildDefaults {
    #[serde(default = "default_compiler")]
    pub compiler: String,

    #[serde(default = "default_flags")]
    pub flags: Vec<String>,
}

impl Default for BuildDefaults {
    fn default() -> Self {
        Self {
            compiler: default_compiler(),
            flags: default_flags(),
        }
    }
}

fn default_compiler() -> String {
    "clang++".to_string()
}

fn default_flags() -> Vec<String> {
    ["-std=c++11", "-stdlib=libc++", "-O0"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| super::Error::file_read(path, &e))?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Get adapter configuration by name
    ///
    /// Falls back to searching PATH if not explicitly configured
    pub fn get_adapter(&self, name: &str) -> Option<AdapterConfig> {
        if let Some(config) = self.adapters.get(name) {
            return Some(config.clone());
        }

        which::which(name).ok().map(|path| AdapterConfig {
            path,
            args: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.defaults.adapter, "lldb-dap");
        assert_eq!(config.timeouts.resume_secs, 30);
        assert_eq!(config.debugger.command_prefix, "`");
        assert_eq!(config.formatter.max_children_count, 256);
        assert_eq!(config.build.compiler, "clang++");
        assert!(config.build.flags.iter().any(|f| f == "-stdlib=libc++"));
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
[adapters.mock]
path = "/opt/mock-adapter"

[defaults]
adapter = "mock"

[timeouts]
resume_secs = 5

[formatter]
max_children_count = 64
"#,
        )
        .unwrap();

        assert_eq!(config.defaults.adapter, "mock");
        assert_eq!(config.timeouts.resume_secs, 5);
        assert_eq!(config.timeouts.dap_request_secs, 30);
        assert_eq!(config.formatter.max_children_count, 64);

        let adapter = config.get_adapter("mock").unwrap();
        assert_eq!(adapter.path, PathBuf::from("/opt/mock-adapter"));
        assert!(adapter.args.is_empty());
    }

    #[test]
    fn test_invalid_toml_is_config_parse_error() {
        let err = Config::parse("[timeouts\nresume_secs = ").unwrap_err();
        assert!(matches!(err, super::super::Error::ConfigParse(_)));
    }
}
