//! Configuration types for shellbridge.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Error;

/// Server configuration loaded from YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Server settings
    pub server: ServerSettings,
    /// Control channel settings
    pub connection: ConnectionSettings,
    /// Output capture settings
    pub capture: CaptureSettings,
    /// Security settings
    pub security: SecuritySettings,
    /// Script staging settings
    pub dispatch: DispatchSettings,
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: ServerConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.transport != "stdio" {
            return Err(Error::Config(format!(
                "server.transport '{}' is not supported, only 'stdio' is",
                self.server.transport
            )));
        }

        if self.connection.idle_timeout_secs == 0 {
            return Err(Error::Config(
                "connection.idle_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.connection.request_timeout_ms == 0 {
            return Err(Error::Config(
                "connection.request_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.capture.max_output_chars == 0 {
            return Err(Error::Config(
                "capture.max_output_chars must be > 0".to_string(),
            ));
        }

        if self.capture.max_scrollback_rows == 0 || self.capture.sentinel_scan_rows == 0 {
            return Err(Error::Config(
                "capture row limits must be > 0".to_string(),
            ));
        }

        if self.capture.backoff_initial_ms == 0
            || self.capture.backoff_max_ms < self.capture.backoff_initial_ms
        {
            return Err(Error::Config(format!(
                "capture backoff must satisfy 0 < initial ({}) <= max ({})",
                self.capture.backoff_initial_ms, self.capture.backoff_max_ms
            )));
        }

        if self
            .security
            .destructive_patterns
            .iter()
            .any(|p| p.trim().is_empty())
        {
            return Err(Error::Config(
                "security.destructive_patterns cannot contain empty patterns".to_string(),
            ));
        }

        if self.dispatch.script_prefix.is_empty()
            || self.dispatch.script_prefix.contains('/')
        {
            return Err(Error::Config(format!(
                "dispatch.script_prefix '{}' must be a non-empty file name prefix",
                self.dispatch.script_prefix
            )));
        }

        Ok(())
    }
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Transport type (only stdio is supported)
    pub transport: String,
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            transport: "stdio".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Control channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Recycle the connection after this many idle seconds
    pub idle_timeout_secs: u64,
    /// Upper bound for a single control-channel request
    pub request_timeout_ms: u64,
    /// tmux executable
    pub tmux_binary: String,
    /// tmux server socket name (`-L`), default server when unset
    pub socket_name: Option<String>,
    /// tmux session to attach to, most recently used when unset
    pub target_session: Option<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            request_timeout_ms: 5000,
            tmux_binary: "tmux".to_string(),
            socket_name: None,
            target_session: None,
        }
    }
}

impl ConnectionSettings {
    /// Idle timeout as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Output capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Timeout used when the caller does not pass one
    pub default_timeout_secs: u64,
    /// Global ceiling on the `output` field of responses
    pub max_output_chars: usize,
    /// Most recent rows read when slicing between markers
    pub max_scrollback_rows: usize,
    /// Trailing visible rows searched for the end marker
    pub sentinel_scan_rows: usize,
    /// First polling interval
    pub backoff_initial_ms: u64,
    /// Polling interval cap
    pub backoff_max_ms: u64,
    /// Maximum time spent waiting for output to stop growing
    pub settle_timeout_ms: u64,
    /// Interval between settle checks
    pub settle_interval_ms: u64,
    /// Responses larger than this are serialized compactly
    pub compact_threshold_bytes: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 10,
            max_output_chars: 10_000,
            max_scrollback_rows: 2000,
            sentinel_scan_rows: 50,
            backoff_initial_ms: 100,
            backoff_max_ms: 1000,
            settle_timeout_ms: 2000,
            settle_interval_ms: 100,
            compact_threshold_bytes: 4096,
        }
    }
}

/// Security settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Substrings that mark a command as destructive
    pub destructive_patterns: Vec<String>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            destructive_patterns: ["rm ", "dd ", "mkfs ", "shutdown ", "reboot "]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl SecuritySettings {
    /// Return the first destructive pattern contained in `command`, if any.
    pub fn destructive_match(&self, command: &str) -> Option<&str> {
        self.destructive_patterns
            .iter()
            .find(|pattern| command.contains(pattern.as_str()))
            .map(String::as_str)
    }
}

/// Script staging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Directory for staged scripts, system temp dir when unset
    pub script_dir: Option<PathBuf>,
    /// File name prefix of staged scripts
    pub script_prefix: String,
    /// Interpreter written to the script shebang
    pub interpreter: String,
    /// Staged scripts older than this are removed at startup
    pub stale_script_age_secs: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            script_dir: None,
            script_prefix: "shellbridge-".to_string(),
            interpreter: "/bin/bash".to_string(),
            stale_script_age_secs: 3600,
        }
    }
}

impl DispatchSettings {
    /// Directory staged scripts are written to.
    pub fn script_dir(&self) -> PathBuf {
        self.script_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
