//! Configuration loading from TOML files and environment variables.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::DaemonError;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unix socket path clients connect to.
    pub socket_path: String,

    /// Glob pattern re-evaluated for every connection.
    pub pattern: String,

    /// Socket file permissions (octal). Left to the umask when unset.
    #[serde(deserialize_with = "deserialize_mode")]
    pub socket_mode: Option<u32>,

    /// Remove an existing file at `socket_path` before binding.
    pub unlink_stale_socket: bool,

    /// Buffer size of the in-memory pipe between a file and the writer.
    pub pipe_capacity: usize,

    /// Deadline for individual writes to the client (seconds, 0 disables).
    pub write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: String::new(),
            pattern: String::new(),
            socket_mode: None,
            unlink_stale_socket: false,
            pipe_capacity: 65536,
            write_timeout_secs: 0,
        }
    }
}

impl ServerConfig {
    pub fn write_timeout(&self) -> Option<Duration> {
        match self.write_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Check the settings every connection depends on.
    ///
    /// A malformed pattern can never match anything on any connection, so it
    /// is rejected here rather than on the first client.
    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.socket_path.is_empty() {
            return Err(DaemonError::Config("You must provide a name".to_string()));
        }
        if self.pattern.is_empty() {
            return Err(DaemonError::Config("You must provide a pattern".to_string()));
        }
        if self.pipe_capacity == 0 {
            return Err(DaemonError::Config(
                "pipe_capacity must be greater than zero".to_string(),
            ));
        }
        glob::Pattern::new(&self.pattern).map_err(|source| DaemonError::Pattern {
            pattern: self.pattern.clone(),
            source,
        })?;
        Ok(())
    }
}

/// Metrics/Prometheus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint.
    pub enabled: bool,

    /// Listen address for metrics server.
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn").
    pub level: String,

    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DaemonError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DaemonError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        toml::from_str(&content)
            .map_err(|e| DaemonError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from file, then apply environment variable overrides.
    ///
    /// Overrides whose value does not parse are left out and returned so the
    /// caller can report them once logging is up.
    pub fn load<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<(Self, Vec<RejectedOverride>), DaemonError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        let rejected = config.apply_overrides(|key| std::env::var(key).ok());

        Ok((config, rejected))
    }

    /// Apply overrides from a key lookup (the process environment in practice).
    fn apply_overrides<F>(&mut self, lookup: F) -> Vec<RejectedOverride>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut rejected = Vec::new();

        if let Some(v) = lookup("DAEMON_SOCKET_PATH") {
            self.server.socket_path = v;
        }
        if let Some(v) = lookup("DAEMON_PATTERN") {
            self.server.pattern = v;
        }
        if let Some(v) = lookup("DAEMON_SOCKET_MODE") {
            match parse_mode(&v) {
                Ok(mode) => self.server.socket_mode = Some(mode),
                Err(e) => rejected.push(RejectedOverride::new("DAEMON_SOCKET_MODE", v, e)),
            }
        }
        if let Some(v) = lookup("DAEMON_PIPE_CAPACITY") {
            match v.parse() {
                Ok(n) => self.server.pipe_capacity = n,
                Err(e) => rejected.push(RejectedOverride::new("DAEMON_PIPE_CAPACITY", v, e)),
            }
        }
        if let Some(v) = lookup("DAEMON_WRITE_TIMEOUT") {
            match v.parse() {
                Ok(n) => self.server.write_timeout_secs = n,
                Err(e) => rejected.push(RejectedOverride::new("DAEMON_WRITE_TIMEOUT", v, e)),
            }
        }

        if let Some(v) = lookup("DAEMON_METRICS_ENABLED") {
            self.metrics.enabled = v == "true" || v == "1";
        }
        if let Some(v) = lookup("DAEMON_METRICS_ADDR") {
            self.metrics.listen_addr = v;
        }

        if let Some(v) = lookup("DAEMON_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("DAEMON_LOG_FORMAT") {
            self.logging.format = v;
        }

        rejected
    }
}

/// An environment override that was ignored because its value did not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedOverride {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

impl RejectedOverride {
    fn new(key: &'static str, value: String, reason: impl std::fmt::Display) -> Self {
        Self {
            key,
            value,
            reason: reason.to_string(),
        }
    }
}

/// Parse a permission mode: "0o660" and "0660" are octal, anything else decimal.
fn parse_mode(s: &str) -> Result<u32, std::num::ParseIntError> {
    let s = s.trim();
    if let Some(stripped) = s.strip_prefix("0o") {
        u32::from_str_radix(stripped, 8)
    } else if s.starts_with('0') && s.len() > 1 {
        u32::from_str_radix(s, 8)
    } else {
        s.parse()
    }
}

fn deserialize_mode<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ModeValue {
        Number(u32),
        String(String),
    }

    match ModeValue::deserialize(deserializer)? {
        ModeValue::Number(n) => Ok(Some(n)),
        ModeValue::String(s) => parse_mode(&s).map(Some).map_err(D::Error::custom),
    }
}
