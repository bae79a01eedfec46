// src/config.rs

//! Manages server configuration: loading, resolving size values, and validation.

use crate::core::protocol::{DEFAULT_MAX_MESSAGE_SIZE, HEADER_LEN};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use sysinfo::System;
use tracing::{info, warn};

/// Selects how connection drivers are executed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// One worker task per connection.
    #[default]
    Dedicated,
    /// Driver steps are scheduled on a fixed-size worker pool.
    Fixed,
}

/// Configuration for the connection execution strategy.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub kind: ExecutorKind,
    /// Worker count for the `fixed` executor. Defaults to the number of available cores.
    #[serde(default)]
    pub threads: Option<usize>,
    /// If true, dedicated workers yield after each request once they outnumber the cores.
    #[serde(default = "default_yield_when_oversubscribed")]
    pub yield_when_oversubscribed: bool,
}

fn default_yield_when_oversubscribed() -> bool {
    true
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            kind: ExecutorKind::default(),
            threads: None,
            yield_when_oversubscribed: default_yield_when_oversubscribed(),
        }
    }
}

impl ExecutorConfig {
    /// The worker count the `fixed` executor should run with.
    pub fn resolved_threads(&self) -> usize {
        self.threads.unwrap_or_else(get_available_cores)
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9278
}

/// Configuration for TLS encryption.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    #[serde(default = "default_key_path")]
    pub key_path: String,
}

fn default_cert_path() -> String {
    "spindle.crt".to_string()
}
fn default_key_path() -> String {
    "spindle.key".to_string()
}

/// Returns the number of cores the process may run on.
///
/// `available_parallelism` honours affinity masks and cgroup quotas. When it
/// cannot tell, the host's logical CPU count is used instead.
pub fn get_available_cores() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
            let mut sys = System::new();
            sys.refresh_cpu_all();
            let cpus = sys.cpus().len().max(1);
            warn!(
                "Could not detect available parallelism ({}). Using logical CPU count: {}",
                e, cpus
            );
            cpus
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum MessageSizeConfig {
    Bytes(usize),
    String(String),
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default)]
    quiet: bool,
    #[serde(default = "default_max_message_size_config")]
    max_message_size: MessageSizeConfig,
    #[serde(default = "default_shutdown_timeout_secs")]
    shutdown_timeout_secs: u64,
    #[serde(default)]
    executor: ExecutorConfig,
    #[serde(default)]
    tls: TlsConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    27027
}
fn default_log_level() -> String {
    "info".to_string()
}
/// The connection limit used when none is configured.
pub fn default_max_clients() -> usize {
    10000
}
fn default_max_message_size_config() -> MessageSizeConfig {
    MessageSizeConfig::Bytes(DEFAULT_MAX_MESSAGE_SIZE)
}
fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Represents the final, validated, and resolved server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub max_clients: usize,
    /// Suppresses the per-connection "end connection" log line.
    pub quiet: bool,
    /// The largest message, header included, a client may send.
    pub max_message_size: usize,
    /// How long shutdown waits for open sessions to end before giving up on them.
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            quiet: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            executor: ExecutorConfig::default(),
            tls: TlsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Parses, resolves and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let max_message_size = resolve_message_size(raw_config.max_message_size)?;

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            max_clients: raw_config.max_clients,
            quiet: raw_config.quiet,
            max_message_size,
            shutdown_timeout_secs: raw_config.shutdown_timeout_secs,
            executor: raw_config.executor,
            tls: raw_config.tls,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.max_message_size < HEADER_LEN {
            return Err(anyhow!(
                "max_message_size must be at least {} bytes (the message header size)",
                HEADER_LEN
            ));
        }
        if self.shutdown_timeout_secs == 0 {
            warn!("shutdown_timeout_secs is 0: open sessions will not be waited for on shutdown.");
        }

        if self.executor.threads == Some(0) {
            return Err(anyhow!("executor.threads cannot be 0"));
        }
        if self.executor.kind == ExecutorKind::Dedicated && self.executor.threads.is_some() {
            warn!("executor.threads is ignored unless executor.kind is \"fixed\".");
        }

        if self.tls.enabled {
            if self.tls.cert_path.trim().is_empty() {
                return Err(anyhow!("tls.cert_path cannot be empty when TLS is enabled"));
            }
            if self.tls.key_path.trim().is_empty() {
                return Err(anyhow!("tls.key_path cannot be empty when TLS is enabled"));
            }
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}

/// Resolves the `MessageSizeConfig` into a byte count.
fn resolve_message_size(cfg: MessageSizeConfig) -> Result<usize> {
    match cfg {
        MessageSizeConfig::Bytes(b) => Ok(b),
        MessageSizeConfig::String(s) => {
            let s_lower = s.to_lowercase();
            let resolved = if let Some(val_str) = s_lower.strip_suffix("mb") {
                parse_size_string(&s, val_str, 1024 * 1024)?
            } else if let Some(val_str) = s_lower.strip_suffix('m') {
                parse_size_string(&s, val_str, 1024 * 1024)?
            } else if let Some(val_str) = s_lower.strip_suffix("kb") {
                parse_size_string(&s, val_str, 1024)?
            } else if let Some(val_str) = s_lower.strip_suffix('k') {
                parse_size_string(&s, val_str, 1024)?
            } else {
                s.trim().parse().with_context(|| format!("Invalid max_message_size value '{s}'. Must be a number (bytes) or have a unit (e.g., '16mb')."))?
            };
            info!("Resolved max_message_size '{}' to {} bytes.", s, resolved);
            Ok(resolved)
        }
    }
}

/// Parses a string number with a unit (kb, mb) and applies a multiplier.
fn parse_size_string(original_str: &str, value_str: &str, multiplier: u64) -> Result<usize> {
    let value: u64 = value_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid number in max_message_size config: '{original_str}'"))?;
    let result_u64 = value.saturating_mul(multiplier);
    usize::try_from(result_u64).map_err(|_| {
        anyhow!(
            "max_message_size value '{}' is too large for this system's architecture (max is {} bytes)",
            original_str,
            usize::MAX
        )
    })
}
