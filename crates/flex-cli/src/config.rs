//! Configuration system for the flex CLI.

use anyhow::Context;
use flex_core::{KeepaliveConfig, NodeConfig as CoreNodeConfig, WindowConfig};
use flex_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// flex configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Node identity
    #[serde(default)]
    pub node: NodeConfig,
    /// Relay connection
    #[serde(default)]
    pub relay: RelayConfig,
    /// Stream flow control and timeouts
    #[serde(default)]
    pub stream: StreamConfig,
    /// Keep-alive pings
    #[serde(default)]
    pub keepalive: KeepaliveSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Domain to register; empty picks a random one
    #[serde(default)]
    pub domain: String,
    /// Relay password
    #[serde(default)]
    pub credential: String,
    /// Fail pending dials and pings as soon as the relay connection drops
    #[serde(default = "default_true")]
    pub fail_pending_on_disconnect: bool,
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay address: `host:port` for TCP, or a `ws://` / `wss://` URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Session handshake timeout in seconds
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
}

/// Stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Largest data frame payload in bytes
    #[serde(default = "default_max_fragment")]
    pub max_fragment: usize,
    /// Credit each stream starts with, in bytes
    #[serde(default = "default_initial_credit")]
    pub initial_credit: u32,
    /// Upper bound on credit; unset means unbounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_credit: Option<u32>,
    /// Dial timeout in milliseconds
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_ms: u64,
    /// Secret tunnel handshake timeout in milliseconds
    #[serde(default = "default_secret_timeout")]
    pub secret_handshake_timeout_ms: u64,
}

/// Keep-alive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveSection {
    /// Send keep-alive pings
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between pings
    #[serde(default = "default_keepalive_interval")]
    pub interval_secs: u64,
    /// Seconds to wait for each ping
    #[serde(default = "default_keepalive_timeout")]
    pub timeout_secs: u64,
    /// Domain pinged; empty pings the relay
    #[serde(default = "default_keepalive_domain")]
    pub domain: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    "127.0.0.1:2000".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_session_timeout() -> u64 {
    10
}

fn default_max_fragment() -> usize {
    16 * 1024
}

fn default_initial_credit() -> u32 {
    512 * 1024
}

fn default_dial_timeout() -> u64 {
    5000
}

fn default_secret_timeout() -> u64 {
    10_000
}

fn default_keepalive_interval() -> u64 {
    15
}

fn default_keepalive_timeout() -> u64 {
    5
}

fn default_keepalive_domain() -> String {
    String::new()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            credential: String::new(),
            fail_pending_on_disconnect: true,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout_secs: default_connect_timeout(),
            session_timeout_secs: default_session_timeout(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_fragment: default_max_fragment(),
            initial_credit: default_initial_credit(),
            max_credit: None,
            dial_timeout_ms: default_dial_timeout(),
            secret_handshake_timeout_ms: default_secret_timeout(),
        }
    }
}

impl Default for KeepaliveSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_keepalive_interval(),
            timeout_secs: default_keepalive_timeout(),
            domain: default_keepalive_domain(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("flex/config.toml")
    }

    /// Load config from `path` if it exists, else defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_endpoint(&self.relay.endpoint)?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.relay.connect_timeout_secs == 0 {
            anyhow::bail!("Relay connect timeout must be non-zero");
        }

        self.to_node_config()
            .validate()
            .context("invalid node settings")?;
        Ok(())
    }

    /// Build the core node configuration.
    #[must_use]
    pub fn to_node_config(&self) -> CoreNodeConfig {
        CoreNodeConfig {
            domain: self.node.domain.clone(),
            window: WindowConfig {
                max_fragment: self.stream.max_fragment,
                initial_credit: self.stream.initial_credit,
                max_credit: self.stream.max_credit,
            },
            dial_timeout: Duration::from_millis(self.stream.dial_timeout_ms),
            session_timeout: Duration::from_secs(self.relay.session_timeout_secs),
            secret_handshake_timeout: Duration::from_millis(self.stream.secret_handshake_timeout_ms),
            keepalive: KeepaliveConfig {
                enabled: self.keepalive.enabled,
                interval: Duration::from_secs(self.keepalive.interval_secs),
                timeout: Duration::from_secs(self.keepalive.timeout_secs),
                domain: self.keepalive.domain.clone(),
            },
            fail_pending_on_disconnect: self.node.fail_pending_on_disconnect,
            transport: TransportConfig {
                nodelay: true,
                connect_timeout: Duration::from_secs(self.relay.connect_timeout_secs),
            },
        }
    }
}

fn validate_endpoint(endpoint: &str) -> anyhow::Result<()> {
    let lower = endpoint.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("ws://")
        .or_else(|| lower.strip_prefix("wss://"));
    match rest {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            anyhow::bail!("Relay endpoint '{}' has empty hostname", endpoint)
        }
        Some(_) => Ok(()),
        None => validate_host_port(endpoint, "Relay endpoint"),
    }
}

/// Validate host:port format
fn validate_host_port(addr: &str, name: &str) -> anyhow::Result<()> {
    let Some((host, port_str)) = addr.rsplit_once(':') else {
        anyhow::bail!(
            "{} '{}' missing port (expected format: host:port)",
            name,
            addr
        );
    };

    let port: u16 = port_str
        .parse()
        .map_err(|_| anyhow::anyhow!("{} '{}' has invalid port: {}", name, addr, port_str))?;
    if port == 0 {
        anyhow::bail!("{} '{}' has invalid port: 0", name, addr);
    }
    if host.is_empty() {
        anyhow::bail!("{} '{}' has empty hostname", name, addr);
    }
    Ok(())
}
