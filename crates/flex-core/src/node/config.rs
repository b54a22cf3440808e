//! Node configuration

use crate::error::{Error, Result};
use crate::secret::DEFAULT_HANDSHAKE_TIMEOUT;
use crate::stream::WindowConfig;
use flex_transport::TransportConfig;
use std::time::Duration;

/// Default wait for an open-stream ack
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for the relay's session response
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Domain to register with the relay; empty picks a random one
    pub domain: String,

    /// Per-stream flow control
    pub window: WindowConfig,

    /// How long a dial waits for its ack
    pub dial_timeout: Duration,

    /// How long the session handshake may take
    pub session_timeout: Duration,

    /// How long a secret tunnel handshake may take
    pub secret_handshake_timeout: Duration,

    /// Periodic liveness ping
    pub keepalive: KeepaliveConfig,

    /// Fail outstanding dials and pings as soon as the transport closes,
    /// instead of leaving them to their own timeouts
    pub fail_pending_on_disconnect: bool,

    /// Transport configuration
    pub transport: TransportConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            window: WindowConfig::default(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            secret_handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            keepalive: KeepaliveConfig::default(),
            fail_pending_on_disconnect: true,
            transport: TransportConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Set the domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Set the flow-control window.
    #[must_use]
    pub fn with_window(mut self, window: WindowConfig) -> Self {
        self.window = window;
        self
    }

    /// Set the dial timeout.
    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set the session handshake timeout.
    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the secret tunnel handshake timeout.
    #[must_use]
    pub fn with_secret_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.secret_handshake_timeout = timeout;
        self
    }

    /// Set the keep-alive policy.
    #[must_use]
    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Choose whether pending requests fail on disconnect.
    #[must_use]
    pub fn with_fail_pending_on_disconnect(mut self, fail: bool) -> Self {
        self.fail_pending_on_disconnect = fail;
        self
    }

    /// Set the transport configuration.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Check the configuration for values the node cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        self.window.validate()?;
        for (name, value) in [
            ("dial_timeout", self.dial_timeout),
            ("session_timeout", self.session_timeout),
            ("secret_handshake_timeout", self.secret_handshake_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::InvalidConfig(format!("{name} must be non-zero").into()));
            }
        }
        if self.keepalive.enabled {
            if self.keepalive.interval.is_zero() || self.keepalive.timeout.is_zero() {
                return Err(Error::InvalidConfig(
                    "keepalive interval and timeout must be non-zero".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Keep-alive configuration
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// Send keep-alive pings
    pub enabled: bool,

    /// Time between pings
    pub interval: Duration,

    /// Wait for each ping's answer
    pub timeout: Duration,

    /// Domain the ping is addressed to. Empty asks the relay itself to
    /// answer, which measures the round trip to the relay.
    pub domain: String,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(5),
            domain: String::new(),
        }
    }
}

impl KeepaliveConfig {
    /// No keep-alive pings
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert!(config.domain.is_empty());
        assert_eq!(config.dial_timeout, Duration::from_secs(5));
        assert_eq!(config.secret_handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.keepalive.interval, Duration::from_secs(15));
        assert!(config.keepalive.domain.is_empty());
        assert!(config.fail_pending_on_disconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = NodeConfig::default()
            .with_domain("alpha")
            .with_dial_timeout(Duration::from_millis(100))
            .with_keepalive(KeepaliveConfig::disabled())
            .with_fail_pending_on_disconnect(false);
        assert_eq!(config.domain, "alpha");
        assert_eq!(config.dial_timeout, Duration::from_millis(100));
        assert!(!config.keepalive.enabled);
        assert!(!config.fail_pending_on_disconnect);
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = NodeConfig::default().with_dial_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = NodeConfig::default();
        config.keepalive.interval = Duration::ZERO;
        assert!(config.validate().is_err());

        // Disabled keep-alive is not checked.
        config.keepalive.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_any_keepalive_domain() {
        let mut config = NodeConfig::default();
        config.keepalive.domain = String::new();
        assert!(config.validate().is_ok());

        config.keepalive.domain = "beta".to_string();
        assert!(config.validate().is_ok());
    }
}
