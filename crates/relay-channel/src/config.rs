//! Channel session configuration.

use std::time::Duration;

use relay_core::defaults;

/// Configuration for the channel session and its supervisor.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Handle of the responder conversation.
    pub target: String,
    /// Supervisor health-check interval in milliseconds.
    pub health_interval_ms: u64,
    /// Back-off after a failed supervisor tick, in milliseconds.
    pub error_backoff_ms: u64,
    /// Upper bound on the connect handshake, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Bounded wait for a graceful close during restart, in milliseconds.
    pub disconnect_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target: defaults::TARGET.to_string(),
            health_interval_ms: defaults::HEALTH_INTERVAL_MS,
            error_backoff_ms: defaults::ERROR_BACKOFF_MS,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            disconnect_grace_ms: defaults::DISCONNECT_GRACE_MS,
        }
    }
}

impl SessionConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `RELAY_TARGET` | `@OlimpoDataBot` | Responder conversation handle |
    /// | `RELAY_HEALTH_INTERVAL_MS` | `5000` | Supervisor tick interval |
    /// | `RELAY_ERROR_BACKOFF_MS` | `10000` | Back-off after a failed tick |
    /// | `RELAY_CONNECT_TIMEOUT_MS` | `30000` | Connect handshake bound |
    pub fn from_env() -> Self {
        Self {
            target: defaults::env_string(defaults::ENV_TARGET, defaults::TARGET),
            health_interval_ms: defaults::env_u64(
                defaults::ENV_HEALTH_INTERVAL_MS,
                defaults::HEALTH_INTERVAL_MS,
            )
            .max(1),
            error_backoff_ms: defaults::env_u64(
                defaults::ENV_ERROR_BACKOFF_MS,
                defaults::ERROR_BACKOFF_MS,
            )
            .max(1),
            connect_timeout_ms: defaults::env_u64(
                defaults::ENV_CONNECT_TIMEOUT_MS,
                defaults::CONNECT_TIMEOUT_MS,
            ),
            disconnect_grace_ms: defaults::DISCONNECT_GRACE_MS,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_health_interval(mut self, ms: u64) -> Self {
        self.health_interval_ms = ms;
        self
    }

    pub fn with_error_backoff(mut self, ms: u64) -> Self {
        self.error_backoff_ms = ms;
        self
    }

    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    pub fn with_disconnect_grace(mut self, ms: u64) -> Self {
        self.disconnect_grace_ms = ms;
        self
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.target, defaults::TARGET);
        assert_eq!(config.health_interval(), Duration::from_secs(5));
        assert_eq!(config.error_backoff(), Duration::from_secs(10));
        assert_eq!(config.disconnect_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_is_longer_than_health_interval() {
        let config = SessionConfig::default();
        assert!(config.error_backoff() > config.health_interval());
    }

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::default()
            .with_target("@other")
            .with_health_interval(100)
            .with_error_backoff(200)
            .with_connect_timeout(300)
            .with_disconnect_grace(50);

        assert_eq!(config.target, "@other");
        assert_eq!(config.health_interval_ms, 100);
        assert_eq!(config.error_backoff_ms, 200);
        assert_eq!(config.connect_timeout_ms, 300);
        assert_eq!(config.disconnect_grace_ms, 50);
    }
}
