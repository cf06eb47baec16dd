//! Correlation engine configuration.

use std::time::Duration;

use tracing::warn;

use relay_core::defaults;

use crate::matcher::MatchStrictness;

/// Timing and matching parameters for lookups.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sender identity of responder replies.
    pub responder_id: String,
    /// Command prefix sent before the identifier.
    pub command_prefix: String,
    /// Interval between anchor scans in milliseconds.
    pub poll_interval_ms: u64,
    /// Anchor phase budget in milliseconds.
    pub anchor_timeout_ms: u64,
    /// Secondary capture budget in milliseconds.
    pub capture_timeout_ms: u64,
    /// Maximum image artifacts per lookup, at most `defaults::MAX_ARTIFACTS`.
    pub max_artifacts: usize,
    /// Messages fetched per scan.
    pub fetch_limit: usize,
    /// Slack below the send time accepted on reply timestamps, in milliseconds.
    pub timestamp_slack_ms: u64,
    /// Cap on a single throttle extension, in seconds.
    pub max_throttle_wait_secs: u64,
    /// Wait for the session after a restart, in milliseconds.
    pub restart_wait_ms: u64,
    /// Margin added to the total lookup budget, in milliseconds.
    pub grace_ms: u64,
    pub strictness: MatchStrictness,
    /// Age at which a pending entry is swept, in milliseconds. Raised to the
    /// total budget by [`EngineConfig::pending_stale`].
    pub pending_stale_ms: u64,
    /// Interval between registry sweeps, in milliseconds.
    pub pending_sweep_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            responder_id: defaults::RESPONDER_ID.to_string(),
            command_prefix: defaults::COMMAND_PREFIX.to_string(),
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            anchor_timeout_ms: defaults::ANCHOR_TIMEOUT_MS,
            capture_timeout_ms: defaults::CAPTURE_TIMEOUT_MS,
            max_artifacts: defaults::MAX_ARTIFACTS,
            fetch_limit: defaults::FETCH_LIMIT,
            timestamp_slack_ms: defaults::TIMESTAMP_SLACK_MS,
            max_throttle_wait_secs: defaults::MAX_THROTTLE_WAIT_SECS,
            restart_wait_ms: defaults::RESTART_WAIT_MS,
            grace_ms: defaults::LOOKUP_GRACE_MS,
            strictness: MatchStrictness::default(),
            pending_stale_ms: defaults::PENDING_STALE_MS,
            pending_sweep_interval_ms: defaults::PENDING_SWEEP_INTERVAL_MS,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `RELAY_RESPONDER_ID` | `OlimpoDataBot` | Sender of responder replies |
    /// | `RELAY_COMMAND_PREFIX` | `/dnit` | Command sent before the identifier |
    /// | `RELAY_POLL_INTERVAL_MS` | `1000` | Anchor scan interval |
    /// | `RELAY_ANCHOR_TIMEOUT_MS` | `30000` | Anchor phase budget |
    /// | `RELAY_CAPTURE_TIMEOUT_MS` | `6000` | Secondary capture budget |
    /// | `RELAY_MAX_ARTIFACTS` | `4` | Images per lookup |
    /// | `RELAY_FETCH_LIMIT` | `15` | Messages fetched per scan |
    /// | `RELAY_MATCH_STRICTNESS` | `labeled` | `strict`, `labeled` or `loose` |
    /// | `RELAY_PENDING_STALE_MS` | `120000` | Registry expiry age (never below the total budget) |
    pub fn from_env() -> Self {
        let strictness = match std::env::var(defaults::ENV_MATCH_STRICTNESS) {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                warn!(error = %e, "Invalid match strictness, using default");
                MatchStrictness::default()
            }),
            Err(_) => MatchStrictness::default(),
        };

        Self {
            responder_id: defaults::env_string(defaults::ENV_RESPONDER_ID, defaults::RESPONDER_ID),
            command_prefix: defaults::env_string(
                defaults::ENV_COMMAND_PREFIX,
                defaults::COMMAND_PREFIX,
            ),
            poll_interval_ms: defaults::env_u64(
                defaults::ENV_POLL_INTERVAL_MS,
                defaults::POLL_INTERVAL_MS,
            )
            .max(1),
            anchor_timeout_ms: defaults::env_u64(
                defaults::ENV_ANCHOR_TIMEOUT_MS,
                defaults::ANCHOR_TIMEOUT_MS,
            ),
            capture_timeout_ms: defaults::env_u64(
                defaults::ENV_CAPTURE_TIMEOUT_MS,
                defaults::CAPTURE_TIMEOUT_MS,
            ),
            max_artifacts: defaults::env_u64(
                defaults::ENV_MAX_ARTIFACTS,
                defaults::MAX_ARTIFACTS as u64,
            )
            .min(defaults::MAX_ARTIFACTS as u64) as usize,
            fetch_limit: defaults::env_u64(defaults::ENV_FETCH_LIMIT, defaults::FETCH_LIMIT as u64)
                .max(1) as usize,
            strictness,
            pending_stale_ms: defaults::env_u64(
                defaults::ENV_PENDING_STALE_MS,
                defaults::PENDING_STALE_MS,
            ),
            ..Self::default()
        }
    }

    pub fn with_responder_id(mut self, id: impl Into<String>) -> Self {
        self.responder_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms.max(1);
        self
    }

    pub fn with_anchor_timeout(mut self, ms: u64) -> Self {
        self.anchor_timeout_ms = ms;
        self
    }

    pub fn with_capture_timeout(mut self, ms: u64) -> Self {
        self.capture_timeout_ms = ms;
        self
    }

    pub fn with_max_artifacts(mut self, max: usize) -> Self {
        self.max_artifacts = max.min(defaults::MAX_ARTIFACTS);
        self
    }

    pub fn with_restart_wait(mut self, ms: u64) -> Self {
        self.restart_wait_ms = ms;
        self
    }

    pub fn with_strictness(mut self, strictness: MatchStrictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn with_pending_stale(mut self, ms: u64) -> Self {
        self.pending_stale_ms = ms;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn anchor_timeout(&self) -> Duration {
        Duration::from_millis(self.anchor_timeout_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn timestamp_slack(&self) -> Duration {
        Duration::from_millis(self.timestamp_slack_ms)
    }

    pub fn max_throttle_wait(&self) -> Duration {
        Duration::from_secs(self.max_throttle_wait_secs)
    }

    pub fn restart_wait(&self) -> Duration {
        Duration::from_millis(self.restart_wait_ms)
    }

    /// Registry expiry age, never shorter than [`total_budget`] so a retried
    /// lookup is not swept while it can still succeed.
    ///
    /// [`total_budget`]: EngineConfig::total_budget
    pub fn pending_stale(&self) -> Duration {
        Duration::from_millis(self.pending_stale_ms).max(self.total_budget())
    }

    pub fn pending_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.pending_sweep_interval_ms)
    }

    /// Hard upper bound on one lookup: two full attempts, the restart wait
    /// in between, one throttle extension per attempt, and a grace margin.
    pub fn total_budget(&self) -> Duration {
        let attempt = self.anchor_timeout() + self.capture_timeout() + self.max_throttle_wait();
        attempt * 2 + self.restart_wait() + Duration::from_millis(self.grace_ms)
    }
}
