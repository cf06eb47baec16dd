//! Centralized default constants for relay.
//!
//! **This module is the single source of truth** for shared default values.
//! Config types in `relay-channel` and `relay-engine` read their fallbacks
//! from here instead of defining their own magic numbers.

// =============================================================================
// CHANNEL SESSION
// =============================================================================

/// Handle of the automated responder the session talks to.
pub const TARGET: &str = "@OlimpoDataBot";

/// Sender identity attributed to responder replies.
pub const RESPONDER_ID: &str = "OlimpoDataBot";

/// Supervisor health-check interval in milliseconds.
pub const HEALTH_INTERVAL_MS: u64 = 5_000;

/// Supervisor back-off after a failed tick, in milliseconds.
pub const ERROR_BACKOFF_MS: u64 = 10_000;

/// Upper bound on the initial connect handshake, in milliseconds.
pub const CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Bounded wait for a graceful disconnect during restart, in milliseconds.
pub const DISCONNECT_GRACE_MS: u64 = 5_000;

// =============================================================================
// CORRELATION
// =============================================================================

/// Command prefix sent ahead of the identifier.
pub const COMMAND_PREFIX: &str = "/dnit";

/// Field label the responder uses to echo the identifier.
pub const ANCHOR_LABEL: &str = "DNI";

/// Banner lines the responder signs detailed replies with.
pub const BANNER_MARKERS: &[&str] = &["RENIEC ONLINE", "OLIMPO_BOT"];

/// Interval between anchor scans, in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 1_000;

/// Budget for finding the anchor message, in milliseconds.
pub const ANCHOR_TIMEOUT_MS: u64 = 30_000;

/// Budget for the secondary attachment sweep, in milliseconds.
pub const CAPTURE_TIMEOUT_MS: u64 = 6_000;

/// Maximum number of image artifacts per lookup.
pub const MAX_ARTIFACTS: usize = 4;

/// Number of recent messages fetched per scan.
pub const FETCH_LIMIT: usize = 15;

/// Slack subtracted from the send time when filtering replies.
///
/// The channel reports whole-second timestamps, so a reply in the same
/// second as the command can carry a timestamp before `sent_at`.
pub const TIMESTAMP_SLACK_MS: u64 = 1_000;

/// Cap on the deadline extension granted by one throttle notice, in seconds.
pub const MAX_THROTTLE_WAIT_SECS: u64 = 15;

/// Wait for the session to come back after a restart, in milliseconds.
pub const RESTART_WAIT_MS: u64 = 10_000;

/// Grace margin added to the total lookup budget, in milliseconds.
pub const LOOKUP_GRACE_MS: u64 = 2_000;

// =============================================================================
// PENDING REGISTRY
// =============================================================================

/// Age after which a pending query is swept as expired, in milliseconds.
/// Outlasts a full lookup including its restart-and-retry.
pub const PENDING_STALE_MS: u64 = 120_000;

/// Interval between registry sweeps, in milliseconds.
pub const PENDING_SWEEP_INTERVAL_MS: u64 = 15_000;

// =============================================================================
// IMAGE CLASSIFICATION
// =============================================================================

/// Images smaller than this are treated as watermarks/logos.
pub const MIN_IMAGE_BYTES: usize = 2_048;

/// Leading bytes compared against the reference branding image.
pub const BRANDING_PREFIX_LEN: usize = 1_024;

/// Minimum height for a portrait image to count as a face photo.
pub const FACE_MIN_HEIGHT: u32 = 200;

/// Minimum short side for a near-square image to count as a face photo.
pub const FACE_MIN_SQUARE_SIDE: u32 = 300;

/// Aspect ratio (width / height) at or above which an image is "wide".
pub const SIGNATURE_MIN_ASPECT: f64 = 1.8;

/// Maximum width of a signature strip.
pub const SIGNATURE_MAX_WIDTH: u32 = 1_000;

/// Aspect ratio band treated as near-square.
pub const SQUARE_ASPECT_MIN: f64 = 0.8;
pub const SQUARE_ASPECT_MAX: f64 = 1.25;

// =============================================================================
// ENVIRONMENT VARIABLE NAMES
// =============================================================================

pub const ENV_TARGET: &str = "RELAY_TARGET";
pub const ENV_RESPONDER_ID: &str = "RELAY_RESPONDER_ID";
pub const ENV_HEALTH_INTERVAL_MS: &str = "RELAY_HEALTH_INTERVAL_MS";
pub const ENV_ERROR_BACKOFF_MS: &str = "RELAY_ERROR_BACKOFF_MS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "RELAY_CONNECT_TIMEOUT_MS";
pub const ENV_COMMAND_PREFIX: &str = "RELAY_COMMAND_PREFIX";
pub const ENV_POLL_INTERVAL_MS: &str = "RELAY_POLL_INTERVAL_MS";
pub const ENV_ANCHOR_TIMEOUT_MS: &str = "RELAY_ANCHOR_TIMEOUT_MS";
pub const ENV_CAPTURE_TIMEOUT_MS: &str = "RELAY_CAPTURE_TIMEOUT_MS";
pub const ENV_MAX_ARTIFACTS: &str = "RELAY_MAX_ARTIFACTS";
pub const ENV_FETCH_LIMIT: &str = "RELAY_FETCH_LIMIT";
pub const ENV_MATCH_STRICTNESS: &str = "RELAY_MATCH_STRICTNESS";
pub const ENV_PENDING_STALE_MS: &str = "RELAY_PENDING_STALE_MS";
pub const ENV_BRANDING_IMAGE_PATH: &str = "BRANDING_IMAGE_PATH";

/// Read a numeric env var, falling back to `default` when unset or unparsable.
pub fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Read a string env var, falling back to `default` when unset or empty.
pub fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
