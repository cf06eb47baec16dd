//! Process bootstrap for hosts embedding the engine.
//!
//! Loads `.env`, installs the tracing subscriber and wires session, engine
//! and background tasks together from environment configuration.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_channel::{ChannelSession, SessionConfig, SupervisorHandle};
use relay_core::{BrandingFilter, ChannelConnector};

use crate::config::EngineConfig;
use crate::engine::CorrelationEngine;
use crate::registry::SweeperHandle;

const DEFAULT_FILTER: &str = "relay_engine=info,relay_channel=info,relay_core=info";

/// Install the global tracing subscriber.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables daily-rotated file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors
///   RUST_LOG    - standard env filter
///
/// Keep the returned guard alive for the life of the process when file
/// logging is enabled, or buffered lines are lost.
pub fn init_tracing() -> anyhow::Result<Option<WorkerGuard>> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = Path::new(path);
        let dir = path.parent().unwrap_or(Path::new("."));
        let name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("relay.log");
        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));

        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .try_init()?;
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).try_init()?;
        }
        Some(guard)
    } else if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
        None
    } else {
        let mut layer = tracing_subscriber::fmt::layer();
        if let Some(ansi) = log_ansi {
            layer = layer.with_ansi(ansi);
        }
        registry.with(layer).try_init()?;
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    Ok(guard)
}

/// A running engine with its background tasks.
pub struct Relay {
    pub engine: Arc<CorrelationEngine>,
    supervisor: SupervisorHandle,
    sweeper: SweeperHandle,
}

impl Relay {
    /// Build everything from the environment and start background tasks.
    ///
    /// A failed initial connect is logged, not returned: the supervisor
    /// keeps retrying and lookups report `SESSION_UNAVAILABLE` meanwhile.
    pub async fn start(connector: Arc<dyn ChannelConnector>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let session_config = SessionConfig::from_env();
        let engine_config = EngineConfig::from_env();
        info!(
            target_handle = %session_config.target,
            responder = %engine_config.responder_id,
            strictness = %engine_config.strictness,
            "Starting relay"
        );

        let session = ChannelSession::new(session_config, connector);
        if let Err(e) = session.connect().await {
            error!(error = %e, "Initial connect failed, supervisor will retry");
        }

        let engine = CorrelationEngine::new(session.clone(), engine_config)
            .with_branding(BrandingFilter::from_env());
        let supervisor = session.start_supervisor();
        let sweeper = engine.start_sweeper();

        Ok(Self {
            engine: Arc::new(engine),
            supervisor,
            sweeper,
        })
    }

    /// Stop background tasks.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.sweeper.shutdown().await?;
        self.supervisor.shutdown().await?;
        info!("Relay stopped");
        Ok(())
    }
}
