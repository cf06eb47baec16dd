//! # relay-engine
//!
//! Correlation engine for relay: issues lookups over the shared channel
//! session, matches the responder's replies, and assembles the result.
//!
//! ## Example
//!
//! ```rust,ignore
//! use relay_engine::bootstrap::{init_tracing, Relay};
//!
//! let _guard = init_tracing()?;
//! let relay = Relay::start(connector).await?;
//! let result = relay.engine.lookup("12345678").await;
//! println!("{}", serde_json::to_string(&result)?);
//! ```

pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod matcher;
pub mod registry;

pub use config::EngineConfig;
pub use engine::{CorrelationEngine, EngineStatus};
pub use matcher::{AnchorMatcher, MatchStrictness};
pub use registry::{PendingOutcome, PendingRegistry, RegistrySnapshot, SweeperHandle};
