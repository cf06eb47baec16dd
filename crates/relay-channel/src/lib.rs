//! # relay-channel
//!
//! The single long-lived session with the responder: connect handshake,
//! readiness gating, background supervision and serialized restart.

pub mod config;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod session;

pub use config::SessionConfig;
pub use session::{ChannelSession, SupervisorHandle};
