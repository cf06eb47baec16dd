//! # relay-core
//!
//! Core types, traits, and pure functions for relay.
//!
//! This crate provides the data model shared by the channel session and the
//! correlation engine, the transport seam, and the two stateless pieces of
//! reply handling: field extraction and image classification.

pub mod classify;
pub mod defaults;
pub mod error;
pub mod extract;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use classify::{classify, classify_with, image_dimensions, BrandingFilter, ClassifierThresholds};
pub use error::{Error, ErrorKind, Result};
pub use extract::{extract_fields, labeled_pattern, strip_markup};
pub use models::*;
pub use traits::{ChannelConnector, ChannelTransport};
