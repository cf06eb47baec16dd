//! Seams to the external chat transport.
//!
//! The concrete protocol client lives outside this workspace. The session
//! only needs the operations below.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::ChannelMessage;
use crate::Result;

/// One live connection to the conversational channel.
///
/// Connectivity faults must be reported as [`crate::Error::Channel`] so the
/// engine can apply its restart-and-retry policy.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Establish the connection and complete the handshake.
    async fn connect(&self) -> Result<()>;

    /// Live connectivity probe.
    async fn is_connected(&self) -> bool;

    /// Send a text message to `target`.
    async fn send_text(&self, target: &str, text: &str) -> Result<()>;

    /// Most recent messages in the conversation with `target`, newest first.
    async fn recent_messages(&self, target: &str, limit: usize) -> Result<Vec<ChannelMessage>>;

    /// Download the attachment of `message` into memory.
    async fn download_media(&self, message: &ChannelMessage) -> Result<Vec<u8>>;

    /// Close the connection.
    async fn disconnect(&self) -> Result<()>;

    /// Cheap request that keeps the connection warm.
    async fn keep_alive(&self) -> Result<()> {
        if self.is_connected().await {
            Ok(())
        } else {
            Err(crate::Error::Channel("keep-alive on closed connection".into()))
        }
    }
}

/// Factory for fresh transports. Each (re)connect discards the old transport
/// and opens a new one.
pub trait ChannelConnector: Send + Sync {
    fn open(&self) -> Arc<dyn ChannelTransport>;
}

impl<F> ChannelConnector for F
where
    F: Fn() -> Arc<dyn ChannelTransport> + Send + Sync,
{
    fn open(&self) -> Arc<dyn ChannelTransport> {
        self()
    }
}
