//! Scripted in-memory channel for deterministic testing.
//!
//! One [`MockChannel`] acts as both the connector and every transport it
//! opens; clones share the same conversation, so a test keeps a handle to
//! inject messages and inspect what was sent.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_channel::mock::{MockChannel, ScriptedReply};
//!
//! let mock = MockChannel::new().with_responder(|command| {
//!     vec![ScriptedReply::text(format!("DNI ➾ {}", &command[6..]))]
//! });
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::sleep;

use relay_core::{
    defaults, ChannelConnector, ChannelMessage, ChannelTransport, Error, MediaRef, Result,
};

/// Sender name recorded for messages this side sends.
pub const SELF_SENDER: &str = "me";

type Responder = Arc<dyn Fn(&str) -> Vec<ScriptedReply> + Send + Sync>;

/// One message the responder emits after a command.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReply {
    pub text: Option<String>,
    pub image: Option<Vec<u8>>,
    pub sender: Option<String>,
    pub delay: Duration,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn photo(data: Vec<u8>) -> Self {
        Self {
            image: Some(data),
            ..Default::default()
        }
    }

    /// Photo with a caption.
    pub fn photo_with_text(data: Vec<u8>, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: Some(data),
            ..Default::default()
        }
    }

    pub fn from_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
struct MockState {
    connected: bool,
    messages: Vec<ChannelMessage>,
    media: HashMap<String, Vec<u8>>,
    next_id: i64,
    sent: Vec<String>,

    connect_failures: usize,
    send_failures: usize,
    recent_failures: usize,
    download_failures: usize,
    download_faults: usize,
    keep_alive_fails: bool,

    connect_calls: usize,
    disconnect_calls: usize,
    send_calls: usize,
    recent_calls: usize,
    download_calls: usize,
}

#[derive(Clone, Default)]
struct MockTiming {
    connect_delay: Duration,
    disconnect_delay: Duration,
    download_delay: Duration,
}

/// Scripted channel transport and connector.
#[derive(Clone)]
pub struct MockChannel {
    state: Arc<Mutex<MockState>>,
    timing: MockTiming,
    responder: Option<Responder>,
    responder_id: String,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_id: 1,
                ..Default::default()
            })),
            timing: MockTiming::default(),
            responder: None,
            responder_id: defaults::RESPONDER_ID.to_string(),
        }
    }

    /// Script the replies produced for each sent command.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str) -> Vec<ScriptedReply> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Default sender for scripted replies.
    pub fn with_responder_id(mut self, id: impl Into<String>) -> Self {
        self.responder_id = id.into();
        self
    }

    /// Fail the first `n` connect attempts.
    pub fn fail_connects(self, n: usize) -> Self {
        self.set_connect_failures(n);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.timing.connect_delay = delay;
        self
    }

    pub fn with_disconnect_delay(mut self, delay: Duration) -> Self {
        self.timing.disconnect_delay = delay;
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.timing.download_delay = delay;
        self
    }

    pub fn set_connect_failures(&self, n: usize) {
        self.state.lock().unwrap().connect_failures = n;
    }

    pub fn fail_next_send(&self, n: usize) {
        self.state.lock().unwrap().send_failures = n;
    }

    pub fn fail_next_recent(&self, n: usize) {
        self.state.lock().unwrap().recent_failures = n;
    }

    pub fn fail_next_download(&self, n: usize) {
        self.state.lock().unwrap().download_failures = n;
    }

    /// Fail the next `n` downloads with a channel error while the link stays up.
    pub fn fault_next_download(&self, n: usize) {
        self.state.lock().unwrap().download_faults = n;
    }

    pub fn fail_keep_alive(&self, fail: bool) {
        self.state.lock().unwrap().keep_alive_fails = fail;
    }

    /// Simulate the link going away underneath the session.
    pub fn drop_connection(&self) {
        self.state.lock().unwrap().connected = false;
    }

    /// Append a text message to the conversation.
    pub fn push_text(&self, sender: &str, text: &str) -> i64 {
        self.push(sender, Some(text.to_string()), None, Utc::now())
    }

    /// Append a text message with an explicit timestamp.
    pub fn push_text_at(&self, sender: &str, text: &str, timestamp: DateTime<Utc>) -> i64 {
        self.push(sender, Some(text.to_string()), None, timestamp)
    }

    /// Append a photo, optionally captioned.
    pub fn push_photo(&self, sender: &str, data: Vec<u8>, caption: Option<&str>) -> i64 {
        self.push(sender, caption.map(str::to_string), Some(data), Utc::now())
    }

    fn push(
        &self,
        sender: &str,
        text: Option<String>,
        image: Option<Vec<u8>>,
        timestamp: DateTime<Utc>,
    ) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;

        let media = image.map(|data| {
            let media_id = format!("media-{}", id);
            state.media.insert(media_id.clone(), data);
            MediaRef::photo(media_id)
        });

        state.messages.push(ChannelMessage {
            id,
            timestamp,
            sender: sender.to_string(),
            text,
            media,
        });
        id
    }

    fn deliver(&self, reply: ScriptedReply) {
        let sender = reply
            .sender
            .clone()
            .unwrap_or_else(|| self.responder_id.clone());
        if reply.delay.is_zero() {
            self.push(&sender, reply.text, reply.image, Utc::now());
        } else {
            let mock = self.clone();
            tokio::spawn(async move {
                sleep(reply.delay).await;
                mock.push(&sender, reply.text, reply.image, Utc::now());
            });
        }
    }

    /// Commands sent through the channel, in order.
    pub fn sent_commands(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Whole conversation, oldest first.
    pub fn messages(&self) -> Vec<ChannelMessage> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().unwrap().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.lock().unwrap().disconnect_calls
    }

    pub fn send_calls(&self) -> usize {
        self.state.lock().unwrap().send_calls
    }

    pub fn recent_calls(&self) -> usize {
        self.state.lock().unwrap().recent_calls
    }

    pub fn download_calls(&self) -> usize {
        self.state.lock().unwrap().download_calls
    }
}

fn take_failure(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl ChannelTransport for MockChannel {
    async fn connect(&self) -> Result<()> {
        self.state.lock().unwrap().connect_calls += 1;
        if !self.timing.connect_delay.is_zero() {
            sleep(self.timing.connect_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if take_failure(&mut state.connect_failures) {
            return Err(Error::Channel("scripted connect failure".into()));
        }
        state.connected = true;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn send_text(&self, _target: &str, text: &str) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.send_calls += 1;
            if take_failure(&mut state.send_failures) {
                state.connected = false;
                return Err(Error::Channel("scripted send failure".into()));
            }
            if !state.connected {
                return Err(Error::Channel("not connected".into()));
            }
            state.sent.push(text.to_string());
        }
        self.push(SELF_SENDER, Some(text.to_string()), None, Utc::now());

        if let Some(responder) = &self.responder {
            for reply in responder(text) {
                self.deliver(reply);
            }
        }
        Ok(())
    }

    async fn recent_messages(&self, _target: &str, limit: usize) -> Result<Vec<ChannelMessage>> {
        let mut state = self.state.lock().unwrap();
        state.recent_calls += 1;
        if take_failure(&mut state.recent_failures) {
            state.connected = false;
            return Err(Error::Channel("scripted history failure".into()));
        }
        if !state.connected {
            return Err(Error::Channel("not connected".into()));
        }
        Ok(state.messages.iter().rev().take(limit).cloned().collect())
    }

    async fn download_media(&self, message: &ChannelMessage) -> Result<Vec<u8>> {
        self.state.lock().unwrap().download_calls += 1;
        if !self.timing.download_delay.is_zero() {
            sleep(self.timing.download_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if take_failure(&mut state.download_failures) {
            return Err(Error::Media("scripted download failure".into()));
        }
        if take_failure(&mut state.download_faults) {
            return Err(Error::Channel("scripted transient download fault".into()));
        }
        let media = message
            .media
            .as_ref()
            .ok_or_else(|| Error::Media(format!("message {} has no attachment", message.id)))?;
        state
            .media
            .get(&media.id)
            .cloned()
            .ok_or_else(|| Error::Media(format!("unknown media {}", media.id)))
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.lock().unwrap().disconnect_calls += 1;
        if !self.timing.disconnect_delay.is_zero() {
            sleep(self.timing.disconnect_delay).await;
        }
        self.state.lock().unwrap().connected = false;
        Ok(())
    }

    async fn keep_alive(&self) -> Result<()> {
        let state = self.state.lock().unwrap();
        if state.keep_alive_fails {
            return Err(Error::Channel("scripted keep-alive failure".into()));
        }
        if state.connected {
            Ok(())
        } else {
            Err(Error::Channel("keep-alive on closed connection".into()))
        }
    }
}

impl ChannelConnector for MockChannel {
    fn open(&self) -> Arc<dyn ChannelTransport> {
        Arc::new(self.clone())
    }
}
