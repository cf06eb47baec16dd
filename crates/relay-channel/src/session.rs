//! The single long-lived session with the responder.
//!
//! State lives in a `watch` channel so query tasks can both snapshot it and
//! react to a drop while they are polling. The transport slot is only filled
//! after a handshake completes, so nobody observes a half-reconnected session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

use relay_core::{
    ChannelConnector, ChannelMessage, ChannelTransport, Error, Result, SessionState,
};

use crate::config::SessionConfig;

/// Shared handle to the channel session. Cheap to clone.
#[derive(Clone)]
pub struct ChannelSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    connector: Arc<dyn ChannelConnector>,
    transport: RwLock<Option<Arc<dyn ChannelTransport>>>,
    state_tx: watch::Sender<SessionState>,
    /// Held for the whole teardown + connect sequence.
    reconnect_lock: Arc<Mutex<()>>,
}

impl ChannelSession {
    /// Create a disconnected session. Nothing is opened until [`connect`].
    ///
    /// [`connect`]: ChannelSession::connect
    pub fn new(config: SessionConfig, connector: Arc<dyn ChannelConnector>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            inner: Arc::new(SessionInner {
                config,
                connector,
                transport: RwLock::new(None),
                state_tx,
                reconnect_lock: Arc::new(Mutex::new(())),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current state snapshot.
    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Whether new queries may be issued.
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    fn set_state(&self, next: SessionState) {
        let changed = self.inner.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            debug!(state = %next, "Session state changed");
        }
    }

    /// Wait until the session is ready, up to `limit`.
    pub async fn wait_ready(&self, limit: Duration) -> Result<()> {
        let mut rx = self.subscribe();
        let outcome = timeout(limit, rx.wait_for(|state| state.is_ready()))
            .await
            .map(|r| r.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::Internal("session state channel closed".into())),
            Err(_) => Err(Error::SessionUnavailable(format!(
                "session not ready after {}ms",
                limit.as_millis()
            ))),
        }
    }

    /// Connect and complete the handshake.
    ///
    /// Waits for any reconnection already in progress. Returns immediately
    /// if the session is already ready.
    #[instrument(skip(self), fields(subsystem = "channel", op = "connect"))]
    pub async fn connect(&self) -> Result<()> {
        let guard = self.inner.reconnect_lock.clone().lock_owned().await;
        if self.is_ready() {
            return Ok(());
        }
        self.reconnect_locked(guard).await
    }

    /// Teardown + connect with the reconnect lock held.
    async fn reconnect_locked(&self, _guard: OwnedMutexGuard<()>) -> Result<()> {
        self.teardown().await;
        self.set_state(SessionState::Connecting);

        let start = Instant::now();
        let transport = self.inner.connector.open();
        let outcome = match timeout(self.inner.config.connect_timeout(), transport.connect()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Channel(format!(
                "connect timed out after {}ms",
                self.inner.config.connect_timeout_ms
            ))),
        };

        match outcome {
            Ok(()) => {
                *self.inner.transport.write().await = Some(transport);
                self.set_state(SessionState::Ready);
                info!(
                    duration_ms = start.elapsed().as_millis() as u64,
                    target_handle = %self.inner.config.target,
                    "Channel session ready"
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                error!(error = %e, "Channel connect failed");
                Err(match e {
                    Error::Channel(_) => e,
                    other => Error::Channel(other.to_string()),
                })
            }
        }
    }

    /// Take the current transport out of the slot and close it, waiting at
    /// most `disconnect_grace`.
    async fn teardown(&self) {
        let Some(old) = self.inner.transport.write().await.take() else {
            return;
        };
        match timeout(self.inner.config.disconnect_grace(), old.disconnect()).await {
            Ok(Ok(())) => debug!("Previous transport closed"),
            Ok(Err(e)) => warn!(error = %e, "Error closing previous transport"),
            Err(_) => warn!(
                grace_ms = self.inner.config.disconnect_grace_ms,
                "Timed out closing previous transport"
            ),
        }
    }

    /// Tear down the connection and reconnect in a background task.
    ///
    /// Returns `None` when another reconnection already holds the lock; the
    /// caller should then just [`wait_ready`](ChannelSession::wait_ready).
    #[instrument(skip(self), fields(subsystem = "channel", op = "restart"))]
    pub async fn restart(&self) -> Option<JoinHandle<Result<()>>> {
        let guard = match self.inner.reconnect_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Reconnection already in progress, not restarting");
                return None;
            }
        };

        warn!("Restarting channel session");
        self.set_state(SessionState::Disconnected);

        let session = self.clone();
        Some(tokio::spawn(
            async move { session.reconnect_locked(guard).await },
        ))
    }

    /// Record a connectivity fault seen by a caller. Only live states are
    /// demoted; an in-progress reconnect is left alone.
    pub fn mark_disconnected(&self, reason: &str) {
        let demoted = self.inner.state_tx.send_if_modified(|state| match state {
            SessionState::Ready | SessionState::Degraded => {
                *state = SessionState::Disconnected;
                true
            }
            _ => false,
        });
        if demoted {
            warn!(reason, "Channel session marked disconnected");
        }
    }

    async fn transport(&self) -> Result<Arc<dyn ChannelTransport>> {
        self.inner
            .transport
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Channel("no open channel".into()))
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_connectivity() {
                self.mark_disconnected(&e.to_string());
            }
        }
        result
    }

    /// Send a command to the responder. Refused unless the session is ready.
    pub async fn send_command(&self, text: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::SessionUnavailable(format!(
                "session is {}",
                self.state()
            )));
        }
        let transport = self.transport().await?;
        let result = transport.send_text(&self.inner.config.target, text).await;
        self.observe(result)
    }

    /// Most recent messages in the responder conversation.
    pub async fn recent(&self, limit: usize) -> Result<Vec<ChannelMessage>> {
        let transport = self.transport().await?;
        let result = transport
            .recent_messages(&self.inner.config.target, limit)
            .await;
        self.observe(result)
    }

    /// Download the attachment of `message`.
    pub async fn download(&self, message: &ChannelMessage) -> Result<Vec<u8>> {
        let transport = self.transport().await?;
        let result = transport.download_media(message).await;
        self.observe(result)
    }

    /// Start the background supervisor.
    pub fn start_supervisor(&self) -> SupervisorHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let session = self.clone();
        let join = tokio::spawn(async move {
            session.supervise(&mut shutdown_rx).await;
        });
        SupervisorHandle { shutdown_tx, join }
    }

    async fn supervise(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        info!(
            health_interval_ms = self.inner.config.health_interval_ms,
            error_backoff_ms = self.inner.config.error_backoff_ms,
            "Channel supervisor started"
        );

        let mut delay = self.inner.config.health_interval();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Channel supervisor received shutdown signal");
                    break;
                }
                _ = sleep(delay) => {}
            }

            delay = match self.health_tick().await {
                Ok(()) => self.inner.config.health_interval(),
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_ms = self.inner.config.error_backoff_ms,
                        "Supervisor tick failed, backing off"
                    );
                    self.inner.config.error_backoff()
                }
            };
        }

        info!("Channel supervisor stopped");
    }

    /// One supervision step: reconnect if dropped, otherwise keep-alive.
    pub async fn health_tick(&self) -> Result<()> {
        let current = self.inner.transport.read().await.clone();

        let Some(transport) = current else {
            return self.reconnect_if_idle().await;
        };

        if !transport.is_connected().await {
            self.mark_disconnected("connectivity probe failed");
            return self.reconnect_if_idle().await;
        }

        if self.state() == SessionState::Disconnected {
            return self.recover_if_idle().await;
        }

        match transport.keep_alive().await {
            Ok(()) => {
                let recovered = self.inner.state_tx.send_if_modified(|state| {
                    if *state == SessionState::Degraded {
                        *state = SessionState::Ready;
                        true
                    } else {
                        false
                    }
                });
                if recovered {
                    info!("Keep-alive succeeded, session ready again");
                }
            }
            Err(e) => {
                warn!(error = %e, "Keep-alive failed");
                self.inner.state_tx.send_if_modified(|state| {
                    if *state == SessionState::Ready {
                        *state = SessionState::Degraded;
                        true
                    } else {
                        false
                    }
                });
            }
        }
        Ok(())
    }

    /// The state was demoted by a caller's fault but the link reports up.
    /// A passing keep-alive restores `Ready` on the same transport; anything
    /// else gets a full reconnect.
    async fn recover_if_idle(&self) -> Result<()> {
        let Ok(guard) = self.inner.reconnect_lock.clone().try_lock_owned() else {
            debug!("Reconnection already in progress");
            return Ok(());
        };

        let current = self.inner.transport.read().await.clone();
        let Some(transport) = current else {
            return self.reconnect_locked(guard).await;
        };

        match transport.keep_alive().await {
            Ok(()) => {
                let recovered = self.inner.state_tx.send_if_modified(|state| {
                    if *state == SessionState::Disconnected {
                        *state = SessionState::Ready;
                        true
                    } else {
                        false
                    }
                });
                if recovered {
                    info!("Link still up after channel fault, session ready again");
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Keep-alive failed after channel fault, reconnecting");
                self.reconnect_locked(guard).await
            }
        }
    }

    async fn reconnect_if_idle(&self) -> Result<()> {
        match self.inner.reconnect_lock.clone().try_lock_owned() {
            Ok(guard) => {
                info!("Reconnecting channel session");
                self.reconnect_locked(guard).await
            }
            Err(_) => {
                debug!("Reconnection already in progress");
                Ok(())
            }
        }
    }
}

/// Handle for controlling a running supervisor.
pub struct SupervisorHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Signal the supervisor to stop and wait for it.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        self.join
            .await
            .map_err(|e| Error::Internal(format!("Supervisor task failed: {}", e)))
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
