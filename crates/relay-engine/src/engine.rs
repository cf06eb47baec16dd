//! Correlation engine: turns one `lookup(id)` call into a command on the
//! shared channel and demultiplexes the responder's replies back to it.
//!
//! Correlation is best-effort. The responder does not echo a request id, so
//! a reply is attributed by sender, timestamp and its labeled identifier.
//!
//! ## Lookup phases
//!
//! 1. send `"{prefix} {id}"`
//! 2. poll for the anchor reply (extending the deadline on throttle notices)
//! 3. extract fields and process the anchor's own photo
//! 4. sweep for further photos until the capture budget or the artifact cap
//!
//! A channel fault during phases 1-2 restarts the session and retries once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use relay_channel::ChannelSession;
use relay_core::logging::mask_id;
use relay_core::{
    classify_with, extract_fields, validate_id_number, BrandingFilter, ChannelMessage,
    ClassifierThresholds, Error, ErrorKind, ImageArtifact, Query, QueryResult, Result,
    SessionState,
};

use crate::config::EngineConfig;
use crate::matcher::{is_throttle_notice, AnchorMatcher, MatchStrictness};
use crate::registry::{PendingOutcome, PendingRegistry, PendingSnapshot, SweeperHandle};

const TOKEN_LEN: usize = 8;

/// Fresh advisory correlation token.
pub fn new_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Serializable health view for the host's status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: SessionState,
    pub ready: bool,
    pub strictness: MatchStrictness,
    pub pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending_age_ms: Option<u64>,
    pub entries: Vec<PendingSnapshot>,
}

pub struct CorrelationEngine {
    session: ChannelSession,
    config: EngineConfig,
    branding: BrandingFilter,
    thresholds: ClassifierThresholds,
    registry: Arc<PendingRegistry>,
}

impl CorrelationEngine {
    pub fn new(session: ChannelSession, config: EngineConfig) -> Self {
        let registry = Arc::new(PendingRegistry::new(config.pending_stale()));
        Self {
            session,
            config,
            branding: BrandingFilter::default(),
            thresholds: ClassifierThresholds::default(),
            registry,
        }
    }

    pub fn with_branding(mut self, branding: BrandingFilter) -> Self {
        self.branding = branding;
        self
    }

    pub fn with_thresholds(mut self, thresholds: ClassifierThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn session(&self) -> &ChannelSession {
        &self.session
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    /// Start the periodic sweep of stale pending lookups.
    pub fn start_sweeper(&self) -> SweeperHandle {
        self.registry
            .start_sweeper(self.config.pending_sweep_interval())
    }

    pub fn status(&self) -> EngineStatus {
        let snapshot = self.registry.snapshot();
        let state = self.session.state();
        EngineStatus {
            state,
            ready: state.is_ready(),
            strictness: self.config.strictness,
            pending: snapshot.pending,
            oldest_pending_age_ms: snapshot.oldest_age_ms,
            entries: snapshot.entries,
        }
    }

    /// Look up one identifier. Always returns, within the total budget.
    #[instrument(
        skip(self, id_number),
        fields(subsystem = "engine", op = "lookup", id_number = %mask_id(id_number))
    )]
    pub async fn lookup(&self, id_number: &str) -> QueryResult {
        let start = Instant::now();

        if let Err(e) = validate_id_number(id_number) {
            debug!(error = %e, "Rejected identifier");
            return QueryResult::from_error(id_number, &e);
        }

        let state = self.session.state();
        if !state.is_ready() {
            warn!(%state, "Lookup refused, session not ready");
            return QueryResult::failure(
                id_number,
                ErrorKind::SessionUnavailable,
                format!("session is {}", state),
            );
        }

        let token = new_token();
        let (pending_id, expired_rx) = match self.registry.register(id_number, &token) {
            Ok(registration) => registration,
            Err(e) => return QueryResult::from_error(id_number, &e).with_token(token),
        };

        let budget = self.config.total_budget();
        let result = tokio::select! {
            outcome = timeout(budget, self.run(id_number, token.clone())) => match outcome {
                Ok(result) => result,
                Err(_) => QueryResult::failure(
                    id_number,
                    ErrorKind::Timeout,
                    format!("no reply within {}s", budget.as_secs()),
                )
                .with_token(token.clone()),
            },
            Ok(PendingOutcome::Expired) = expired_rx => QueryResult::failure(
                id_number,
                ErrorKind::Timeout,
                "lookup expired",
            )
            .with_token(token.clone()),
        };
        self.registry.complete(pending_id);

        info!(
            token = %token,
            success = result.success,
            error_kind = result.error_kind.map(|k| k.as_str()).unwrap_or("-"),
            field_count = result.record.as_ref().map(|r| r.len()).unwrap_or(0),
            artifact_count = result.images.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Lookup finished"
        );
        result
    }

    /// One attempt, plus a single restart-and-retry on a channel fault.
    async fn run(&self, id_number: &str, token: String) -> QueryResult {
        let err = match self.attempt(id_number, &token).await {
            Ok(result) => return result,
            Err(e) if e.is_connectivity() => e,
            Err(e) => return QueryResult::from_error(id_number, &e).with_token(token),
        };

        warn!(token = %token, attempt = 1, error = %err, "Channel fault, restarting session");
        if self.session.restart().await.is_none() {
            debug!("Restart already in progress, waiting for it");
        }
        if let Err(wait_err) = self.session.wait_ready(self.config.restart_wait()).await {
            return QueryResult::failure(
                id_number,
                ErrorKind::ChannelError,
                format!("{}; session did not recover: {}", err, wait_err),
            )
            .with_token(token);
        }

        let retry_token = new_token();
        info!(token = %retry_token, attempt = 2, "Retrying lookup");
        match self.attempt(id_number, &retry_token).await {
            Ok(result) => result,
            Err(e) => QueryResult::from_error(id_number, &e).with_token(retry_token),
        }
    }

    async fn attempt(&self, id_number: &str, token: &str) -> Result<QueryResult> {
        let matcher = AnchorMatcher::new(id_number, self.config.strictness)?;
        let mut state_rx = self.session.subscribe();

        let query = Query::new(id_number, token, self.config.anchor_timeout());
        let command = format!("{} {}", self.config.command_prefix, query.id_number);
        self.session.send_command(&command).await?;
        debug!(token, deadline = %query.deadline, "Command sent");

        let floor = query.created_at
            - chrono::Duration::from_std(self.config.timestamp_slack())
                .unwrap_or_else(|_| chrono::Duration::zero());

        let anchor = self.await_anchor(&matcher, floor, &mut state_rx).await?;
        let record = extract_fields(anchor.text());
        debug!(
            message_id = anchor.id,
            field_count = record.len(),
            "Anchor reply matched"
        );

        let mut images = Vec::new();
        let mut seen = HashSet::from([anchor.id]);
        let capture_deadline = Instant::now() + self.config.capture_timeout();

        if anchor.has_photo() {
            match self.download(&anchor, capture_deadline).await {
                Ok(Some(bytes)) => self.push_artifact(bytes, &mut images),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Anchor photo lost, returning record without capture");
                    return Ok(QueryResult::success(
                        query.id_number,
                        query.correlation_token,
                        record,
                        images,
                    ));
                }
            }
        }

        self.capture(&matcher, floor, capture_deadline, &mut seen, &mut images, &mut state_rx)
            .await;

        Ok(QueryResult::success(
            query.id_number,
            query.correlation_token,
            record,
            images,
        ))
    }

    /// Responder messages at or after `floor`, oldest first.
    fn replies_since(
        &self,
        batch: Vec<ChannelMessage>,
        floor: DateTime<Utc>,
    ) -> Vec<ChannelMessage> {
        let mut replies: Vec<ChannelMessage> = batch
            .into_iter()
            .filter(|m| m.sender == self.config.responder_id && m.timestamp >= floor)
            .collect();
        replies.sort_by_key(|m| (m.timestamp, m.id));
        replies
    }

    async fn await_anchor(
        &self,
        matcher: &AnchorMatcher,
        floor: DateTime<Utc>,
        state_rx: &mut watch::Receiver<SessionState>,
    ) -> Result<ChannelMessage> {
        let mut deadline = Instant::now() + self.config.anchor_timeout();
        let mut throttled: HashSet<i64> = HashSet::new();

        loop {
            let batch = self.session.recent(self.config.fetch_limit).await?;
            for msg in self.replies_since(batch, floor) {
                if matcher.is_anchor(msg.text()) {
                    return Ok(msg);
                }
                if let Some(secs) = is_throttle_notice(msg.text()) {
                    if throttled.insert(msg.id) {
                        let extension = Duration::from_secs(secs).min(self.config.max_throttle_wait());
                        deadline += extension;
                        info!(
                            message_id = msg.id,
                            requested_secs = secs,
                            extension_ms = extension.as_millis() as u64,
                            "Responder throttled, extending deadline"
                        );
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(format!(
                    "no reply within {}ms",
                    self.config.anchor_timeout_ms
                )));
            }

            let nap = self.config.poll_interval().min(deadline - now);
            tokio::select! {
                _ = sleep(nap) => {}
                _ = state_rx.wait_for(|s| *s == SessionState::Disconnected) => {
                    return Err(Error::Channel(
                        "session disconnected while waiting for reply".into(),
                    ));
                }
            }
        }
    }

    /// Collect further photos until the deadline or the artifact cap.
    async fn capture(
        &self,
        matcher: &AnchorMatcher,
        floor: DateTime<Utc>,
        deadline: Instant,
        seen: &mut HashSet<i64>,
        images: &mut Vec<ImageArtifact>,
        state_rx: &mut watch::Receiver<SessionState>,
    ) {
        let max = self.config.max_artifacts;

        'capture: while images.len() < max && Instant::now() < deadline {
            let batch = match self.session.recent(self.config.fetch_limit).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "Capture ended by channel error");
                    break;
                }
            };

            for msg in self.replies_since(batch, floor) {
                if !msg.has_photo() || !seen.insert(msg.id) {
                    continue;
                }
                if matcher.is_foreign(msg.text()) {
                    debug!(message_id = msg.id, "Skipping photo labeled for another identifier");
                    continue;
                }
                match self.download(&msg, deadline).await {
                    Ok(Some(bytes)) => {
                        self.push_artifact(bytes, images);
                        if images.len() >= max {
                            break 'capture;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        debug!(error = %e, "Capture stopped");
                        break 'capture;
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::select! {
                _ = sleep(self.config.poll_interval().min(deadline - now)) => {}
                _ = state_rx.wait_for(|s| *s == SessionState::Disconnected) => {
                    warn!("Capture ended by disconnect");
                    break;
                }
            }
        }

        debug!(artifact_count = images.len(), "Capture finished");
    }

    /// Download on a detached task, bounded by `deadline`.
    ///
    /// `Ok(None)` is a per-image failure that the lookup survives. `Err` ends
    /// the capture: a connectivity fault or the deadline.
    async fn download(&self, msg: &ChannelMessage, deadline: Instant) -> Result<Option<Vec<u8>>> {
        let session = self.session.clone();
        let message = msg.clone();
        let task = tokio::spawn(async move { session.download(&message).await });

        match timeout_at(deadline, task).await {
            Err(_) => Err(Error::Timeout("capture deadline reached during download".into())),
            Ok(Err(join_err)) => {
                warn!(message_id = msg.id, error = %join_err, "Download task failed");
                Ok(None)
            }
            Ok(Ok(Err(e))) if e.is_connectivity() => Err(e),
            Ok(Ok(Err(e))) => {
                warn!(message_id = msg.id, error = %e, "Dropping image that failed to download");
                Ok(None)
            }
            Ok(Ok(Ok(bytes))) => Ok(Some(bytes)),
        }
    }

    fn push_artifact(&self, bytes: Vec<u8>, images: &mut Vec<ImageArtifact>) {
        if self.branding.is_branding(&bytes) {
            debug!(size_bytes = bytes.len(), "Discarding branding image");
            return;
        }
        let category = classify_with(&bytes, images.len(), &self.thresholds);
        images.push(ImageArtifact::new(category, bytes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let token = new_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(new_token(), new_token());
    }

    #[test]
    fn test_status_serializes_state() {
        let status = EngineStatus {
            state: SessionState::Degraded,
            ready: false,
            strictness: MatchStrictness::Labeled,
            pending: 0,
            oldest_pending_age_ms: None,
            entries: Vec::new(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "DEGRADED");
        assert_eq!(json["strictness"], "labeled");
        assert!(json.get("oldest_pending_age_ms").is_none());
    }
}
