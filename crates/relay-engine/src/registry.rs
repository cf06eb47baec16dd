//! Registry of in-flight lookups.
//!
//! Each lookup registers on entry and completes on exit. A periodic sweep
//! evicts entries that outlived the stale window and tells their waiters, so
//! an abandoned lookup cannot linger past its budget.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use relay_core::logging::mask_id;
use relay_core::{Error, Result};

/// Delivered to a waiter when its entry is removed by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOutcome {
    Expired,
}

struct PendingEntry {
    id_number: String,
    correlation_token: String,
    registered_at: DateTime<Utc>,
    started: Instant,
    waiter: oneshot::Sender<PendingOutcome>,
}

/// Point-in-time view of one pending lookup.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSnapshot {
    pub id: Uuid,
    /// Masked identifier.
    pub id_number: String,
    pub correlation_token: String,
    pub registered_at: DateTime<Utc>,
    pub age_ms: u64,
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrySnapshot {
    pub pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_age_ms: Option<u64>,
    pub entries: Vec<PendingSnapshot>,
}

pub struct PendingRegistry {
    entries: Mutex<HashMap<Uuid, PendingEntry>>,
    stale_after: Duration,
}

impl PendingRegistry {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stale_after,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, PendingEntry>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Internal("pending registry lock poisoned".into()))
    }

    /// Register a lookup. The receiver resolves if the entry is swept.
    pub fn register(
        &self,
        id_number: &str,
        correlation_token: &str,
    ) -> Result<(Uuid, oneshot::Receiver<PendingOutcome>)> {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::now_v7();
        let entry = PendingEntry {
            id_number: id_number.to_string(),
            correlation_token: correlation_token.to_string(),
            registered_at: Utc::now(),
            started: Instant::now(),
            waiter: tx,
        };
        let pending = {
            let mut entries = self.lock()?;
            entries.insert(id, entry);
            entries.len()
        };
        debug!(
            subsystem = "registry",
            token = correlation_token,
            pending,
            "Registered pending lookup"
        );
        Ok((id, rx))
    }

    /// Remove a finished lookup. Returns false if it was already swept.
    pub fn complete(&self, id: Uuid) -> bool {
        match self.lock() {
            Ok(mut entries) => entries.remove(&id).is_some(),
            Err(_) => false,
        }
    }

    /// Evict entries older than the stale window and notify their waiters.
    pub fn sweep(&self) -> usize {
        let expired: Vec<(Uuid, PendingEntry)> = match self.lock() {
            Ok(mut entries) => {
                let stale: Vec<Uuid> = entries
                    .iter()
                    .filter(|(_, e)| e.started.elapsed() >= self.stale_after)
                    .map(|(id, _)| *id)
                    .collect();
                stale
                    .into_iter()
                    .filter_map(|id| entries.remove(&id).map(|e| (id, e)))
                    .collect()
            }
            Err(_) => return 0,
        };

        let count = expired.len();
        for (id, entry) in expired {
            debug!(
                subsystem = "registry",
                %id,
                id_number = %mask_id(&entry.id_number),
                token = %entry.correlation_token,
                "Expiring stale lookup"
            );
            let _ = entry.waiter.send(PendingOutcome::Expired);
        }
        if count > 0 {
            info!(subsystem = "registry", op = "sweep", expired = count, "Swept stale lookups");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let Ok(entries) = self.lock() else {
            return RegistrySnapshot::default();
        };
        let mut items: Vec<PendingSnapshot> = entries
            .iter()
            .map(|(id, e)| PendingSnapshot {
                id: *id,
                id_number: mask_id(&e.id_number),
                correlation_token: e.correlation_token.clone(),
                registered_at: e.registered_at,
                age_ms: e.started.elapsed().as_millis() as u64,
            })
            .collect();
        drop(entries);

        items.sort_by(|a, b| b.age_ms.cmp(&a.age_ms).then(a.id.cmp(&b.id)));
        RegistrySnapshot {
            pending: items.len(),
            oldest_age_ms: items.first().map(|s| s.age_ms),
            entries: items,
        }
    }

    /// Spawn a task that sweeps every `interval`.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let registry = Arc::clone(self);
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = sleep(interval) => {
                        registry.sweep();
                    }
                }
            }
            debug!(subsystem = "registry", "Sweeper stopped");
        });
        SweeperHandle { shutdown_tx, join }
    }
}

/// Handle for stopping the background sweeper.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        self.join
            .await
            .map_err(|e| Error::Internal(format!("Sweeper task failed: {}", e)))
    }
}
