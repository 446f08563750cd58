use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::backend::RemoteStore;
use crate::config::SyncConfig;
use crate::entities::Entity;
use crate::error::{BackendError, BackendResult, StorageError, StorageResult};
use crate::storage::{OutboxRecord, SqliteStore};

/// Operations handed to the remote per drain pass.
const DRAIN_BATCH: u32 = 100;

/// Longest backoff exponent; keeps the delay arithmetic in range.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Kind of pending remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxOp {
    /// Insert or update the row.
    Upsert,
    /// Delete the row.
    Delete,
}

impl OutboxOp {
    /// Name stored in the outbox table.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxOp::Upsert => "upsert",
            OutboxOp::Delete => "delete",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "upsert" => Some(OutboxOp::Upsert),
            "delete" => Some(OutboxOp::Delete),
            _ => None,
        }
    }
}

/// What one drain pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations the backend accepted.
    pub delivered: usize,
    /// Operations that failed transiently and wait for a later pass.
    pub rescheduled: usize,
    /// Operations given up on, rejected or out of attempts.
    pub dropped: usize,
    /// The pass stopped early because nobody is signed in.
    pub deferred: bool,
}

/// Durable queue of remote writes.
///
/// Every local mutation lands here instead of calling the backend directly.
/// Pending operations survive restarts, collapse to the latest one per
/// remote row, and are retried with exponential backoff.
#[derive(Clone)]
pub struct SyncQueue {
    store: SqliteStore,
    remote: Option<Arc<dyn RemoteStore>>,
    nudge: mpsc::Sender<()>,
    config: SyncConfig,
    drain_lock: Arc<Mutex<()>>,
}

impl SyncQueue {
    /// Create a queue. The receiver wakes a [`SyncWorker`] on new work.
    pub fn new(
        store: SqliteStore,
        remote: Option<Arc<dyn RemoteStore>>,
        config: SyncConfig,
    ) -> (Self, mpsc::Receiver<()>) {
        let (nudge, nudges) = mpsc::channel(1);
        let queue = Self {
            store,
            remote,
            nudge,
            config,
            drain_lock: Arc::new(Mutex::new(())),
        };
        (queue, nudges)
    }

    async fn enqueue(
        &self,
        op: OutboxOp,
        table: &str,
        entity_id: &str,
        payload: Option<String>,
    ) -> StorageResult<()> {
        let now = Utc::now();
        let record = OutboxRecord {
            id: uuid::Uuid::new_v4().to_string(),
            op: op.as_str().to_string(),
            remote_table: table.to_string(),
            entity_id: entity_id.to_string(),
            payload,
            attempts: 0,
            last_error: None,
            next_attempt_at: now,
            created_at: now,
        };
        self.store.outbox_put(&record).await?;
        debug!(op = op.as_str(), table = %table, entity_id = %entity_id, "Remote operation queued");

        // A full channel already carries a pending wake-up.
        let _ = self.nudge.try_send(());
        Ok(())
    }

    /// Queue an upsert of `item`'s remote row.
    pub async fn enqueue_upsert<E: Entity>(&self, item: &E) -> StorageResult<()> {
        let payload = item.to_row().to_string();
        self.enqueue(OutboxOp::Upsert, E::REMOTE_TABLE, item.id().as_str(), Some(payload))
            .await
    }

    /// Queue deletion of the remote row with `id`.
    pub async fn enqueue_delete<E: Entity>(&self, id: &str) -> StorageResult<()> {
        self.enqueue(OutboxOp::Delete, E::REMOTE_TABLE, id, None).await
    }

    /// Every pending operation, oldest first.
    pub async fn pending(&self) -> StorageResult<Vec<OutboxRecord>> {
        self.store.outbox_all().await
    }

    /// Number of pending operations.
    pub async fn len(&self) -> StorageResult<u64> {
        self.store.outbox_len().await
    }

    /// Whether nothing is pending.
    pub async fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drop every pending operation.
    pub async fn clear(&self) -> StorageResult<()> {
        self.store.outbox_clear().await
    }

    fn backoff(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        Duration::from_millis(self.config.retry_delay_ms.saturating_mul(1u64 << shift))
    }

    async fn deliver(&self, remote: &dyn RemoteStore, record: &OutboxRecord) -> BackendResult<()> {
        match OutboxOp::parse(&record.op) {
            Some(OutboxOp::Upsert) => {
                let raw = record.payload.as_deref().unwrap_or("null");
                let row: serde_json::Value =
                    serde_json::from_str(raw).map_err(|e| BackendError::InvalidResponse {
                        message: format!("Stored payload unreadable: {}", e),
                    })?;
                remote.upsert_row(&record.remote_table, row).await
            }
            Some(OutboxOp::Delete) => remote.delete_row(&record.remote_table, &record.entity_id).await,
            None => Err(BackendError::InvalidResponse {
                message: format!("Unknown outbox operation: {}", record.op),
            }),
        }
    }

    /// Deliver every due operation in FIFO order.
    ///
    /// Without a remote this is a no-op. An unauthenticated failure ends the
    /// pass without consuming an attempt.
    pub async fn drain(&self) -> StorageResult<DrainReport> {
        let mut report = DrainReport::default();
        let Some(remote) = self.remote.as_deref() else {
            return Ok(report);
        };

        let _guard = self.drain_lock.lock().await;
        let due = self.store.outbox_due(Utc::now(), DRAIN_BATCH).await?;
        if due.is_empty() {
            return Ok(report);
        }

        for record in due {
            match self.deliver(remote, &record).await {
                Ok(()) => {
                    self.store.outbox_remove(&record.id).await?;
                    report.delivered += 1;
                }
                Err(e) if e.is_unauthenticated() => {
                    debug!(error = %e, "No usable session, leaving outbox for later");
                    report.deferred = true;
                    break;
                }
                Err(e) if !e.is_transient() => {
                    error!(
                        op = %record.op,
                        table = %record.remote_table,
                        entity_id = %record.entity_id,
                        error = %e,
                        "Remote operation rejected, dropping"
                    );
                    self.store.outbox_remove(&record.id).await?;
                    report.dropped += 1;
                }
                Err(e) => {
                    let attempts = record.attempts + 1;
                    if attempts >= self.config.max_attempts {
                        error!(
                            op = %record.op,
                            table = %record.remote_table,
                            entity_id = %record.entity_id,
                            attempts,
                            error = %e,
                            "Remote operation abandoned after max attempts"
                        );
                        self.store.outbox_remove(&record.id).await?;
                        report.dropped += 1;
                    } else {
                        let delay = self.backoff(attempts);
                        let next_at = Utc::now()
                            + chrono::Duration::from_std(delay).map_err(|e| StorageError::Query {
                                message: format!("Backoff out of range: {}", e),
                            })?;
                        warn!(
                            op = %record.op,
                            table = %record.remote_table,
                            entity_id = %record.entity_id,
                            attempts,
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "Remote operation failed, rescheduling"
                        );
                        self.store
                            .outbox_reschedule(&record.id, attempts, &e.to_string(), next_at)
                            .await?;
                        report.rescheduled += 1;
                    }
                }
            }
        }

        info!(
            delivered = report.delivered,
            rescheduled = report.rescheduled,
            dropped = report.dropped,
            deferred = report.deferred,
            "Outbox drained"
        );
        Ok(report)
    }
}

/// Background task draining a [`SyncQueue`].
pub struct SyncWorker;

impl SyncWorker {
    /// Drain on every nudge and every `interval_ms` until `shutdown` changes
    /// or its sender goes away.
    pub fn spawn(
        queue: SyncQueue,
        mut nudges: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_millis(queue.config.interval_ms.max(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = period.as_millis(), "Sync worker started");

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    nudge = nudges.recv() => {
                        if nudge.is_none() {
                            break;
                        }
                    }
                    _ = interval.tick() => {}
                }

                if let Err(e) = queue.drain().await {
                    error!(error = %e, "Outbox drain failed");
                }
            }

            info!("Sync worker stopped");
        })
    }
}
