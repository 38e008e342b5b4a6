//! The sync orchestrator.
//!
//! A run moves `Idle → Probing → (Offline | Draining) → Idle`; draining
//! loops `BatchSend → Applying` once per batch. Each submission yields an
//! immutable [`BatchOutcome`] that the applying step consumes. Runs are
//! serialized by an internal lock, so concurrent callers queue up rather
//! than racing on the same items.
//!
//! Only storage errors abort a run. Unreachability, transport failures and
//! item rejections are folded into the returned [`SyncResult`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tasksync_proto::batch::{BatchItem, BatchRequest, BatchResponse, ItemStatus, ProcessedItem};
use tasksync_proto::mutation::OperationKind;
use tasksync_proto::task::TaskSnapshot;
use tokio::sync::{Mutex, watch};

use super::resolve::{Winner, resolve_conflict};
use super::{SyncError, SyncFailure, SyncPhase, SyncResult, SyncSettings, SyncStatusReport};
use crate::store::{FailureOutcome, MutationQueue, QueueItem, RemoteAck, TaskStore};
use crate::transport::{BatchTransport, TransportError};

/// What came back from submitting one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The submission failed as a whole; no item was confirmed.
    TransportFailed {
        /// Why the submission failed.
        error: String,
    },
    /// The remote answered with per-item verdicts.
    Responded(BatchResponse),
}

/// Running totals for one run.
#[derive(Debug, Default)]
struct Tally {
    synced: usize,
    failed: usize,
    errors: Vec<SyncFailure>,
}

impl Tally {
    fn record_failure(&mut self, item: &QueueItem, error: &str) {
        self.failed += 1;
        self.errors.push(SyncFailure {
            task_id: Some(item.task_id),
            operation: Some(item.operation()),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn into_result(self) -> SyncResult {
        SyncResult {
            success: self.failed == 0,
            synced: self.synced,
            failed: self.failed,
            errors: self.errors,
        }
    }
}

/// Drains a [`MutationQueue`] to a remote through a [`BatchTransport`].
pub struct SyncEngine<Q: MutationQueue, S: TaskStore, T: BatchTransport> {
    /// Pending mutations.
    queue: Arc<Q>,
    /// Local task state, read for conflicts and stamped after runs.
    store: Arc<S>,
    /// Path to the remote.
    transport: T,
    /// Batch size, retry limit and timeouts.
    settings: SyncSettings,
    /// Held for the duration of a run.
    run_lock: Mutex<()>,
    /// Current phase, observable through [`subscribe`](Self::subscribe).
    phase: watch::Sender<SyncPhase>,
}

impl<Q: MutationQueue, S: TaskStore, T: BatchTransport> SyncEngine<Q, S, T> {
    /// Create an engine. Zero batch size or retry limit is raised to 1.
    pub fn new(queue: Arc<Q>, store: Arc<S>, transport: T, settings: SyncSettings) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            queue,
            store,
            transport,
            settings: settings.clamped(),
            run_lock: Mutex::new(()),
            phase,
        }
    }

    /// The effective settings.
    #[must_use]
    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// The transport this engine submits through.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Watch the engine's phase.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Pending queue size, last sync time and current phase.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the store cannot be read.
    pub async fn status(&self) -> Result<SyncStatusReport, SyncError> {
        Ok(SyncStatusReport {
            pending: self.queue.pending_count().await?,
            last_sync_at: self.store.last_sync_at().await?,
            phase: *self.phase.borrow(),
        })
    }

    /// Run one sync pass.
    ///
    /// Waits for any run already in progress to finish first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if local storage fails; the run stops at
    /// that point. Every other failure is reported in the [`SyncResult`].
    pub async fn sync(&self) -> Result<SyncResult, SyncError> {
        let _run = self.run_lock.lock().await;
        let result = self.run().await;
        self.phase.send_replace(SyncPhase::Idle);
        result
    }

    /// Sync on every tick of `interval` until `shutdown` completes.
    ///
    /// The first run starts immediately. `on_result` sees each finished run,
    /// including offline ones, which are retried on the next tick.
    ///
    /// # Errors
    ///
    /// Stops at the first [`SyncError`].
    pub async fn run_periodic<F>(
        &self,
        interval: Duration,
        shutdown: impl Future<Output = ()>,
        mut on_result: F,
    ) -> Result<(), SyncError>
    where
        F: FnMut(&SyncResult),
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("periodic sync stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let result = self.sync().await?;
                    on_result(&result);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Run phases
    // -----------------------------------------------------------------------

    async fn run(&self) -> Result<SyncResult, SyncError> {
        self.phase.send_replace(SyncPhase::Probing);
        if let Err(e) = self.probe().await {
            self.phase.send_replace(SyncPhase::Offline);
            tracing::warn!(error = %e, "remote unreachable, queue left untouched");
            return Ok(SyncResult::unreachable(&e.to_string()));
        }

        self.phase.send_replace(SyncPhase::Draining);
        let mut tally = Tally::default();
        for item in self.queue.purge_exhausted(self.settings.max_retries).await? {
            let error = item.last_error.as_deref().unwrap_or("retry limit reached");
            tracing::warn!(
                task_id = %item.task_id,
                operation = %item.operation(),
                retry_count = item.retry_count,
                max_retries = self.settings.max_retries,
                "queued item already over the retry limit, task marked as error"
            );
            tally.record_failure(&item, error);
        }

        let items = self.queue.pending_items(self.settings.max_retries).await?;
        if items.is_empty() {
            tracing::debug!("nothing to sync");
            self.store.record_sync_time(Utc::now()).await?;
            return Ok(tally.into_result());
        }

        let batch_count = items.len().div_ceil(self.settings.batch_size);
        tracing::info!(items = items.len(), batches = batch_count, "sync started");

        for (index, batch) in items.chunks(self.settings.batch_size).enumerate() {
            let number = index + 1;
            self.phase.send_replace(SyncPhase::BatchSend { batch: number });
            let outcome = self.send_batch(batch).await;

            self.phase.send_replace(SyncPhase::Applying { batch: number });
            self.apply_outcome(batch, outcome, &mut tally).await?;
        }

        self.store.record_sync_time(Utc::now()).await?;
        let result = tally.into_result();
        tracing::info!(
            synced = result.synced,
            failed = result.failed,
            "sync finished"
        );
        Ok(result)
    }

    async fn probe(&self) -> Result<(), TransportError> {
        tokio::time::timeout(self.settings.probe_timeout, self.transport.health_check())
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn send_batch(&self, batch: &[QueueItem]) -> BatchOutcome {
        let request = BatchRequest {
            items: batch
                .iter()
                .map(|item| BatchItem::from_payload(item.payload.clone()))
                .collect(),
            client_timestamp: Utc::now(),
        };

        let submitted =
            tokio::time::timeout(self.settings.batch_timeout, self.transport.submit_batch(&request))
                .await
                .map_err(|_| TransportError::Timeout)
                .and_then(|r| r);

        match submitted {
            Ok(response) => BatchOutcome::Responded(response),
            Err(e) => BatchOutcome::TransportFailed {
                error: e.to_string(),
            },
        }
    }

    async fn apply_outcome(
        &self,
        batch: &[QueueItem],
        outcome: BatchOutcome,
        tally: &mut Tally,
    ) -> Result<(), SyncError> {
        match outcome {
            BatchOutcome::TransportFailed { error } => {
                tracing::warn!(items = batch.len(), error = %error, "batch submission failed");
                let message = format!("batch submission failed: {error}");
                for item in batch {
                    self.fail_item(item, &message, tally).await?;
                }
            }
            BatchOutcome::Responded(response) => {
                let verdicts = pair_verdicts(batch, &response.processed_items);
                for (item, verdict) in batch.iter().zip(verdicts) {
                    match verdict {
                        Some(verdict) => self.apply_verdict(item, verdict, tally).await?,
                        None => self.fail_item(item, "no verdict returned", tally).await?,
                    }
                }
            }
        }
        Ok(())
    }

    async fn apply_verdict(
        &self,
        item: &QueueItem,
        verdict: &ProcessedItem,
        tally: &mut Tally,
    ) -> Result<(), SyncError> {
        let local = self
            .store
            .get_task(&item.task_id)
            .await?
            .map(|task| task.snapshot());

        let apply = match verdict.status {
            ItemStatus::Success => newer_server_version(local.as_ref(), verdict.resolved_data.as_ref()),
            ItemStatus::Conflict => {
                let (Some(local), Some(server)) = (local.as_ref(), verdict.resolved_data.as_ref())
                else {
                    let reason = if local.is_none() {
                        "conflict for a task missing locally"
                    } else {
                        "conflict reported without a server version"
                    };
                    return self.fail_item(item, reason, tally).await;
                };
                let resolution = resolve_conflict(local, server);
                match resolution.winner {
                    Winner::Server => Some(resolution.task),
                    Winner::Local => None,
                }
            }
            ItemStatus::Error => {
                let reason = verdict.error.as_deref().unwrap_or("rejected by remote");
                return self.fail_item(item, reason, tally).await;
            }
        };

        let ack = RemoteAck {
            server_id: verdict.server_id.clone(),
            apply,
            synced_at: Utc::now(),
        };
        self.queue.confirm(item, &ack).await?;
        if item.operation() == OperationKind::Delete {
            let dropped = self.queue.remove_all_for_task(&item.task_id).await?;
            if dropped > 0 {
                tracing::debug!(task_id = %item.task_id, dropped, "queue cleared after delete");
            }
        }

        tracing::debug!(
            task_id = %item.task_id,
            operation = %item.operation(),
            status = %verdict.status,
            "item confirmed"
        );
        tally.synced += 1;
        Ok(())
    }

    async fn fail_item(
        &self,
        item: &QueueItem,
        error: &str,
        tally: &mut Tally,
    ) -> Result<(), SyncError> {
        let outcome = self
            .queue
            .record_failure(item, error, self.settings.max_retries)
            .await?;
        match outcome {
            FailureOutcome::Retrying { retry_count } => tracing::warn!(
                task_id = %item.task_id,
                operation = %item.operation(),
                retry_count,
                error,
                "sync item failed, will retry"
            ),
            FailureOutcome::Exhausted => tracing::warn!(
                task_id = %item.task_id,
                operation = %item.operation(),
                max_retries = self.settings.max_retries,
                error,
                "sync item exhausted its retries, task marked as error"
            ),
            FailureOutcome::Gone => tracing::debug!(
                task_id = %item.task_id,
                "failed item was already removed from the queue"
            ),
        }

        tally.record_failure(item, error);
        Ok(())
    }
}

/// Matches each submitted item with its verdict.
///
/// A verdict at the item's own position is taken when its client id
/// matches; otherwise the first unclaimed verdict for the same task is used.
fn pair_verdicts<'a>(
    batch: &[QueueItem],
    verdicts: &'a [ProcessedItem],
) -> Vec<Option<&'a ProcessedItem>> {
    let mut claimed = vec![false; verdicts.len()];
    batch
        .iter()
        .enumerate()
        .map(|(position, item)| {
            let index = verdicts
                .get(position)
                .filter(|v| v.client_id == item.task_id && !claimed[position])
                .map(|_| position)
                .or_else(|| {
                    verdicts
                        .iter()
                        .enumerate()
                        .position(|(i, v)| !claimed[i] && v.client_id == item.task_id)
                })?;
            claimed[index] = true;
            verdicts.get(index)
        })
        .collect()
}

/// Server data from a success verdict, if it should overwrite the local copy.
///
/// A local edit made after the item was queued is newer than the echoed
/// version and must survive.
fn newer_server_version(
    local: Option<&TaskSnapshot>,
    server: Option<&TaskSnapshot>,
) -> Option<TaskSnapshot> {
    let server = server?;
    match local {
        Some(local) if local.updated_at > server.updated_at => None,
        _ => Some(server.clone()),
    }
}
