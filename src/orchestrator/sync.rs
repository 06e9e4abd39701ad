//! Background synchronization task.
//!
//! An independently scheduled loop: probe reachability on a fixed interval
//! and, when the orchestrator answers and the queue is non-empty, drain the
//! backlog in bounded batches. A successful batch is committed and the next
//! one follows after a short spacing, so a large backlog drains faster than
//! the probe cadence; a failed batch is left untouched for the next cycle.
//!
//! The task shares the storage device with the foreground path and honors
//! the same rule: storage critical sections are self-contained, and no
//! storage lock is held across a network call (`peek_batch` releases the
//! device before the upload starts).

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use super::connection::{probe_remote, ConnectionHandle, ConnectionState};
use super::OrchestratorClient;
use crate::config::Config;
use crate::queue::ScanQueue;

pub struct SyncTask {
    client: Arc<OrchestratorClient>,
    queue: Arc<ScanQueue>,
    connection: ConnectionHandle,
    probe_interval: Duration,
    batch_size: usize,
    drain_delay: Duration,
    /// Background bounded wait for the storage device.
    lock_wait: Duration,
}

impl SyncTask {
    pub fn new(
        client: Arc<OrchestratorClient>,
        queue: Arc<ScanQueue>,
        connection: ConnectionHandle,
        config: &Config,
    ) -> Self {
        Self {
            client,
            queue,
            connection,
            probe_interval: config.orchestrator.probe_interval(),
            batch_size: config.queue.batch_size,
            drain_delay: config.queue.drain_delay(),
            lock_wait: config.queue.background_lock_wait(),
        }
    }

    /// Run forever. Spawned once at startup, next to the foreground path.
    pub async fn run(self) {
        info!(
            "background sync task started (probe every {:?}, batches of {})",
            self.probe_interval, self.batch_size
        );
        let mut probe = tokio::time::interval(self.probe_interval);
        probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            probe.tick().await;

            if !self.connection.link_up() {
                continue;
            }
            if probe_remote(&self.connection, &self.client).await != ConnectionState::Reachable {
                continue;
            }
            if self.queue.count() == 0 {
                continue;
            }
            self.drain().await;
        }
    }

    /// Drain the queue in bounded batches until it is empty or an upload
    /// fails. Only acknowledged batches are removed.
    async fn drain(&self) {
        loop {
            let batch = match self.queue.peek_batch(self.batch_size, self.lock_wait).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("sync: queue busy, retrying next cycle: {e:#}");
                    return;
                }
            };
            if batch.is_empty() {
                return;
            }

            debug!("sync: uploading batch of {}", batch.len());
            match self.client.send_batch(&batch).await {
                Ok(status) if status.is_success() => {
                    if let Err(e) = self.queue.commit(batch.len(), self.lock_wait).await {
                        // The orchestrator has the batch but it is still on
                        // disk; at-least-once delivery means re-sending it
                        // next cycle is safe.
                        warn!("sync: commit failed after acknowledged batch: {e:#}");
                        return;
                    }
                    info!(
                        "sync: uploaded {} queued scans, {} remaining",
                        batch.len(),
                        self.queue.count()
                    );
                    if self.queue.count() == 0 {
                        return;
                    }
                    tokio::time::sleep(self.drain_delay).await;
                }
                Ok(status) => {
                    warn!("sync: batch upload rejected with HTTP {status}, will retry");
                    return;
                }
                Err(e) => {
                    warn!("sync: batch upload failed ({e:#}), will retry");
                    return;
                }
            }
        }
    }
}
