//! Per-scan delivery decision: send now or queue for later.
//!
//! `deliver` never raises to its caller and never blocks past the
//! configured timeouts. The failure ladder is: direct send, durable queue,
//! counted drop. A drop only happens when the storage device itself cannot
//! be acquired, and it is surfaced through [`DeliveryStats`] rather than an
//! error.

use log::{debug, error, info, warn};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::connection::ConnectionHandle;
use super::OrchestratorClient;
use crate::queue::ScanQueue;
use crate::scan::ScanRequest;

/// What happened to one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The orchestrator has the scan (2xx, or 409 conflict-accepted).
    Delivered,
    /// Durably queued for the background sync task.
    Queued,
    /// Storage was unavailable; the scan is gone and counted.
    Dropped,
}

/// Consecutive storage failures before the degraded flag raises.
const DEGRADED_THRESHOLD: u32 = 3;

/// Running counters for the delivery path, shared with the status display
/// collaborator. All loads/stores are relaxed; these are statistics, not
/// synchronization.
#[derive(Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    conflicts: AtomicU64,
    queued: AtomicU64,
    dropped: AtomicU64,
    consecutive_storage_failures: AtomicU32,
    storage_degraded: AtomicBool,
}

impl DeliveryStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// 409 responses counted as delivered. Tracked separately so the
    /// conflict rate can be audited.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Raised after repeated storage failures; cleared by the next success.
    /// Read by the status display to show degraded mode.
    pub fn storage_degraded(&self) -> bool {
        self.storage_degraded.load(Ordering::Relaxed)
    }

    fn record_storage_ok(&self) {
        self.consecutive_storage_failures.store(0, Ordering::Relaxed);
        if self.storage_degraded.swap(false, Ordering::Relaxed) {
            info!("storage recovered, leaving degraded mode");
        }
    }

    fn record_storage_failure(&self) {
        let failures = self
            .consecutive_storage_failures
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        if failures >= DEGRADED_THRESHOLD && !self.storage_degraded.swap(true, Ordering::Relaxed) {
            error!("storage unavailable {failures} times in a row, entering degraded mode");
        }
    }
}

/// The deliver-or-queue decision component.
pub struct ScanDelivery {
    client: Arc<OrchestratorClient>,
    queue: Arc<ScanQueue>,
    connection: ConnectionHandle,
    stats: Arc<DeliveryStats>,
    /// Foreground bounded wait for the storage device.
    append_wait: Duration,
}

impl ScanDelivery {
    pub fn new(
        client: Arc<OrchestratorClient>,
        queue: Arc<ScanQueue>,
        connection: ConnectionHandle,
        append_wait: Duration,
    ) -> Self {
        Self {
            client,
            queue,
            connection,
            stats: Arc::new(DeliveryStats::default()),
            append_wait,
        }
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }

    /// Deliver one scan: direct send while `Reachable`, otherwise queue.
    ///
    /// A 409 means the orchestrator already holds a conflicting operation
    /// for this token; it has the data and only the scheduling was refused,
    /// so it counts as delivered (kept for wire compatibility).
    pub async fn deliver(&self, scan: ScanRequest) -> DeliveryOutcome {
        if self.connection.is_reachable() {
            match self.client.send_scan(&scan).await {
                Ok(status) if status.is_success() => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!("scan {} sent directly", scan.token_id);
                    return DeliveryOutcome::Delivered;
                }
                Ok(status) if status == StatusCode::CONFLICT => {
                    self.stats.conflicts.fetch_add(1, Ordering::Relaxed);
                    info!("scan {} accepted as conflict (409)", scan.token_id);
                    return DeliveryOutcome::Delivered;
                }
                Ok(status) => {
                    warn!(
                        "orchestrator rejected scan {} with HTTP {status}, queueing",
                        scan.token_id
                    );
                }
                Err(e) => {
                    warn!("direct send of scan {} failed ({e:#}), queueing", scan.token_id);
                }
            }
        }
        self.enqueue(scan).await
    }

    async fn enqueue(&self, scan: ScanRequest) -> DeliveryOutcome {
        match self.queue.append(&scan, self.append_wait).await {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                self.stats.record_storage_ok();
                DeliveryOutcome::Queued
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                self.stats.record_storage_failure();
                error!("scan {} dropped, queue unavailable: {e:#}", scan.token_id);
                DeliveryOutcome::Dropped
            }
        }
    }
}
