//! # Persistent Queue Module
//!
//! Durable, bounded, FIFO log of undelivered scans, one JSON object per
//! line in `queue.jsonl` on the shared storage device.
//!
//! ## Guarantees
//!
//! - **Ordering**: entries are totally ordered by insertion and are never
//!   reordered. [`ScanQueue::commit`] only ever removes a prefix, matching
//!   the batch previously read by [`ScanQueue::peek_batch`].
//! - **Bounded capacity**: appending to a full queue evicts the single
//!   oldest entry first. Eviction and append happen inside one critical
//!   section, so no concurrent reader observes the queue over capacity.
//!   Overflow is policy, not an error: under prolonged disconnection the
//!   oldest scans are the ones sacrificed.
//! - **Corruption tolerance**: a line that fails to parse is skipped and
//!   eventually discarded, never fatal to the drain.
//! - **Bounded waits**: every operation acquires the storage device through
//!   [`StorageHandle::acquire`] with a caller-supplied wait; a timeout is an
//!   error the caller handles by skipping the operation this cycle.
//!
//! The in-memory length cache tracks parseable entries only and is kept
//! exact on every append/commit, so [`ScanQueue::count`] never scans the
//! file and never blocks.

use anyhow::{Context, Result};
use fs2::FileExt;
use log::{debug, info, warn};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::QueueConfig;
use crate::logutil::preview;
use crate::scan::ScanRequest;
use crate::storage::StorageHandle;

/// Queue file name inside the data directory.
pub const QUEUE_FILE: &str = "queue.jsonl";
const QUEUE_TEMP_FILE: &str = "queue.jsonl.tmp";

/// Durable bounded FIFO of [`ScanRequest`]s.
pub struct ScanQueue {
    storage: StorageHandle,
    path: PathBuf,
    tmp_path: PathBuf,
    capacity: usize,
    max_file_bytes: u64,
    len: AtomicUsize,
    evicted: AtomicU64,
    corrupt_dropped: AtomicU64,
}

#[derive(Debug, Default)]
struct PrefixRemoval {
    parsed_removed: usize,
    corrupt_removed: usize,
    remaining: usize,
}

impl ScanQueue {
    pub fn new(storage: StorageHandle, config: &QueueConfig) -> Self {
        let path = storage.data_dir().join(QUEUE_FILE);
        let tmp_path = storage.data_dir().join(QUEUE_TEMP_FILE);
        Self {
            storage,
            path,
            tmp_path,
            capacity: config.capacity,
            max_file_bytes: config.max_file_bytes,
            len: AtomicUsize::new(0),
            evicted: AtomicU64::new(0),
            corrupt_dropped: AtomicU64::new(0),
        }
    }

    /// Number of pending (parseable) entries. Non-blocking; reads the cache
    /// maintained by `append`/`commit`/`recover`.
    pub fn count(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Entries evicted by the overflow policy since startup.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Corrupt lines discarded since startup.
    pub fn corrupt_dropped(&self) -> u64 {
        self.corrupt_dropped.load(Ordering::Relaxed)
    }

    /// Validate the queue file at boot and rebuild the length cache.
    ///
    /// A file larger than the configured threshold is the signature of
    /// power-loss corruption (interrupted writes growing the file without
    /// bound); it is deleted and the queue starts empty.
    pub async fn recover(&self, wait: Duration) -> Result<usize> {
        let _guard = self.storage.acquire(wait, "queue recover").await?;

        let meta = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.len.store(0, Ordering::Release);
                debug!("no queue file, starting fresh");
                return Ok(0);
            }
            Err(e) => return Err(e).context("stat queue file"),
        };

        if meta.len() > self.max_file_bytes {
            warn!(
                "queue file is {} bytes (threshold {}), discarding as corrupt",
                meta.len(),
                self.max_file_bytes
            );
            std::fs::remove_file(&self.path).context("remove corrupt queue file")?;
            self.len.store(0, Ordering::Release);
            return Ok(0);
        }

        let content = std::fs::read_to_string(&self.path).context("read queue file")?;
        let mut count = 0usize;
        let mut corrupt = 0usize;
        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if serde_json::from_str::<ScanRequest>(line).is_ok() {
                count += 1;
            } else {
                corrupt += 1;
                debug!("unreadable queue line: {}", preview(line));
            }
        }
        if corrupt > 0 {
            warn!("queue holds {corrupt} unreadable lines; they will be dropped as the queue drains");
        }
        self.len.store(count, Ordering::Release);
        info!("queue recovered: {count} pending scans");
        Ok(count)
    }

    /// Append one scan, evicting the oldest entry first if the queue is at
    /// capacity. Both steps run under one storage critical section.
    pub async fn append(&self, scan: &ScanRequest, wait: Duration) -> Result<()> {
        let line = serde_json::to_string(scan).context("serialize queue entry")?;
        let _guard = self.storage.acquire(wait, "queue append").await?;

        let mut len_after_evict = None;
        if self.len.load(Ordering::Acquire) >= self.capacity {
            let removal = self.remove_prefix_locked(1)?;
            self.evicted
                .fetch_add(removal.parsed_removed as u64, Ordering::Relaxed);
            if removal.corrupt_removed > 0 {
                self.corrupt_dropped
                    .fetch_add(removal.corrupt_removed as u64, Ordering::Relaxed);
            }
            warn!(
                "queue full ({} entries), evicted oldest scan",
                self.capacity
            );
            len_after_evict = Some(removal.remaining);
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {} for append", self.path.display()))?;
        // Synchronous I/O here: fs2 locks don't support async, and the write
        // is a bounded handful of bytes.
        file.lock_exclusive().context("lock queue file")?;
        writeln!(file, "{line}").context("append queue entry")?;
        file.sync_data().context("flush queue entry")?;

        match len_after_evict {
            Some(n) => self.len.store(n + 1, Ordering::Release),
            None => {
                self.len.fetch_add(1, Ordering::AcqRel);
            }
        }
        debug!("queued scan {} ({} pending)", scan.token_id, self.count());
        Ok(())
    }

    /// Read up to `max` oldest entries without removing them. Corrupt lines
    /// are skipped, not counted against `max`, and left for `commit` to
    /// discard.
    pub async fn peek_batch(&self, max: usize, wait: Duration) -> Result<Vec<ScanRequest>> {
        let _guard = self.storage.acquire(wait, "queue peek").await?;

        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("read queue file"),
        };

        let mut batch = Vec::new();
        for raw in content.lines() {
            if batch.len() >= max {
                break;
            }
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ScanRequest>(line) {
                Ok(scan) => batch.push(scan),
                Err(e) => debug!("skipping corrupt queue line: {} ({e})", preview(line)),
            }
        }
        Ok(batch)
    }

    /// Remove the first `n` entries, exactly the prefix a prior
    /// `peek_batch(n)` returned. Called only after the orchestrator has
    /// acknowledged that batch. Corrupt lines ahead of the committed prefix
    /// are discarded with it; they were invisible to `peek_batch` and can
    /// never be sent.
    pub async fn commit(&self, n: usize, wait: Duration) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let _guard = self.storage.acquire(wait, "queue commit").await?;
        let removal = self.remove_prefix_locked(n)?;
        if removal.parsed_removed < n {
            warn!(
                "commit({n}) found only {} entries on disk",
                removal.parsed_removed
            );
        }
        if removal.corrupt_removed > 0 {
            self.corrupt_dropped
                .fetch_add(removal.corrupt_removed as u64, Ordering::Relaxed);
            info!(
                "dropped {} corrupt queue lines during commit",
                removal.corrupt_removed
            );
        }
        self.len.store(removal.remaining, Ordering::Release);
        Ok(())
    }

    /// Delete the queue file entirely (manual operator control).
    pub async fn clear(&self, wait: Duration) -> Result<()> {
        let _guard = self.storage.acquire(wait, "queue clear").await?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("remove queue file"),
        }
        self.len.store(0, Ordering::Release);
        info!("queue cleared");
        Ok(())
    }

    /// Rewrite the queue file without its first `n` parseable entries.
    /// Must be called with the storage guard held.
    fn remove_prefix_locked(&self, n: usize) -> Result<PrefixRemoval> {
        let mut src = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PrefixRemoval::default()),
            Err(e) => return Err(e).context("open queue file"),
        };
        src.lock_exclusive().context("lock queue file")?;
        let mut content = String::new();
        src.read_to_string(&mut content).context("read queue file")?;

        let mut out = String::with_capacity(content.len());
        let mut removal = PrefixRemoval::default();
        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let parses = serde_json::from_str::<ScanRequest>(line).is_ok();
            if removal.parsed_removed < n {
                if parses {
                    removal.parsed_removed += 1;
                } else {
                    removal.corrupt_removed += 1;
                    debug!("discarding corrupt queue line: {}", preview(line));
                }
                continue;
            }
            out.push_str(line);
            out.push('\n');
            if parses {
                removal.remaining += 1;
            }
        }

        // Rewrite through a temp file and rename so a power cut mid-rewrite
        // leaves either the old queue or the new one, never a truncation.
        let mut tmp = std::fs::File::create(&self.tmp_path).context("create queue temp file")?;
        tmp.write_all(out.as_bytes())
            .context("write queue temp file")?;
        tmp.sync_data().context("flush queue temp file")?;
        drop(tmp);
        std::fs::rename(&self.tmp_path, &self.path).context("replace queue file")?;
        drop(src);
        Ok(removal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;

    const WAIT: Duration = Duration::from_millis(500);

    fn scan(token: &str) -> ScanRequest {
        ScanRequest {
            token_id: token.to_string(),
            team_id: Some("001".to_string()),
            device_id: "SCANNER_TEST".to_string(),
            timestamp: "2025-10-19T14:30:00.000Z".to_string(),
        }
    }

    fn queue_in(dir: &std::path::Path, capacity: usize) -> ScanQueue {
        let storage = StorageHandle::new(dir);
        let config = QueueConfig {
            capacity,
            ..QueueConfig::default()
        };
        ScanQueue::new(storage, &config)
    }

    #[tokio::test]
    async fn append_peek_commit_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = queue_in(tmp.path(), 10);

        for t in ["t1", "t2", "t3"] {
            queue.append(&scan(t), WAIT).await.unwrap();
        }
        assert_eq!(queue.count(), 3);

        let batch = queue.peek_batch(2, WAIT).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].token_id, "t1");
        assert_eq!(batch[1].token_id, "t2");
        // Peek leaves the queue untouched.
        assert_eq!(queue.count(), 3);

        queue.commit(2, WAIT).await.unwrap();
        assert_eq!(queue.count(), 1);
        let rest = queue.peek_batch(10, WAIT).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].token_id, "t3");
    }

    #[tokio::test]
    async fn overflow_evicts_oldest() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = queue_in(tmp.path(), 3);

        for t in ["t1", "t2", "t3", "t4"] {
            queue.append(&scan(t), WAIT).await.unwrap();
        }
        assert_eq!(queue.count(), 3);
        assert_eq!(queue.evicted(), 1);

        let all = queue.peek_batch(10, WAIT).await.unwrap();
        let tokens: Vec<_> = all.iter().map(|s| s.token_id.as_str()).collect();
        assert_eq!(tokens, ["t2", "t3", "t4"]);
    }

    #[tokio::test]
    async fn recover_counts_entries_and_survives_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = queue_in(tmp.path(), 10);
        for t in ["t1", "t2"] {
            queue.append(&scan(t), WAIT).await.unwrap();
        }

        // Fresh instance over the same directory, as after a reboot.
        let reopened = queue_in(tmp.path(), 10);
        assert_eq!(reopened.recover(WAIT).await.unwrap(), 2);
        assert_eq!(reopened.count(), 2);
    }

    #[tokio::test]
    async fn oversized_file_is_discarded_on_recover() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = StorageHandle::new(tmp.path());
        let config = QueueConfig {
            capacity: 10,
            max_file_bytes: 64,
            ..QueueConfig::default()
        };
        let queue = ScanQueue::new(storage, &config);

        std::fs::write(tmp.path().join(QUEUE_FILE), "x".repeat(1000)).unwrap();
        assert_eq!(queue.recover(WAIT).await.unwrap(), 0);
        assert!(!tmp.path().join(QUEUE_FILE).exists());
    }

    #[tokio::test]
    async fn commit_discards_corrupt_prefix_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = queue_in(tmp.path(), 10);
        queue.append(&scan("t1"), WAIT).await.unwrap();

        // Corrupt line lands between t1 and t2 on disk.
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(tmp.path().join(QUEUE_FILE))
                .unwrap();
            writeln!(f, "{{not json").unwrap();
        }
        queue.append(&scan("t2"), WAIT).await.unwrap();

        let batch = queue.peek_batch(10, WAIT).await.unwrap();
        assert_eq!(batch.len(), 2);

        queue.commit(2, WAIT).await.unwrap();
        assert_eq!(queue.count(), 0);
        assert_eq!(queue.corrupt_dropped(), 1);
        assert!(queue.peek_batch(10, WAIT).await.unwrap().is_empty());
    }
}
