//! # Storage Module - Shared Device Access
//!
//! The data directory lives on a storage device that is also used by the
//! local-content rendering subsystem, over a shared bus. Historically that
//! shape caused whole-system deadlocks when one execution context held the
//! storage lock while waiting on the rendering device and another did the
//! reverse. The rule enforced here: every storage critical section is
//! self-contained (open, read/write, close, release) and no caller issues a
//! rendering or network call while the device is held.
//!
//! [`StorageHandle`] is the single owned handle to the device. Components
//! that touch storage receive a clone at construction, so lock discipline is
//! carried by ownership rather than by convention. Acquisition is always
//! bounded: a caller states how long it is willing to wait, and a timeout is
//! a recoverable failure, never a hang.

use anyhow::{anyhow, Result};
use log::warn;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Owned handle to the shared storage device.
///
/// Clones share one underlying lock. The handle itself is cheap to clone and
/// is passed to every component that needs the device.
#[derive(Clone)]
pub struct StorageHandle {
    data_dir: PathBuf,
    device: Arc<Mutex<()>>,
}

/// RAII guard for one storage critical section. Dropping it releases the
/// device.
pub struct StorageGuard {
    _guard: OwnedMutexGuard<()>,
}

impl StorageHandle {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            device: Arc::new(Mutex::new(())),
        }
    }

    /// Directory holding this core's files on the device.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Acquire the device, waiting at most `wait`.
    ///
    /// `op` names the caller for the log line when the wait times out.
    pub async fn acquire(&self, wait: Duration, op: &str) -> Result<StorageGuard> {
        match tokio::time::timeout(wait, self.device.clone().lock_owned()).await {
            Ok(guard) => Ok(StorageGuard { _guard: guard }),
            Err(_) => {
                warn!("storage busy: {op} gave up after {wait:?}");
                Err(anyhow!("storage device busy ({op} waited {wait:?})"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_times_out_while_held() {
        let storage = StorageHandle::new("/tmp/unused");
        let _held = storage
            .acquire(Duration::from_millis(50), "holder")
            .await
            .unwrap();
        let second = storage.acquire(Duration::from_millis(20), "waiter").await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn acquire_succeeds_after_release() {
        let storage = StorageHandle::new("/tmp/unused");
        {
            let _held = storage
                .acquire(Duration::from_millis(50), "holder")
                .await
                .unwrap();
        }
        assert!(storage
            .acquire(Duration::from_millis(20), "waiter")
            .await
            .is_ok());
    }
}
