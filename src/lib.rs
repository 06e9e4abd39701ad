//! # scanpost - Offline-First Scan Delivery
//!
//! scanpost is the synchronization engine for a token-scanning field
//! terminal: every scan is either delivered to the remote orchestrator
//! immediately or queued durably and drained later, without ever losing,
//! duplicating, or blocking on a scan, while the local feedback path keeps
//! working regardless of network state.
//!
//! ## Features
//!
//! - **Offline-first delivery**: reachable ⇒ direct send; anything else ⇒
//!   durable queue. Network failure is a routine outcome, never an error.
//! - **Bounded durable queue**: FIFO JSONL log on the shared storage
//!   device, capped at a fixed capacity with oldest-entry eviction.
//! - **Background draining**: an independent task probes reachability and
//!   uploads the backlog in bounded, acknowledged batches.
//! - **Torn-read-free connection state**: one atomic value, readable from
//!   both execution contexts without touching the storage lock.
//! - **Bounded waits everywhere**: every lock acquisition and every network
//!   call carries a timeout; a timeout degrades, it never escalates.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanpost::config::Config;
//! use scanpost::storage::StorageHandle;
//! use scanpost::queue::ScanQueue;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let storage = StorageHandle::new(&config.queue.data_dir);
//!     let queue = ScanQueue::new(storage, &config.queue);
//!     queue.recover(config.queue.background_lock_wait()).await?;
//!     println!("{} scans pending", queue.count());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`scan`] - scan events and the foreground handling loop
//! - [`queue`] - persistent bounded FIFO queue
//! - [`orchestrator`] - HTTP client, connection tracking, delivery, sync
//! - [`storage`] - shared storage-device handle and lock discipline
//! - [`config`] - configuration management and validation
//! - [`validation`] - scan field validation
//!
//! ## Architecture
//!
//! ```text
//!  scan source ──▶ bounded channel ──▶ Scan Delivery ──▶ orchestrator
//!                                          │   ▲              ▲
//!                                     queue│   │state         │batches
//!                                          ▼   │              │
//!                                   Persistent Queue ◀── Background Sync
//! ```
//!
//! Two execution contexts run indefinitely: the foreground scan path and
//! the background sync task. The queue's storage critical sections are
//! their only synchronization point; the connection state is shared through
//! its own atomic and is readable even while a queue operation is in
//! flight.

pub mod config;
pub mod logutil;
pub mod orchestrator;
pub mod queue;
pub mod scan;
pub mod storage;
pub mod validation;
