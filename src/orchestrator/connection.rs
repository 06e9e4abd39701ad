//! Connection state machine and monitor.
//!
//! Three coarse states, always traversed in order on the way up:
//!
//! ```text
//! Disconnected ──link up──▶ NetworkUp ──probe ok──▶ Reachable
//!      ▲                        ▲│
//!      └──────link down─────────┘└──probe failed / timed out
//! ```
//!
//! `NetworkUp` is never skipped: link association says nothing about the
//! orchestrator, and reachability is only ever earned by a health probe.
//! Link loss is event-driven (the platform layer owns the interface);
//! reachability is polled.
//!
//! The state lives in a single [`AtomicU8`] so readers on the foreground
//! and background paths get a non-blocking, never-torn value without going
//! anywhere near the storage lock.

use log::{debug, info};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::OrchestratorClient;

/// Coarse connection state, ordered by connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    /// No local network link.
    Disconnected = 0,
    /// Local link present, orchestrator reachability unknown or stale.
    NetworkUp = 1,
    /// Local link present and the last health probe succeeded.
    Reachable = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => ConnectionState::Reachable,
            1 => ConnectionState::NetworkUp,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::NetworkUp => "network up",
            ConnectionState::Reachable => "reachable",
        };
        f.write_str(s)
    }
}

/// Shared, lock-free view of the connection state.
#[derive(Clone)]
pub struct ConnectionHandle {
    state: Arc<AtomicU8>,
}

impl ConnectionHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)),
        }
    }

    /// Last known state. Non-blocking.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Local link present (NetworkUp or Reachable).
    pub fn link_up(&self) -> bool {
        self.state() >= ConnectionState::NetworkUp
    }

    pub fn is_reachable(&self) -> bool {
        self.state() == ConnectionState::Reachable
    }

    fn set(&self, next: ConnectionState) {
        let prev = ConnectionState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if prev != next {
            info!("connection: {prev} -> {next}");
        }
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Link events produced by the platform layer that owns the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Up,
    Down,
}

/// Requests sent back to the platform layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    Reconnect,
}

/// Tracks the local link and periodically nudges the platform layer to
/// reassociate while disconnected. Remote reachability is handled
/// separately by [`probe_remote`], driven on the sync task's schedule.
pub struct ConnectionMonitor {
    handle: ConnectionHandle,
    events: mpsc::Receiver<LinkEvent>,
    link_cmd: mpsc::Sender<LinkCommand>,
    reconnect_interval: Duration,
}

impl ConnectionMonitor {
    pub fn new(
        handle: ConnectionHandle,
        events: mpsc::Receiver<LinkEvent>,
        link_cmd: mpsc::Sender<LinkCommand>,
        reconnect_interval: Duration,
    ) -> Self {
        Self {
            handle,
            events,
            link_cmd,
            reconnect_interval,
        }
    }

    /// Run until the event channel closes.
    pub async fn run(mut self) {
        let mut retry = tokio::time::interval(self.reconnect_interval);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a freshly started
        // monitor doesn't request a reconnect before the link had a chance
        // to come up on its own.
        retry.tick().await;

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(LinkEvent::Up) => {
                        // Association alone never implies the remote is up.
                        if self.handle.state() == ConnectionState::Disconnected {
                            self.handle.set(ConnectionState::NetworkUp);
                        }
                    }
                    Some(LinkEvent::Down) => {
                        self.handle.set(ConnectionState::Disconnected);
                    }
                    None => {
                        debug!("link event channel closed, monitor exiting");
                        break;
                    }
                },
                _ = retry.tick() => {
                    if self.handle.state() == ConnectionState::Disconnected {
                        if let Err(e) = self.link_cmd.try_send(LinkCommand::Reconnect) {
                            debug!("reconnect request not sent: {e}");
                        }
                    }
                }
            }
        }
    }
}

/// Run one health probe and fold the result into the state machine.
///
/// Never promotes out of `Disconnected`: while the link is down there is
/// nothing to probe, and only the link owner can change that.
pub async fn probe_remote(
    handle: &ConnectionHandle,
    client: &OrchestratorClient,
) -> ConnectionState {
    match handle.state() {
        ConnectionState::Disconnected => ConnectionState::Disconnected,
        ConnectionState::NetworkUp | ConnectionState::Reachable => {
            if client.check_health().await {
                handle.set(ConnectionState::Reachable);
                ConnectionState::Reachable
            } else {
                handle.set(ConnectionState::NetworkUp);
                ConnectionState::NetworkUp
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_up_never_skips_network_up() {
        let handle = ConnectionHandle::new();
        let (event_tx, event_rx) = mpsc::channel(4);
        let (cmd_tx, _cmd_rx) = mpsc::channel(4);
        let monitor = ConnectionMonitor::new(
            handle.clone(),
            event_rx,
            cmd_tx,
            Duration::from_secs(30),
        );
        let task = tokio::spawn(monitor.run());

        event_tx.send(LinkEvent::Up).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Straight from Disconnected the most we can be is NetworkUp;
        // Reachable requires a successful probe.
        assert_eq!(handle.state(), ConnectionState::NetworkUp);

        event_tx.send(LinkEvent::Down).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), ConnectionState::Disconnected);

        drop(event_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_requested_while_disconnected() {
        let handle = ConnectionHandle::new();
        let (_event_tx, event_rx) = mpsc::channel(4);
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let monitor = ConnectionMonitor::new(
            handle.clone(),
            event_rx,
            cmd_tx,
            Duration::from_millis(30),
        );
        tokio::spawn(monitor.run());

        let cmd = tokio::time::timeout(Duration::from_millis(500), cmd_rx.recv())
            .await
            .expect("expected a reconnect request")
            .unwrap();
        assert_eq!(cmd, LinkCommand::Reconnect);
    }

    #[tokio::test]
    async fn probe_does_not_leave_disconnected() {
        let handle = ConnectionHandle::new();
        let config = crate::config::OrchestratorConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            http_timeout_seconds: 1,
            batch_timeout_seconds: 1,
            probe_interval_seconds: 10,
            reconnect_interval_seconds: 30,
        };
        let client = OrchestratorClient::new(&config, "SCANNER_TEST");
        assert_eq!(
            probe_remote(&handle, &client).await,
            ConnectionState::Disconnected
        );
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }
}
