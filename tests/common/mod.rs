//! Shared helpers for the integration tests: a minimal HTTP stub for the
//! orchestrator endpoints (raw tokio TCP, no extra dependencies) and
//! constructors for the pieces under test.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use scanpost::config::Config;
use scanpost::orchestrator::connection::{
    probe_remote, ConnectionHandle, ConnectionMonitor, ConnectionState, LinkEvent,
};
use scanpost::orchestrator::OrchestratorClient;
use scanpost::queue::ScanQueue;
use scanpost::scan::ScanRequest;
use scanpost::storage::StorageHandle;

/// One request the stub saw.
#[derive(Debug)]
pub struct StubRequest {
    pub path: String,
    pub body: String,
}

/// Spawn an HTTP stub: `/health` answers 200, `/api/scan` answers
/// `scan_status`, `/api/scan/batch` answers `batch_status`. Every request
/// is reported through the returned channel.
pub async fn spawn_orchestrator_stub(
    scan_status: u16,
    batch_status: u16,
) -> (String, mpsc::UnboundedReceiver<StubRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some((path, body)) = read_request(&mut socket).await {
                    let status = if path.starts_with("/api/scan/batch") {
                        batch_status
                    } else if path.starts_with("/api/scan") {
                        scan_status
                    } else {
                        200
                    };
                    let _ = tx.send(StubRequest {
                        path: path.clone(),
                        body,
                    });
                    let reason = match status {
                        200 => "OK",
                        409 => "Conflict",
                        500 => "Internal Server Error",
                        503 => "Service Unavailable",
                        _ => "Status",
                    };
                    let resp = format!(
                        "HTTP/1.1 {status} {reason}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                    );
                    let _ = socket.write_all(resp.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });

    (base, rx)
}

async fn read_request(socket: &mut TcpStream) -> Option<(String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let path = head.lines().next()?.split_whitespace().nth(1)?.to_string();
    let content_length = head
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = (header_end + content_length).min(buf.len());
    let body = String::from_utf8_lossy(&buf[header_end..body_end]).to_string();
    Some((path, body))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Config pointed at the stub, with intervals tightened for tests.
pub fn test_config(base_url: &str, data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.scanner.device_id = "SCANNER_TEST".to_string();
    config.orchestrator.base_url = base_url.to_string();
    config.orchestrator.http_timeout_seconds = 2;
    config.orchestrator.batch_timeout_seconds = 2;
    config.orchestrator.probe_interval_seconds = 1;
    config.queue.data_dir = data_dir.display().to_string();
    config.queue.drain_delay_ms = 10;
    config
}

pub fn test_queue(config: &Config) -> Arc<ScanQueue> {
    let storage = StorageHandle::new(&config.queue.data_dir);
    Arc::new(ScanQueue::new(storage, &config.queue))
}

pub fn test_client(config: &Config) -> Arc<OrchestratorClient> {
    Arc::new(OrchestratorClient::new(
        &config.orchestrator,
        &config.scanner.device_id,
    ))
}

pub fn scan(token: &str) -> ScanRequest {
    ScanRequest::new(
        token.to_string(),
        Some("001".to_string()),
        "SCANNER_TEST".to_string(),
    )
}

/// Feed a LinkEvent::Up through a real monitor so the handle reaches
/// NetworkUp the same way production does.
pub async fn bring_link_up(handle: &ConnectionHandle) {
    let (event_tx, event_rx) = mpsc::channel(4);
    let (cmd_tx, _cmd_rx) = mpsc::channel(4);
    let monitor = ConnectionMonitor::new(
        handle.clone(),
        event_rx,
        cmd_tx,
        Duration::from_secs(30),
    );
    tokio::spawn(monitor.run());
    event_tx.send(LinkEvent::Up).await.unwrap();
    for _ in 0..100 {
        if handle.link_up() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("monitor never processed the link event");
}

/// Bring the link up and probe until the handle reports Reachable.
pub async fn make_reachable(handle: &ConnectionHandle, client: &OrchestratorClient) {
    bring_link_up(handle).await;
    assert_eq!(
        probe_remote(handle, client).await,
        ConnectionState::Reachable,
        "stub health probe should succeed"
    );
}

/// Poll until `cond` holds or the deadline passes.
pub async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
