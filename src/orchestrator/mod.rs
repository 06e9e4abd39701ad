//! # Orchestrator Integration Module
//!
//! Everything that talks to (or reasons about) the remote coordination
//! service:
//!
//! - [`OrchestratorClient`] - thin HTTP client for the three endpoints
//!   (`GET /health`, `POST /api/scan`, `POST /api/scan/batch`)
//! - [`connection`] - connection state machine and monitor
//! - [`delivery`] - the per-scan deliver-or-queue decision
//! - [`sync`] - the background task draining the persistent queue
//!
//! ## Failure philosophy
//!
//! Every request carries a timeout and a request is attempted exactly once;
//! there is no in-call retry. A failed or timed-out send is a routine
//! outcome handled by queueing the scan and trying again on the next sync
//! cycle. Nothing in this module raises a network error past its own
//! boundary.

pub mod connection;
pub mod delivery;
pub mod sync;

use anyhow::{anyhow, Result};
use log::debug;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::OrchestratorConfig;
use crate::scan::ScanRequest;

/// HTTP client for the orchestrator endpoints.
///
/// One instance is shared by the delivery path and the background sync
/// task; `reqwest::Client` pools connections internally.
pub struct OrchestratorClient {
    client: reqwest::Client,
    base_url: String,
    device_id: String,
    http_timeout: Duration,
    batch_timeout: Duration,
}

/// Wire envelope for `POST /api/scan/batch`.
#[derive(Serialize)]
struct BatchUpload<'a> {
    transactions: &'a [ScanRequest],
}

impl OrchestratorClient {
    pub fn new(config: &OrchestratorConfig, device_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            device_id: device_id.to_string(),
            http_timeout: config.http_timeout(),
            batch_timeout: config.batch_timeout(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Health probe: `GET {base}/health?deviceId=<id>`. Any 2xx within the
    /// timeout means reachable; every other outcome means not.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}/health?deviceId={}", self.base_url, self.device_id);
        match timeout(self.http_timeout, self.client.get(&url).send()).await {
            Ok(Ok(resp)) if resp.status().is_success() => true,
            Ok(Ok(resp)) => {
                debug!("health probe returned {}", resp.status());
                false
            }
            Ok(Err(e)) => {
                debug!("health probe failed: {e}");
                false
            }
            Err(_) => {
                debug!("health probe timed out after {:?}", self.http_timeout);
                false
            }
        }
    }

    /// Submit one scan. Returns the HTTP status for the caller to
    /// interpret; transport failures and timeouts are errors.
    pub async fn send_scan(&self, scan: &ScanRequest) -> Result<StatusCode> {
        let url = format!("{}/api/scan", self.base_url);
        let resp = timeout(self.http_timeout, self.client.post(&url).json(scan).send())
            .await
            .map_err(|_| anyhow!("scan submission timed out after {:?}", self.http_timeout))?
            .map_err(|e| anyhow!("scan submission failed: {}", e))?;
        Ok(resp.status())
    }

    /// Upload a batch of queued scans in one request. A 2xx acknowledges
    /// the entire batch; anything else leaves it in the queue.
    pub async fn send_batch(&self, batch: &[ScanRequest]) -> Result<StatusCode> {
        let url = format!("{}/api/scan/batch", self.base_url);
        let body = BatchUpload {
            transactions: batch,
        };
        let resp = timeout(self.batch_timeout, self.client.post(&url).json(&body).send())
            .await
            .map_err(|_| anyhow!("batch upload timed out after {:?}", self.batch_timeout))?
            .map_err(|e| anyhow!("batch upload failed: {}", e))?;
        Ok(resp.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;

    fn client_for(base: &str) -> OrchestratorClient {
        let config = OrchestratorConfig {
            base_url: base.to_string(),
            http_timeout_seconds: 5,
            batch_timeout_seconds: 30,
            probe_interval_seconds: 10,
            reconnect_interval_seconds: 30,
        };
        OrchestratorClient::new(&config, "SCANNER_TEST")
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let client = client_for("http://10.0.0.2:8080/");
        assert_eq!(client.base_url(), "http://10.0.0.2:8080");
    }

    #[test]
    fn batch_envelope_uses_transactions_key() {
        let scans = vec![ScanRequest {
            token_id: "534e2b03".into(),
            team_id: Some("001".into()),
            device_id: "SCANNER_TEST".into(),
            timestamp: "2025-10-19T14:30:00.000Z".into(),
        }];
        let body = BatchUpload {
            transactions: &scans,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.starts_with("{\"transactions\":["));
        assert!(json.contains("\"tokenId\":\"534e2b03\""));
    }
}
