//! Scan events and the foreground handling loop.
//!
//! A [`ScanRequest`] is the transient value created for every token read. It
//! is consumed immediately by the delivery path: either transmitted to the
//! orchestrator or converted into a durable queue entry (same wire shape,
//! one JSON object per line).
//!
//! Scan arrival is modeled as a bounded channel: whatever produces scans
//! (the tag reader bridge, or stdin in the reference binary) sends into the
//! channel, and [`run_scan_handler`] drains it. A slow delivery cycle backs
//! up into the channel, never into the producer's read path.

use chrono::{SecondsFormat, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::orchestrator::delivery::{DeliveryOutcome, ScanDelivery};

/// One token read, in wire form.
///
/// `teamId` is omitted from the JSON entirely when absent; the orchestrator
/// treats a missing team as an unassigned scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub token_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    pub device_id: String,
    /// ISO-8601 UTC with millisecond precision, e.g. `2025-10-19T14:30:00.000Z`.
    pub timestamp: String,
}

impl ScanRequest {
    /// Build a scan stamped with the current UTC time.
    pub fn new(token_id: String, team_id: Option<String>, device_id: String) -> Self {
        Self {
            token_id,
            team_id,
            device_id,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Foreground scan handler: consume scans from the bounded channel and run
/// each through the delivery decision. Exits when the producer side closes.
pub async fn run_scan_handler(mut rx: mpsc::Receiver<ScanRequest>, delivery: Arc<ScanDelivery>) {
    while let Some(scan) = rx.recv().await {
        let token = scan.token_id.clone();
        match delivery.deliver(scan).await {
            DeliveryOutcome::Delivered => info!("scan {token}: delivered"),
            DeliveryOutcome::Queued => info!("scan {token}: queued for sync"),
            DeliveryOutcome::Dropped => warn!("scan {token}: dropped (storage unavailable)"),
        }
    }
    debug!("scan channel closed, handler exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_and_omits_empty_team() {
        let scan = ScanRequest {
            token_id: "534e2b03".into(),
            team_id: None,
            device_id: "SCANNER_A1B2C3D4E5F6".into(),
            timestamp: "2025-10-19T14:30:00.000Z".into(),
        };
        let json = serde_json::to_string(&scan).unwrap();
        assert!(json.contains("\"tokenId\":\"534e2b03\""));
        assert!(json.contains("\"deviceId\""));
        assert!(!json.contains("teamId"));

        let with_team = ScanRequest {
            team_id: Some("001".into()),
            ..scan
        };
        let json = serde_json::to_string(&with_team).unwrap();
        assert!(json.contains("\"teamId\":\"001\""));
    }

    #[test]
    fn deserialization_requires_core_fields() {
        let missing_device = r#"{"tokenId":"a","timestamp":"2025-10-19T14:30:00.000Z"}"#;
        assert!(serde_json::from_str::<ScanRequest>(missing_device).is_err());

        let full = r#"{"tokenId":"a","teamId":"001","deviceId":"d","timestamp":"t"}"#;
        let scan: ScanRequest = serde_json::from_str(full).unwrap();
        assert_eq!(scan.team_id.as_deref(), Some("001"));
    }

    #[test]
    fn new_stamps_millisecond_utc() {
        let scan = ScanRequest::new("tok".into(), None, "dev".into());
        assert!(scan.timestamp.ends_with('Z'));
        // 2025-10-19T14:30:00.000Z: fixed width, exactly three fractional
        // digits.
        assert_eq!(scan.timestamp.len(), 24);
    }
}
