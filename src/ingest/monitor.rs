//! MonitorIngestor: one subscription per configured source endpoint,
//! filtered to the monitor-metric event kind, since 90 days ago.

use super::run_subscription;
use crate::model::{MonitorMetric, RawNostrEvent, RelayUrl};
use crate::store::Store;
use nostr::Event as NostrEvent;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Real-world equivalent of NIP-66's monitor announcement kind; chosen so
/// the per-relay RTT/capability tags this service needs map directly onto
/// an existing, well-understood event shape.
pub const MONITOR_METRIC_KIND: u32 = 10166;

const NINETY_DAYS_SECS: i64 = 90 * 86400;

pub struct MonitorIngestorHandle {
    shutdown_txs: Vec<mpsc::Sender<()>>,
}

impl MonitorIngestorHandle {
    pub async fn shutdown(&self) {
        for tx in &self.shutdown_txs {
            let _ = tx.send(()).await;
        }
    }
}

pub fn spawn(store: Arc<Store>, endpoints: Vec<String>, now: i64) -> MonitorIngestorHandle {
    let mut shutdown_txs = Vec::new();

    for endpoint in endpoints {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        shutdown_txs.push(shutdown_tx);

        let store = store.clone();
        let subscribe_json = serde_json::json!([
            "REQ",
            "monitor-ingest",
            {
                "kinds": [MONITOR_METRIC_KIND],
                "since": now - NINETY_DAYS_SECS,
            }
        ])
        .to_string();

        tokio::spawn(async move {
            run_subscription(endpoint, subscribe_json, shutdown_rx, move |text| {
                handle_frame(&store, text);
            })
            .await;
        });
    }

    MonitorIngestorHandle { shutdown_txs }
}

fn handle_frame(store: &Arc<Store>, text: &str) {
    let Some(event) = parse_event_frame(text) else {
        return;
    };
    if !event.is_shape_valid() {
        return;
    }

    let Ok(verified) = verify_signature(&event) else {
        return;
    };
    if !verified {
        return;
    }

    let Some(metric) = to_monitor_metric(&event) else {
        return;
    };

    let store = store.clone();
    tokio::spawn(async move {
        if let Err(e) = store.insert_monitor_metric(&metric).await {
            warn!(error = %e, "failed to persist monitor metric");
        }
    });
}

fn parse_event_frame(text: &str) -> Option<RawNostrEvent> {
    let frame: serde_json::Value = serde_json::from_str(text).ok()?;
    let array = frame.as_array()?;
    if array.first()?.as_str()? != "EVENT" {
        return None;
    }
    let event_json = array.get(2)?;
    serde_json::from_value(event_json.clone()).ok()
}

fn verify_signature(raw: &RawNostrEvent) -> anyhow::Result<bool> {
    let json = serde_json::to_string(raw)?;
    let event = NostrEvent::from_json(json)?;
    Ok(event.verify().is_ok())
}

fn to_monitor_metric(raw: &RawNostrEvent) -> Option<MonitorMetric> {
    let url_str = raw.tag_value("r")?;
    let url = RelayUrl::parse(url_str).ok()?;

    let capabilities = raw
        .tags
        .iter()
        .find(|t| t.first().map(String::as_str) == Some("c"))
        .map(|t| t[1..].iter().filter_map(|s| u32::from_str(s).ok()).collect())
        .unwrap_or_default();

    Some(MonitorMetric {
        event_id: raw.id.clone(),
        url,
        monitor_pubkey: raw.pubkey.clone(),
        timestamp: raw.created_at,
        rtt_open_ms: raw.tag_value("rtt-open").and_then(|s| s.parse().ok()),
        rtt_read_ms: raw.tag_value("rtt-read").and_then(|s| s.parse().ok()),
        rtt_write_ms: raw.tag_value("rtt-write").and_then(|s| s.parse().ok()),
        network: raw.tag_value("n").map(str::to_string),
        capabilities,
        geohash: raw.tag_value("g").map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_frame() {
        let frame = serde_json::json!([
            "EVENT",
            "monitor-ingest",
            {
                "id": "a".repeat(64),
                "pubkey": "b".repeat(64),
                "created_at": 1_700_000_000,
                "kind": MONITOR_METRIC_KIND,
                "tags": [["r", "wss://relay.example.com"]],
                "content": "",
                "sig": "c".repeat(128),
            }
        ])
        .to_string();

        let event = parse_event_frame(&frame).expect("should parse");
        assert!(event.is_shape_valid());
        assert_eq!(event.tag_value("r"), Some("wss://relay.example.com"));
    }

    #[test]
    fn rejects_non_event_frame() {
        let frame = serde_json::json!(["EOSE", "monitor-ingest"]).to_string();
        assert!(parse_event_frame(&frame).is_none());
    }

    #[test]
    fn missing_relay_tag_yields_no_metric() {
        let raw = RawNostrEvent {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: 1_700_000_000,
            kind: MONITOR_METRIC_KIND,
            tags: vec![],
            content: String::new(),
            sig: "c".repeat(128),
        };
        assert!(to_monitor_metric(&raw).is_none());
    }
}
