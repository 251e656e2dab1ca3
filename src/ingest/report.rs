//! ReportIngestor: subscribes to the label-event kind filtered by the
//! `relay-report` namespace, verifies, rate-limits, weights by reporter
//! trust, and persists.

use super::run_subscription;
use crate::model::{RawNostrEvent, RelayUrl, Report, ReportType};
use crate::store::Store;
use crate::wot::WotClient;
use nostr::Event as NostrEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// NIP-32 Label event kind, used here for the `relay-report` namespace.
pub const REPORT_KIND: u32 = 1985;

const NINETY_DAYS_SECS: i64 = 90 * 86400;
const TRUST_FLOOR: u8 = 5;
const WEIGHT_EXPONENT: i32 = 2;
const DEFAULT_WEIGHT_UNKNOWN_TRUST: f64 = 0.5;

pub struct ReportIngestorHandle {
    shutdown_txs: Vec<mpsc::Sender<()>>,
}

impl ReportIngestorHandle {
    pub async fn shutdown(&self) {
        for tx in &self.shutdown_txs {
            let _ = tx.send(()).await;
        }
    }
}

pub fn spawn(
    store: Arc<Store>,
    wot: Option<Arc<WotClient>>,
    endpoints: Vec<String>,
    max_per_reporter_per_relay_per_day: u32,
    now: i64,
) -> ReportIngestorHandle {
    let mut shutdown_txs = Vec::new();

    for endpoint in endpoints {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        shutdown_txs.push(shutdown_tx);

        let store = store.clone();
        let wot = wot.clone();
        let subscribe_json = serde_json::json!([
            "REQ",
            "report-ingest",
            {
                "kinds": [REPORT_KIND],
                "#L": ["relay-report"],
                "since": now - NINETY_DAYS_SECS,
            }
        ])
        .to_string();

        tokio::spawn(async move {
            run_subscription(endpoint, subscribe_json, shutdown_rx, move |text| {
                let store = store.clone();
                let wot = wot.clone();
                if let Some(raw) = parse_event_frame(text) {
                    tokio::spawn(async move {
                        handle_event(store, wot, raw, max_per_reporter_per_relay_per_day).await;
                    });
                }
            })
            .await;
        });
    }

    ReportIngestorHandle { shutdown_txs }
}

async fn handle_event(
    store: Arc<Store>,
    wot: Option<Arc<WotClient>>,
    raw: RawNostrEvent,
    max_per_reporter_per_relay_per_day: u32,
) {
    if !raw.is_shape_valid() {
        return;
    }
    if !verify_signature(&raw).unwrap_or(false) {
        return;
    }

    let Some(mut report) = to_report(&raw) else {
        return;
    };

    let trust = match wot {
        Some(client) => client.trust_for(&report.reporter_pubkey).await,
        None => None,
    };

    match trust {
        Some(score) if score < TRUST_FLOOR => return,
        Some(score) => {
            let normalized = (score.clamp(0, 100) as f64) / 100.0;
            report.reporter_trust_weight = normalized.powi(WEIGHT_EXPONENT);
        }
        None => report.reporter_trust_weight = DEFAULT_WEIGHT_UNKNOWN_TRUST,
    }

    match store
        .insert_report(&report, max_per_reporter_per_relay_per_day)
        .await
    {
        Ok(true) => {}
        Ok(false) => {}
        Err(e) => warn!(error = %e, "failed to persist report"),
    }
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

fn to_report(raw: &RawNostrEvent) -> Option<Report> {
    let report_type_str = raw
        .tags
        .iter()
        .find(|t| t.first().map(String::as_str) == Some("l") && t.get(2).map(String::as_str) == Some("relay-report"))
        .and_then(|t| t.get(1))?;
    let report_type = ReportType::parse(report_type_str)?;

    let url_str = raw.tag_value("r")?;
    let url = RelayUrl::parse(url_str).ok()?;

    Some(Report {
        event_id: raw.id.clone(),
        url,
        reporter_pubkey: raw.pubkey.clone(),
        report_type,
        content: raw.content.clone(),
        timestamp: raw.created_at,
        reporter_trust_weight: DEFAULT_WEIGHT_UNKNOWN_TRUST,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw() -> RawNostrEvent {
        RawNostrEvent {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: 1_700_000_000,
            kind: REPORT_KIND,
            tags: vec![
                vec!["l".to_string(), "spam".to_string(), "relay-report".to_string()],
                vec!["r".to_string(), "wss://relay.example.com".to_string()],
            ],
            content: "spammy relay".to_string(),
            sig: "c".repeat(128),
        }
    }

    #[test]
    fn parses_well_formed_report() {
        let report = to_report(&sample_raw()).expect("should parse");
        assert_eq!(report.report_type, ReportType::Spam);
        assert_eq!(report.url.as_str(), "wss://relay.example.com");
    }

    #[test]
    fn missing_namespace_tag_yields_none() {
        let mut raw = sample_raw();
        raw.tags.retain(|t| t.first().map(String::as_str) != Some("l"));
        assert!(to_report(&raw).is_none());
    }

    #[test]
    fn unrecognized_report_type_yields_none() {
        let mut raw = sample_raw();
        raw.tags[0][1] = "bogus".to_string();
        assert!(to_report(&raw).is_none());
    }
}
