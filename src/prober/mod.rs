//! Single-relay prober.
//!
//! `probe()` never returns `Err`: every failure mode (timeout, refused
//! connection, malformed metadata) is folded into a `ProbeObservation`
//! with `reachable = false` and a populated `error` field, the same way
//! the teacher's scrapers treat a failed fetch as "no data" rather than
//! a propagated error. Retrying is the caller's job; the cycle loop
//! simply probes again next cycle.

use crate::config::ProbingConfig;
use crate::model::{AccessLevel, ProbeObservation, RelayKind, RelayUrl};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

/// Known remote-signer relay hostnames, consulted alongside the
/// capability-list heuristic.
const REMOTE_SIGNER_HOST_HINTS: &[&str] = &["nsecbunker", "bunker.", "signer."];

pub async fn probe(url: &RelayUrl, cfg: &ProbingConfig, now: i64) -> ProbeObservation {
    let is_onion = url.is_onion();
    let metadata = fetch_metadata(url, cfg, is_onion).await;
    let relay_kind = detect_relay_kind(url, metadata.as_ref());

    let mut observation = ProbeObservation {
        url: url.clone(),
        timestamp: now,
        reachable: false,
        relay_kind,
        access_level: AccessLevel::Unknown,
        closed_reason: None,
        connect_latency_ms: None,
        read_latency_ms: None,
        metadata_fetch_latency_ms: metadata.as_ref().map(|(_, latency)| *latency),
        metadata: metadata.map(|(json, _)| json),
        error: None,
    };

    let connect_timeout = cfg.connect_timeout(is_onion);
    let connect_started = Instant::now();
    let connect_result = tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await;

    let (ws_stream, _resp) = match connect_result {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            observation.error = Some(format!("connect failed: {e}"));
            return observation;
        }
        Err(_) => {
            observation.error = Some("connect timed out".to_string());
            return observation;
        }
    };
    observation.connect_latency_ms = Some(connect_started.elapsed().as_millis() as u32);
    observation.reachable = true;

    match relay_kind {
        RelayKind::General | RelayKind::Unknown => {
            run_general_application_test(ws_stream, cfg, is_onion, &mut observation).await;
        }
        RelayKind::Specialized | RelayKind::RemoteSigner => {
            observation.access_level = AccessLevel::Restricted;
            let _ = ws_stream;
        }
    }

    observation
}

async fn run_general_application_test(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    cfg: &ProbingConfig,
    is_onion: bool,
    observation: &mut ProbeObservation,
) {
    let (mut write, mut read) = ws_stream.split();

    let sub_id = format!("trust-probe-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let req = serde_json::json!(["REQ", sub_id, {"limit": 0}]);
    if write.send(Message::Text(req.to_string())).await.is_err() {
        observation.error = Some("failed to send probe request".to_string());
        return;
    }

    let read_started = Instant::now();
    let read_timeout = cfg.metadata_timeout(is_onion) * 2;
    let deadline = tokio::time::Instant::now() + read_timeout;

    loop {
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        let remaining = deadline - tokio::time::Instant::now();
        let next = tokio::time::timeout(remaining, read.next()).await;
        let Ok(Some(Ok(msg))) = next else {
            break;
        };

        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let Some(frame_type) = frame.get(0).and_then(Value::as_str) else {
            continue;
        };

        match frame_type {
            "EOSE" => {
                observation.access_level = AccessLevel::Open;
                observation.read_latency_ms = Some(read_started.elapsed().as_millis() as u32);
                break;
            }
            "CLOSED" => {
                let reason = frame.get(2).and_then(Value::as_str).unwrap_or("");
                observation.closed_reason = Some(reason.to_string());
                observation.access_level = classify_closed_reason(reason);
                observation.read_latency_ms = Some(read_started.elapsed().as_millis() as u32);
                break;
            }
            "NOTICE" | "AUTH" => {
                // Auth challenge alone does not terminate the wait.
                continue;
            }
            _ => continue,
        }
    }

    let _ = write.close().await;
}

fn classify_closed_reason(reason: &str) -> AccessLevel {
    let lower = reason.to_ascii_lowercase();
    if lower.starts_with("auth-required:") || lower.contains("auth-required") {
        AccessLevel::AuthRequired
    } else if lower.starts_with("payment-required:") || lower.contains("payment-required") {
        AccessLevel::PaymentRequired
    } else if lower.starts_with("restricted:") || lower.contains("restricted") {
        AccessLevel::Restricted
    } else {
        AccessLevel::Unknown
    }
}

async fn fetch_metadata(
    url: &RelayUrl,
    cfg: &ProbingConfig,
    is_onion: bool,
) -> Option<(Value, u32)> {
    let origin = url.https_origin()?;
    let started = Instant::now();
    let client = reqwest::Client::new();
    let result = tokio::time::timeout(
        cfg.metadata_timeout(is_onion),
        client
            .get(origin)
            .header("Accept", "application/nostr+json")
            .send(),
    )
    .await;

    let response = match result {
        Ok(Ok(resp)) if resp.status().is_success() => resp,
        _ => return None,
    };

    let json = response.json::<Value>().await.ok()?;
    Some((json, started.elapsed().as_millis() as u32))
}

/// Capability 46 is the remote-signer NIP. Subset of {1, 9, 46} with 46
/// present -> remote-signer. Non-empty and <=3 capabilities -> specialized.
/// Otherwise general. No metadata at all -> unknown.
fn detect_relay_kind(url: &RelayUrl, metadata: Option<&(Value, u32)>) -> RelayKind {
    let hostname = url.hostname().unwrap_or_default();
    if REMOTE_SIGNER_HOST_HINTS
        .iter()
        .any(|hint| hostname.contains(hint))
    {
        return RelayKind::RemoteSigner;
    }

    let Some((metadata, _)) = metadata else {
        return RelayKind::Unknown;
    };

    let Some(supported) = metadata.get("supported_nips").and_then(Value::as_array) else {
        return RelayKind::Unknown;
    };

    let capabilities: Vec<u64> = supported.iter().filter_map(Value::as_u64).collect();

    if capabilities.is_empty() {
        return RelayKind::Unknown;
    }

    if capabilities.contains(&46) && capabilities.iter().all(|c| matches!(c, 1 | 9 | 46)) {
        debug!(host = hostname, "classified as remote-signer via capabilities");
        return RelayKind::RemoteSigner;
    }

    if capabilities.len() <= 3 {
        return RelayKind::Specialized;
    }

    RelayKind::General
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_signer_capability_subset_is_detected() {
        let url = RelayUrl::parse("wss://relay.example.com").unwrap();
        let metadata = serde_json::json!({"supported_nips": [1, 9, 46]});
        assert_eq!(
            detect_relay_kind(&url, Some(&(metadata, 0))),
            RelayKind::RemoteSigner
        );
    }

    #[test]
    fn small_capability_list_is_specialized() {
        let url = RelayUrl::parse("wss://relay.example.com").unwrap();
        let metadata = serde_json::json!({"supported_nips": [1, 2]});
        assert_eq!(
            detect_relay_kind(&url, Some(&(metadata, 0))),
            RelayKind::Specialized
        );
    }

    #[test]
    fn large_capability_list_is_general() {
        let url = RelayUrl::parse("wss://relay.example.com").unwrap();
        let metadata = serde_json::json!({"supported_nips": [1, 2, 4, 9, 11, 15, 16]});
        assert_eq!(
            detect_relay_kind(&url, Some(&(metadata, 0))),
            RelayKind::General
        );
    }

    #[test]
    fn missing_metadata_is_unknown() {
        let url = RelayUrl::parse("wss://relay.example.com").unwrap();
        assert_eq!(detect_relay_kind(&url, None), RelayKind::Unknown);
    }

    #[test]
    fn closed_reason_classification() {
        assert_eq!(
            classify_closed_reason("auth-required: please authenticate"),
            AccessLevel::AuthRequired
        );
        assert_eq!(
            classify_closed_reason("payment-required: send sats"),
            AccessLevel::PaymentRequired
        );
        assert_eq!(
            classify_closed_reason("restricted: not allowed"),
            AccessLevel::Restricted
        );
        assert_eq!(classify_closed_reason("weird reason"), AccessLevel::Unknown);
    }
}
