//! RelayPool: one persistent WebSocket per configured publish endpoint.
//!
//! Grounded on the teacher's reconnect-with-backoff WS worker shape
//! (connect, split, `tokio::select!` over pings/commands/reads) and on
//! its circuit-breaker state machine for "stop retrying after N attempts
//! until the next cycle".

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Success,
    Failure(String),
    RateLimited,
    ConnectionClosed,
    Cancelled,
    TimedOut,
}

enum PoolCommand {
    Publish {
        event_json: String,
        event_id: String,
        ack: oneshot::Sender<AckOutcome>,
    },
}

struct EndpointHandle {
    cmd_tx: mpsc::Sender<PoolCommand>,
}

pub struct RelayPool {
    endpoints: HashMap<String, EndpointHandle>,
}

impl RelayPool {
    pub fn spawn(endpoints: Vec<String>) -> Arc<Self> {
        let mut map = HashMap::new();
        for endpoint in endpoints {
            let (cmd_tx, cmd_rx) = mpsc::channel(256);
            let ep = endpoint.clone();
            tokio::spawn(async move {
                run_endpoint(ep, cmd_rx).await;
            });
            map.insert(endpoint, EndpointHandle { cmd_tx });
        }
        Arc::new(Self { endpoints: map })
    }

    /// Enqueue a signed event to every pool endpoint and await settlement
    /// from each, bounded by `timeout`.
    pub async fn publish_to_all(
        &self,
        event_id: &str,
        event_json: &str,
        timeout: Duration,
    ) -> Vec<(String, AckOutcome)> {
        let mut receivers = Vec::with_capacity(self.endpoints.len());

        for (endpoint, handle) in &self.endpoints {
            let (ack_tx, ack_rx) = oneshot::channel();
            let send_result = handle
                .cmd_tx
                .send(PoolCommand::Publish {
                    event_json: event_json.to_string(),
                    event_id: event_id.to_string(),
                    ack: ack_tx,
                })
                .await;
            if send_result.is_err() {
                receivers.push((endpoint.clone(), None));
            } else {
                receivers.push((endpoint.clone(), Some(ack_rx)));
            }
        }

        let mut results = Vec::with_capacity(receivers.len());
        for (endpoint, rx) in receivers {
            let outcome = match rx {
                None => AckOutcome::ConnectionClosed,
                Some(rx) => match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(_)) => AckOutcome::ConnectionClosed,
                    Err(_) => AckOutcome::TimedOut,
                },
            };
            results.push((endpoint, outcome));
        }
        results
    }
}

async fn run_endpoint(endpoint: String, mut cmd_rx: mpsc::Receiver<PoolCommand>) {
    let mut attempt: u32 = 0;

    loop {
        if attempt >= MAX_RECONNECT_ATTEMPTS {
            warn!(endpoint = %endpoint, "relay pool endpoint dormant after max reconnect attempts");
            // Dormant until the next cycle: drain and fail any pending
            // commands rather than silently dropping them.
            while let Some(cmd) = cmd_rx.recv().await {
                fail_command(cmd, AckOutcome::ConnectionClosed);
            }
            return;
        }

        match connect_and_serve(&endpoint, &mut cmd_rx).await {
            Ok(()) => {
                attempt = 0;
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "relay pool endpoint disconnected");
                attempt += 1;
                let backoff = Duration::from_secs(2u64.saturating_pow(attempt)).min(MAX_BACKOFF);
                sleep(backoff).await;
            }
        }
    }
}

fn fail_command(cmd: PoolCommand, outcome: AckOutcome) {
    match cmd {
        PoolCommand::Publish { ack, .. } => {
            let _ = ack.send(outcome);
        }
    }
}

async fn connect_and_serve(
    endpoint: &str,
    cmd_rx: &mut mpsc::Receiver<PoolCommand>,
) -> anyhow::Result<()> {
    let (ws_stream, _resp) = connect_async(endpoint).await?;
    let (mut write, mut read) = ws_stream.split();

    let pending: Arc<Mutex<HashMap<String, oneshot::Sender<AckOutcome>>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let mut rate_limited_until: Option<std::time::Instant> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    resolve_all(&pending, AckOutcome::Cancelled);
                    return Ok(());
                };
                match cmd {
                    PoolCommand::Publish { event_json, event_id, ack } => {
                        if let Some(until) = rate_limited_until {
                            if std::time::Instant::now() < until {
                                let _ = ack.send(AckOutcome::RateLimited);
                                continue;
                            }
                            rate_limited_until = None;
                        }
                        pending.lock().insert(event_id, ack);
                        if let Err(e) = write.send(Message::Text(event_json)).await {
                            warn!(endpoint = %endpoint, error = %e, "publish send failed");
                            resolve_all(&pending, AckOutcome::ConnectionClosed);
                            return Err(anyhow::anyhow!("send failed: {e}"));
                        }
                    }
                }
            }
            msg = read.next() => {
                let Some(msg) = msg else {
                    resolve_all(&pending, AckOutcome::ConnectionClosed);
                    return Err(anyhow::anyhow!("ws stream ended"));
                };
                match msg {
                    Ok(Message::Text(text)) => {
                        handle_ok_frame(&text, &pending, &mut rate_limited_until);
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, endpoint = %endpoint, "publish ws close");
                        resolve_all(&pending, AckOutcome::ConnectionClosed);
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        resolve_all(&pending, AckOutcome::ConnectionClosed);
                        return Err(anyhow::anyhow!("ws error: {e}"));
                    }
                }
            }
        }
    }
}

fn resolve_all(pending: &Arc<Mutex<HashMap<String, oneshot::Sender<AckOutcome>>>>, outcome: AckOutcome) {
    let mut map = pending.lock();
    for (_, sender) in map.drain() {
        let _ = sender.send(outcome.clone());
    }
}

fn handle_ok_frame(
    text: &str,
    pending: &Arc<Mutex<HashMap<String, oneshot::Sender<AckOutcome>>>>,
    rate_limited_until: &mut Option<std::time::Instant>,
) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return;
    };
    let Some(arr) = value.as_array() else { return };
    if arr.first().and_then(|v| v.as_str()) != Some("OK") {
        return;
    }
    let Some(event_id) = arr.get(1).and_then(|v| v.as_str()) else {
        return;
    };
    let success = arr.get(2).and_then(|v| v.as_bool()).unwrap_or(false);
    let message = arr.get(3).and_then(|v| v.as_str()).unwrap_or("");

    if is_rate_limit_hint(message) {
        *rate_limited_until = Some(std::time::Instant::now() + Duration::from_secs(60));
    }

    if let Some(sender) = pending.lock().remove(event_id) {
        let outcome = if success {
            AckOutcome::Success
        } else if is_rate_limit_hint(message) {
            AckOutcome::RateLimited
        } else {
            AckOutcome::Failure(message.to_string())
        };
        let _ = sender.send(outcome);
    }
}

fn is_rate_limit_hint(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("rate") || lower.contains("too many") || lower.contains("slow down")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_hint_detection() {
        assert!(is_rate_limit_hint("rate limited, slow down"));
        assert!(is_rate_limit_hint("Too Many requests"));
        assert!(!is_rate_limit_hint("invalid signature"));
    }
}
