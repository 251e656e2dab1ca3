//! Streaming ingestors: MonitorIngestor and ReportIngestor.
//!
//! Both subscribe over WebSocket to a set of configured source endpoints
//! using the same reconnect/backoff shape as the teacher's
//! `scrapers/polymarket_ws.rs`, generalized here since both ingestors and
//! the publish pool (`publish::pool`) need it independently.

pub mod monitor;
pub mod report;

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::warn;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Runs `on_text` for every text frame received on `endpoint`, resending
/// `subscribe_json` after every (re)connect, until `shutdown` fires.
/// Reconnects forever with exponential backoff capped at 60s; the
/// attempt counter resets to zero on every successful open.
pub(super) async fn run_subscription<F>(
    endpoint: String,
    subscribe_json: String,
    mut shutdown: mpsc::Receiver<()>,
    mut on_text: F,
) where
    F: FnMut(&str) + Send,
{
    let mut backoff = Duration::from_secs(1);

    loop {
        if shutdown.try_recv().is_ok() {
            return;
        }

        match connect_async(&endpoint).await {
            Ok((stream, _)) => {
                backoff = Duration::from_secs(1);
                let (mut write, mut read) = stream.split();

                if write.send(Message::Text(subscribe_json.clone())).await.is_err() {
                    warn!(endpoint = %endpoint, "failed to send subscription request");
                    continue;
                }

                loop {
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => on_text(&text),
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = write.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(endpoint = %endpoint, error = %e, "subscription stream error");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "connect failed; backing off");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
