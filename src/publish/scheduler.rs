//! PublishScheduler: a priority queue ordered by (priority desc,
//! enqueue-time asc), drained by a single serialized task that enforces
//! `min_delay_ms` pacing between sends. Enqueue never blocks the caller.

use super::pool::{AckOutcome, RelayPool};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};

pub type PublishResult = Vec<(String, AckOutcome)>;

struct QueueItem {
    priority: i32,
    seq: u64,
    event_id: String,
    event_json: String,
    reply: oneshot::Sender<PublishResult>,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueueItem {}
impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; for equal priority, earlier enqueue
        // (lower seq) first -> reverse seq ordering in a max-heap.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum SchedulerMsg {
    Enqueue(QueueItem),
}

pub struct PublishScheduler {
    tx: mpsc::Sender<SchedulerMsg>,
}

impl PublishScheduler {
    pub fn spawn(pool: Arc<RelayPool>, min_delay: Duration, ack_timeout: Duration) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(drain_loop(pool, rx, min_delay, ack_timeout));
        Arc::new(Self { tx })
    }

    /// Non-blocking enqueue; the returned receiver resolves once the item
    /// has been dequeued and settled against every pool endpoint.
    pub async fn enqueue(
        &self,
        priority: i32,
        seq: u64,
        event_id: String,
        event_json: String,
    ) -> oneshot::Receiver<PublishResult> {
        let (reply, rx) = oneshot::channel();
        let item = QueueItem {
            priority,
            seq,
            event_id,
            event_json,
            reply,
        };
        let _ = self.tx.send(SchedulerMsg::Enqueue(item)).await;
        rx
    }
}

async fn drain_loop(
    pool: Arc<RelayPool>,
    mut rx: mpsc::Receiver<SchedulerMsg>,
    min_delay: Duration,
    ack_timeout: Duration,
) {
    let heap: Mutex<BinaryHeap<QueueItem>> = Mutex::new(BinaryHeap::new());
    let mut ticker = tokio::time::interval(min_delay);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(SchedulerMsg::Enqueue(item)) => {
                        heap.lock().await.push(item);
                    }
                    None => return,
                }
            }
            _ = ticker.tick() => {
                let next = heap.lock().await.pop();
                if let Some(item) = next {
                    let results = pool
                        .publish_to_all(&item.event_id, &item.event_json, ack_timeout)
                        .await;
                    let _ = item.reply.send(results);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_orders_by_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        let (tx_a, _rx_a) = oneshot::channel();
        let (tx_b, _rx_b) = oneshot::channel();
        let (tx_c, _rx_c) = oneshot::channel();
        heap.push(QueueItem { priority: 1, seq: 2, event_id: "a".into(), event_json: "{}".into(), reply: tx_a });
        heap.push(QueueItem { priority: 5, seq: 1, event_id: "b".into(), event_json: "{}".into(), reply: tx_b });
        heap.push(QueueItem { priority: 1, seq: 1, event_id: "c".into(), event_json: "{}".into(), reply: tx_c });

        let first = heap.pop().unwrap();
        assert_eq!(first.event_id, "b");
        let second = heap.pop().unwrap();
        assert_eq!(second.event_id, "c");
        let third = heap.pop().unwrap();
        assert_eq!(third.event_id, "a");
    }
}
