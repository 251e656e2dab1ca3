//! Publisher: per-relay per-cycle workflow (build -> gate -> sign -> enqueue
//! -> settle -> persist).

use super::gate::is_material_change;
use super::pool::AckOutcome;
use super::scheduler::PublishScheduler;
use crate::assertion::{build_assertion, AssertionInput};
use crate::config::{PublishingConfig, ProviderConfig};
use crate::model::{JurisdictionInfo, OperatorResolution, PublishedAssertion, RelayUrl};
use crate::scorer::ScoreBundle;
use crate::store::Store;
use nostr::Keys;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Publisher {
    scheduler: Arc<PublishScheduler>,
    keys: Keys,
    provider: ProviderConfig,
    publishing: PublishingConfig,
    seq: AtomicU64,
    pub published: AtomicU64,
    pub skipped: AtomicU64,
}

impl Publisher {
    pub fn new(
        scheduler: Arc<PublishScheduler>,
        keys: Keys,
        provider: ProviderConfig,
        publishing: PublishingConfig,
    ) -> Self {
        Self {
            scheduler,
            keys,
            provider,
            publishing,
            seq: AtomicU64::new(0),
            published: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Runs the per-relay publish workflow described in the component
    /// design; returns once settlement against every pool endpoint
    /// completes (or the ack timeout elapses).
    #[allow(clippy::too_many_arguments)]
    pub async fn publish_relay(
        &self,
        store: &Store,
        url: &RelayUrl,
        scores: ScoreBundle,
        observation_count: u64,
        operator_resolution: Option<&OperatorResolution>,
        jurisdiction: Option<&JurisdictionInfo>,
        now: i64,
    ) -> anyhow::Result<()> {
        let prev = store.latest_published_assertion(url).await?;

        if observation_count < self.publishing.min_observations {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let material = is_material_change(
            prev.as_ref(),
            &scores,
            observation_count,
            self.publishing.material_change_threshold,
        );
        if !material {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let input = AssertionInput {
            url,
            now,
            scores,
            observation_count,
            operator_resolution,
            jurisdiction,
            provider: &self.provider,
        };
        let event = build_assertion(&input, &self.keys)?;
        let event_json = serde_json::to_string(&serde_json::json!(["EVENT", event]))?;
        let event_id = event.id.to_hex();

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let priority = 0;
        let rx = self
            .scheduler
            .enqueue(priority, seq, event_id.clone(), event_json)
            .await;

        let results = match rx.await {
            Ok(results) => results,
            Err(_) => vec![],
        };

        let any_success = results
            .iter()
            .any(|(_, outcome)| *outcome == AckOutcome::Success);

        if any_success {
            let assertion = PublishedAssertion {
                url: url.clone(),
                last_event_id: event_id,
                last_score: scores.overall,
                last_confidence: scores.confidence,
                last_observation_count: observation_count,
                published_at: now,
            };
            store.upsert_published_assertion(&assertion).await?;
            self.published.fetch_add(1, Ordering::Relaxed);
            info!(url = %url, score = scores.overall, "published trust assertion");
        } else {
            warn!(url = %url, ?results, "publish settled with no successful endpoint");
        }

        Ok(())
    }
}

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);
