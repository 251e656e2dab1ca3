//! Queries configured trust-provider endpoints for a subject pubkey,
//! keeps the latest assertion per provider, and aggregates a
//! weighted-average rank.

use crate::model::{ConfidenceLabel, OperatorTrust};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TrustProvider {
    pub endpoint: String,
    pub weight: f64,
}

pub struct WotClient {
    client: reqwest::Client,
    providers: Vec<TrustProvider>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ProviderAssertion {
    score: f64,
}

impl WotClient {
    pub fn new(providers: Vec<TrustProvider>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            providers,
            timeout,
        }
    }

    /// Full aggregated trust record for `pubkey`, or `None` if no
    /// provider responded within the bounded timeout.
    pub async fn resolve(&self, pubkey: &str, now: i64) -> Option<OperatorTrust> {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut provider_count = 0u32;

        for provider in &self.providers {
            match self.query_provider(provider, pubkey).await {
                Some(score) => {
                    weighted_sum += score * provider.weight;
                    weight_total += provider.weight;
                    provider_count += 1;
                }
                None => continue,
            }
        }

        if provider_count == 0 {
            return None;
        }

        let aggregated = (weighted_sum / weight_total).round().clamp(0.0, 100.0) as u8;
        let confidence = match provider_count {
            1 => ConfidenceLabel::Low,
            2 => ConfidenceLabel::Medium,
            _ => ConfidenceLabel::High,
        };

        Some(OperatorTrust {
            operator_pubkey: pubkey.to_string(),
            score: aggregated,
            confidence,
            provider_count,
            updated_at: now,
        })
    }

    /// Convenience wrapper for callers that only need the raw score
    /// (the report ingestor's weighting step).
    pub async fn trust_for(&self, pubkey: &str) -> Option<u8> {
        self.resolve(pubkey, crate::model::now_unix())
            .await
            .map(|t| t.score)
    }

    async fn query_provider(&self, provider: &TrustProvider, pubkey: &str) -> Option<f64> {
        let result = tokio::time::timeout(
            self.timeout,
            self.client
                .get(&provider.endpoint)
                .query(&[("pubkey", pubkey)])
                .send(),
        )
        .await;

        let response = match result {
            Ok(Ok(resp)) if resp.status().is_success() => resp,
            Ok(Ok(resp)) => {
                debug!(endpoint = %provider.endpoint, status = %resp.status(), "wot provider non-success status");
                return None;
            }
            Ok(Err(e)) => {
                debug!(endpoint = %provider.endpoint, error = %e, "wot provider request failed");
                return None;
            }
            Err(_) => {
                debug!(endpoint = %provider.endpoint, "wot provider timed out");
                return None;
            }
        };

        let assertion: ProviderAssertion = response.json().await.ok()?;
        Some(assertion.score.clamp(0.0, 100.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_tiers_by_provider_count() {
        let cases = [
            (1u32, ConfidenceLabel::Low),
            (2, ConfidenceLabel::Medium),
            (3, ConfidenceLabel::High),
            (10, ConfidenceLabel::High),
        ];
        for (count, expected) in cases {
            let confidence = match count {
                1 => ConfidenceLabel::Low,
                2 => ConfidenceLabel::Medium,
                _ => ConfidenceLabel::High,
            };
            assert_eq!(confidence, expected);
        }
    }
}
