//! Corroborates an operator pubkey from up to three sources: relay
//! metadata, a DNS TXT record at `_nostr.<domain>`, and
//! `https://<domain>/.well-known/nostr.json`.

use crate::model::{OperatorResolution, RelayUrl, VerifiedVia};
use hickory_resolver::TokioAsyncResolver;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct OperatorResolver {
    dns: Arc<TokioAsyncResolver>,
    http: reqwest::Client,
    timeout: Duration,
}

impl OperatorResolver {
    /// `dns` is shared with `JurisdictionResolver` via `AppState` rather
    /// than each resolver keeping its own resolver instance.
    pub fn new(dns: Arc<TokioAsyncResolver>, timeout: Duration) -> Self {
        Self {
            dns,
            http: reqwest::Client::new(),
            timeout,
        }
    }

    pub async fn resolve(
        &self,
        url: &RelayUrl,
        metadata: Option<&Value>,
        now: i64,
    ) -> OperatorResolution {
        let Some(hostname) = url.hostname().map(str::to_string) else {
            return empty_resolution(url, now);
        };

        let metadata_pubkey = extract_metadata_pubkey(metadata);
        let (dns_pubkey, well_known_pubkey) =
            tokio::join!(self.query_dns(&hostname), self.query_well_known(&hostname));

        let (winning, confidence, disagree) =
            tally(&metadata_pubkey, &dns_pubkey, &well_known_pubkey);

        let verified_via = winning.as_ref().map(|pubkey| {
            if metadata_pubkey.as_deref() == Some(pubkey.as_str())
                && dns_pubkey.as_deref() == Some(pubkey.as_str())
            {
                VerifiedVia::Dns
            } else if dns_pubkey.as_deref() == Some(pubkey.as_str()) {
                VerifiedVia::Dns
            } else if well_known_pubkey.as_deref() == Some(pubkey.as_str()) {
                VerifiedVia::WellKnown
            } else {
                VerifiedVia::Metadata
            }
        });

        OperatorResolution {
            url: url.clone(),
            operator_pubkey: winning,
            verified_via,
            confidence,
            last_verified_at: now,
            metadata_pubkey,
            dns_pubkey,
            well_known_pubkey,
            sources_disagree: disagree,
        }
    }

    async fn query_dns(&self, hostname: &str) -> Option<String> {
        let query = format!("_nostr.{hostname}");
        let result = tokio::time::timeout(self.timeout, self.dns.txt_lookup(query)).await;
        let lookup = result.ok()?.ok()?;
        lookup.iter().find_map(|txt| {
            let text = txt.to_string();
            text.strip_prefix("pubkey=")
                .filter(|hex| is_64_hex(hex))
                .map(str::to_string)
        })
    }

    async fn query_well_known(&self, hostname: &str) -> Option<String> {
        let url = format!("https://{hostname}/.well-known/nostr.json");
        let result = tokio::time::timeout(self.timeout, self.http.get(&url).send()).await;
        let response = result.ok()?.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: Value = response.json().await.ok()?;
        body.get("relay")
            .and_then(|r| r.get("pubkey"))
            .and_then(Value::as_str)
            .filter(|hex| is_64_hex(hex))
            .map(str::to_string)
    }
}

fn extract_metadata_pubkey(metadata: Option<&Value>) -> Option<String> {
    metadata?
        .get("pubkey")
        .and_then(Value::as_str)
        .filter(|hex| is_64_hex(hex))
        .map(str::to_string)
}

fn is_64_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Winning pubkey, its corroboration confidence, and whether >=2 distinct
/// pubkeys were seen across sources.
fn tally(
    metadata: &Option<String>,
    dns: &Option<String>,
    well_known: &Option<String>,
) -> (Option<String>, u8, bool) {
    let mut groups: Vec<(String, Vec<&'static str>)> = Vec::new();
    for (value, source) in [(metadata, "metadata"), (dns, "dns"), (well_known, "well_known")] {
        if let Some(pubkey) = value {
            if let Some(entry) = groups.iter_mut().find(|(p, _)| p == pubkey) {
                entry.1.push(source);
            } else {
                groups.push((pubkey.clone(), vec![source]));
            }
        }
    }

    if groups.is_empty() {
        return (None, 0, false);
    }

    groups.sort_by_key(|(_, sources)| std::cmp::Reverse(confidence_for_sources(sources)));
    let (winner_pubkey, winner_sources) = &groups[0];
    let confidence = confidence_for_sources(winner_sources);
    let disagree = groups.len() >= 2;
    (Some(winner_pubkey.clone()), confidence, disagree)
}

fn confidence_for_sources(sources: &[&str]) -> u8 {
    let has = |s: &str| sources.contains(&s);
    match (has("metadata"), has("dns"), has("well_known")) {
        (true, true, true) => 95,
        (true, true, false) => 90,
        (false, true, true) => 90,
        (true, false, true) => 85,
        (false, true, false) => 80,
        (false, false, true) => 75,
        (true, false, false) => 70,
        (false, false, false) => 0,
    }
}

fn empty_resolution(url: &RelayUrl, now: i64) -> OperatorResolution {
    OperatorResolution {
        url: url.clone(),
        operator_pubkey: None,
        verified_via: None,
        confidence: 0,
        last_verified_at: now,
        metadata_pubkey: None,
        dns_pubkey: None,
        well_known_pubkey: None,
        sources_disagree: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_three_sources_agreeing_is_95() {
        let pubkey = "a".repeat(64);
        let (winner, confidence, disagree) = tally(
            &Some(pubkey.clone()),
            &Some(pubkey.clone()),
            &Some(pubkey.clone()),
        );
        assert_eq!(winner, Some(pubkey));
        assert_eq!(confidence, 95);
        assert!(!disagree);
    }

    #[test]
    fn metadata_only_is_70() {
        let pubkey = "a".repeat(64);
        let (winner, confidence, disagree) = tally(&Some(pubkey.clone()), &None, &None);
        assert_eq!(winner, Some(pubkey));
        assert_eq!(confidence, 70);
        assert!(!disagree);
    }

    #[test]
    fn disagreeing_sources_pick_highest_corroboration() {
        let a = "a".repeat(64);
        let b = "b".repeat(64);
        let (winner, confidence, disagree) =
            tally(&Some(a.clone()), &Some(a.clone()), &Some(b));
        assert_eq!(winner, Some(a));
        assert_eq!(confidence, 90);
        assert!(disagree);
    }

    #[test]
    fn singleton_dns_outranks_singleton_metadata() {
        let a = "a".repeat(64);
        let b = "b".repeat(64);
        let (winner, confidence, disagree) = tally(&Some(a), &Some(b.clone()), &None);
        assert_eq!(winner, Some(b));
        assert_eq!(confidence, 80);
        assert!(disagree);
    }

    #[test]
    fn no_sources_yields_no_winner() {
        let (winner, confidence, disagree) = tally(&None, &None, &None);
        assert_eq!(winner, None);
        assert_eq!(confidence, 0);
        assert!(!disagree);
    }
}
