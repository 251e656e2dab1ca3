//! Assertion builder: deterministic projection of scorer output into the
//! canonical signed-event structure. Pure apart from taking the signing
//! keys as a parameter; never touches the network or the Store.

use crate::config::ProviderConfig;
use crate::model::{JurisdictionInfo, OperatorResolution, RelayUrl};
use crate::scorer::ScoreBundle;
use nostr::{EventBuilder, Keys, Kind, Tag};

/// Parameterized-replaceable event kind (NIP-33 addressable range) used
/// for trust assertions, keyed by the relay URL via the `d` tag.
const ASSERTION_KIND: u16 = 30166;

#[derive(Debug, Clone)]
pub struct AssertionInput<'a> {
    pub url: &'a RelayUrl,
    pub now: i64,
    pub scores: ScoreBundle,
    pub observation_count: u64,
    pub operator_resolution: Option<&'a OperatorResolution>,
    pub jurisdiction: Option<&'a JurisdictionInfo>,
    pub provider: &'a ProviderConfig,
}

/// Builds and signs the replaceable trust-assertion event for one relay.
pub fn build_assertion(input: &AssertionInput<'_>, keys: &Keys) -> anyhow::Result<nostr::Event> {
    let mut tags = vec![
        Tag::identifier(input.url.as_str()),
        Tag::custom(
            nostr::TagKind::Custom("score".into()),
            vec![input.scores.overall.to_string()],
        ),
        Tag::custom(
            nostr::TagKind::Custom("reliability".into()),
            vec![input.scores.reliability.to_string()],
        ),
        Tag::custom(
            nostr::TagKind::Custom("quality".into()),
            vec![input.scores.quality.to_string()],
        ),
        Tag::custom(
            nostr::TagKind::Custom("accessibility".into()),
            vec![input.scores.accessibility.to_string()],
        ),
        Tag::custom(
            nostr::TagKind::Custom("confidence".into()),
            vec![confidence_str(input.scores.confidence).to_string()],
        ),
        Tag::custom(
            nostr::TagKind::Custom("observations".into()),
            vec![input.observation_count.to_string()],
        ),
        Tag::custom(
            nostr::TagKind::Custom("algorithm_version".into()),
            vec![input.provider.algorithm_version.clone()],
        ),
        Tag::custom(
            nostr::TagKind::Custom("algorithm_url".into()),
            vec![input.provider.algorithm_url.clone()],
        ),
    ];

    if let Some(resolution) = input.operator_resolution {
        if let Some(pubkey) = resolution.operator_pubkey.as_ref() {
            tags.push(Tag::custom(
                nostr::TagKind::Custom("operator".into()),
                vec![pubkey.clone(), resolution.confidence.to_string()],
            ));
        }
    }

    if let Some(jurisdiction) = input.jurisdiction {
        if let Some(country) = jurisdiction.country_code.as_ref() {
            tags.push(Tag::custom(
                nostr::TagKind::Custom("jurisdiction".into()),
                vec![country.clone()],
            ));
        }
    }

    let body = build_body_json(input);

    let event = EventBuilder::new(Kind::Custom(ASSERTION_KIND), body, tags)
        .custom_created_at(nostr::Timestamp::from(input.now as u64))
        .to_event(keys)?;

    Ok(event)
}

fn confidence_str(label: crate::model::ConfidenceLabel) -> &'static str {
    use crate::model::ConfidenceLabel::*;
    match label {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

fn build_body_json(input: &AssertionInput<'_>) -> String {
    serde_json::json!({
        "url": input.url.as_str(),
        "timestamp": input.now,
        "scores": {
            "overall": input.scores.overall,
            "reliability": input.scores.reliability,
            "quality": input.scores.quality,
            "accessibility": input.scores.accessibility,
            "operator_trust": input.scores.operator_trust,
        },
        "confidence": confidence_str(input.scores.confidence),
        "observation_count": input.observation_count,
        "operator": input.operator_resolution.map(|r| serde_json::json!({
            "pubkey": r.operator_pubkey,
            "confidence": r.confidence,
            "verified_via": r.verified_via,
        })),
        "jurisdiction": input.jurisdiction.map(|j| serde_json::json!({
            "country_code": j.country_code,
            "is_tor": j.is_tor,
        })),
        "algorithm_version": input.provider.algorithm_version,
        "algorithm_url": input.provider.algorithm_url,
    })
    .to_string()
}
