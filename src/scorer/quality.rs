//! Quality = 0.60*Policy + 0.25*Security + 0.15*Operator.

use super::{clamp_round, AggregateBundle, QUALITY_WEIGHTS};

pub fn quality_score(bundle: &AggregateBundle) -> u8 {
    let policy = policy_score(bundle);
    let security = security_score(bundle);
    let operator = operator_score(bundle);

    clamp_round(
        QUALITY_WEIGHTS[0] * policy + QUALITY_WEIGHTS[1] * security + QUALITY_WEIGHTS[2] * operator,
    )
}

/// Starts at 50, adds increments for declared metadata richness, then
/// caps downward when required fields are absent so a relay cannot buy
/// its way past a missing identity/contact/limitation block with fees.
fn policy_score(bundle: &AggregateBundle) -> f64 {
    let mut score: f64 = 50.0;

    let has_identity = bundle.metadata_name.is_some() && bundle.metadata_description.is_some();
    if has_identity {
        score += 15.0;
    }

    let has_contact = bundle.metadata_contact.is_some();
    if has_contact {
        score += 10.0;
    }

    let has_software = bundle.metadata_software.is_some() || bundle.metadata_version.is_some();
    if has_software {
        score += 10.0;
    }

    if bundle.has_limitation_block {
        score += 10.0;
    }

    let fees_match_payment_required = bundle.fees_declared && bundle.limitation_payment_required;
    if fees_match_payment_required {
        score += 5.0;
    }

    if !has_identity {
        score = score.min(50.0);
    }
    if !has_contact {
        score = score.min(70.0);
    }
    if !bundle.has_limitation_block {
        score = score.min(85.0);
    }

    score.clamp(0.0, 100.0)
}

fn security_score(bundle: &AggregateBundle) -> f64 {
    if !bundle.has_metadata && bundle.probes.is_empty() {
        return 50.0;
    }
    if bundle.is_tls {
        100.0
    } else {
        0.0
    }
}

fn operator_score(bundle: &AggregateBundle) -> f64 {
    let Some(resolution) = bundle.operator_resolution.as_ref() else {
        return 50.0;
    };
    let confidence = resolution.confidence as f64;

    match bundle.operator_trust.as_ref() {
        Some(trust) => 0.5 * confidence + 0.5 * trust.score as f64,
        None => confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConfidenceLabel, OperatorResolution, OperatorTrust, VerifiedVia};
    use crate::model::RelayUrl;

    fn base_bundle() -> AggregateBundle {
        AggregateBundle::default()
    }

    #[test]
    fn missing_identity_caps_at_fifty() {
        let bundle = base_bundle();
        assert!(policy_score(&bundle) <= 50.0);
    }

    #[test]
    fn full_metadata_uncapped() {
        let mut bundle = base_bundle();
        bundle.metadata_name = Some("relay".into());
        bundle.metadata_description = Some("a relay".into());
        bundle.metadata_contact = Some("admin@example.com".into());
        bundle.metadata_software = Some("my-relay".into());
        bundle.has_limitation_block = true;
        assert_eq!(policy_score(&bundle) as u32, 95);
    }

    #[test]
    fn security_reflects_scheme() {
        let mut bundle = base_bundle();
        bundle.is_tls = true;
        bundle.has_metadata = true;
        assert_eq!(security_score(&bundle) as u32, 100);
        bundle.is_tls = false;
        assert_eq!(security_score(&bundle) as u32, 0);
    }

    #[test]
    fn operator_score_neutral_when_unresolved() {
        let bundle = base_bundle();
        assert_eq!(operator_score(&bundle) as u32, 50);
    }

    #[test]
    fn operator_score_blends_wot_when_present() {
        let url = RelayUrl::parse("wss://relay.example.com").unwrap();
        let mut bundle = base_bundle();
        bundle.operator_resolution = Some(OperatorResolution {
            url: url.clone(),
            operator_pubkey: Some("a".repeat(64)),
            verified_via: Some(VerifiedVia::Dns),
            confidence: 90,
            last_verified_at: 0,
            metadata_pubkey: None,
            dns_pubkey: None,
            well_known_pubkey: None,
            sources_disagree: false,
        });
        assert_eq!(operator_score(&bundle) as u32, 90);

        bundle.operator_trust = Some(OperatorTrust {
            operator_pubkey: "a".repeat(64),
            score: 70,
            confidence: ConfidenceLabel::Medium,
            provider_count: 2,
            updated_at: 0,
        });
        assert_eq!(operator_score(&bundle) as u32, 80);
    }
}
