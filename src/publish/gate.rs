//! Material-change gate: the OR of (|Δoverall| >= threshold), (confidence
//! label changed), (no prior publish), (observation count at least
//! doubled). Pure, per the open question in the design notes that names
//! this OR as the authoritative rule.

use crate::model::PublishedAssertion;
use crate::scorer::ScoreBundle;

pub fn is_material_change(
    prev: Option<&PublishedAssertion>,
    next: &ScoreBundle,
    next_observation_count: u64,
    material_change_threshold: u32,
) -> bool {
    let Some(prev) = prev else {
        return true;
    };

    let delta = (next.overall as i32 - prev.last_score as i32).unsigned_abs();
    if delta >= material_change_threshold {
        return true;
    }

    if next.confidence != prev.last_confidence {
        return true;
    }

    if prev.last_observation_count > 0
        && next_observation_count >= prev.last_observation_count * 2
    {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConfidenceLabel, RelayUrl};

    fn score(overall: u8, confidence: ConfidenceLabel) -> ScoreBundle {
        ScoreBundle {
            reliability: overall,
            quality: overall,
            accessibility: overall,
            overall,
            operator_trust: None,
            confidence,
        }
    }

    fn prev_assertion(score: u8, confidence: ConfidenceLabel, observation_count: u64) -> PublishedAssertion {
        PublishedAssertion {
            url: RelayUrl::parse("wss://relay.example.com").unwrap(),
            last_event_id: "a".repeat(64),
            last_score: score,
            last_confidence: confidence,
            last_observation_count: observation_count,
            published_at: 0,
        }
    }

    #[test]
    fn no_prior_publish_is_always_material() {
        assert!(is_material_change(
            None,
            &score(50, ConfidenceLabel::Low),
            10,
            3
        ));
    }

    #[test]
    fn small_delta_same_confidence_same_observations_is_skipped() {
        let prev = prev_assertion(72, ConfidenceLabel::Medium, 100);
        assert!(!is_material_change(
            Some(&prev),
            &score(74, ConfidenceLabel::Medium),
            110,
            3
        ));
    }

    #[test]
    fn confidence_change_is_material_even_with_small_delta() {
        let prev = prev_assertion(72, ConfidenceLabel::Medium, 100);
        assert!(is_material_change(
            Some(&prev),
            &score(73, ConfidenceLabel::High),
            105,
            3
        ));
    }

    #[test]
    fn doubled_observation_count_is_material() {
        let prev = prev_assertion(72, ConfidenceLabel::Medium, 100);
        assert!(is_material_change(
            Some(&prev),
            &score(73, ConfidenceLabel::Medium),
            200,
            3
        ));
    }

    #[test]
    fn large_delta_is_material() {
        let prev = prev_assertion(72, ConfidenceLabel::Medium, 100);
        assert!(is_material_change(
            Some(&prev),
            &score(80, ConfidenceLabel::Medium),
            105,
            3
        ));
    }
}
