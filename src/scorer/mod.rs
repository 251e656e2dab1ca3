//! The scorer: pure functions only. Every function here takes `now`
//! explicitly; nothing in this module may call the system clock. Scorer
//! and the assertion builder are the only two places in the service that
//! are guaranteed never to suspend.

mod accessibility;
mod quality;
mod reliability;

pub use accessibility::accessibility_score;
pub use quality::quality_score;
pub use reliability::{offline_decay, reliability_score, temporal_weight};

use crate::model::{ConfidenceLabel, JurisdictionInfo, OperatorResolution, OperatorTrust, ReportType};
use std::collections::HashMap;

/// One probe reduced to exactly what the scorer needs; built by the Store
/// from `allProbes(window)`.
#[derive(Debug, Clone)]
pub struct ProbeSample {
    pub timestamp: i64,
    pub reachable: bool,
    pub connect_latency_ms: Option<u32>,
    pub access_level_is_open: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Nip66Aggregate {
    pub metric_count: u64,
    pub distinct_monitor_count: u64,
    pub mean_rtt_ms: Option<f64>,
    pub first_seen: Option<i64>,
    pub last_seen: Option<i64>,
    /// Derived only from monitors tracking >=20 relays; None when no
    /// qualifying monitor observed this relay.
    pub latency_percentile_score: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ReportStats {
    pub counts_by_type: HashMap<ReportType, u64>,
    pub weighted_counts_by_type: HashMap<ReportType, f64>,
}

/// Everything the scorer needs for one relay, assembled by the Store's
/// bulk read paths. A missing field means "insufficient data", which the
/// scorer treats with neutral defaults, never as zero.
#[derive(Debug, Clone, Default)]
pub struct AggregateBundle {
    pub probes: Vec<ProbeSample>,
    pub nip66: Option<Nip66Aggregate>,
    pub jurisdiction: Option<JurisdictionInfo>,
    pub operator_resolution: Option<OperatorResolution>,
    pub operator_trust: Option<OperatorTrust>,
    pub report_stats: Option<ReportStats>,
    pub has_metadata: bool,
    pub metadata_name: Option<String>,
    pub metadata_description: Option<String>,
    pub metadata_contact: Option<String>,
    pub metadata_software: Option<String>,
    pub metadata_version: Option<String>,
    pub has_limitation_block: bool,
    pub limitation_auth_required: bool,
    pub limitation_payment_required: bool,
    pub limitation_min_pow_difficulty: Option<u32>,
    pub limitation_max_message_length: Option<u64>,
    pub limitation_max_subscriptions: Option<u32>,
    pub limitation_max_filters: Option<u32>,
    pub fees_declared: bool,
    pub is_tls: bool,
    pub latest_access_level_open: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreBundle {
    pub reliability: u8,
    pub quality: u8,
    pub accessibility: u8,
    pub overall: u8,
    pub operator_trust: Option<u8>,
    pub confidence: ConfidenceLabel,
}

pub const RELIABILITY_WEIGHTS: [f64; 4] = [0.40, 0.20, 0.20, 0.20];
pub const QUALITY_WEIGHTS: [f64; 3] = [0.60, 0.25, 0.15];
pub const ACCESSIBILITY_WEIGHTS: [f64; 4] = [0.40, 0.20, 0.20, 0.20];
pub const OVERALL_WEIGHTS: [f64; 3] = [0.40, 0.35, 0.25];

pub fn clamp_round(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

/// Weighted observation count -> confidence label. The `(1 + min(1,
/// months) * 0)` factor is preserved verbatim from the authoritative
/// formula even though it is always 1; it documents that the term was
/// considered and deliberately zeroed, not omitted.
pub fn weighted_observation_count(
    probe_count: u64,
    nip66: Option<&Nip66Aggregate>,
) -> f64 {
    let probe_count = probe_count as f64;
    let Some(nip66) = nip66 else {
        return probe_count;
    };

    let days = nip66
        .first_seen
        .zip(nip66.last_seen)
        .map(|(first, last)| ((last - first).max(0) as f64) / 86400.0)
        .unwrap_or(0.0);
    let months = days / 30.0;
    let monitors = nip66.distinct_monitor_count.max(1) as f64;

    let monthly_factor = 1.0 + months.min(1.0) * 0.0;
    let monitor_factor = 1.0 + monitors / 10.0;
    let days_factor = 1.0 + days.min(30.0) / 30.0;

    probe_count + nip66.metric_count as f64 * monthly_factor * monitor_factor * days_factor
}

pub fn confidence_label(wobs: f64) -> ConfidenceLabel {
    if wobs >= 500.0 {
        ConfidenceLabel::High
    } else if wobs >= 100.0 {
        ConfidenceLabel::Medium
    } else {
        ConfidenceLabel::Low
    }
}

/// Compute the full score bundle for one relay. Pure: `now` is the only
/// time input, and every intermediate score is clamped to `[0, 100]`.
pub fn score_relay(bundle: &AggregateBundle, probe_count: u64, now: i64) -> ScoreBundle {
    let reliability = reliability_score(bundle, now);
    let quality = quality_score(bundle);
    let accessibility = accessibility_score(bundle);

    let overall = clamp_round(
        OVERALL_WEIGHTS[0] * reliability as f64
            + OVERALL_WEIGHTS[1] * quality as f64
            + OVERALL_WEIGHTS[2] * accessibility as f64,
    );

    let operator_trust_component = bundle.operator_trust.as_ref().map(|t| t.score);

    let wobs = weighted_observation_count(probe_count, bundle.nip66.as_ref());
    let confidence = confidence_label(wobs);

    ScoreBundle {
        reliability,
        quality,
        accessibility,
        overall,
        operator_trust: operator_trust_component,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_sums_equal_one() {
        assert!((RELIABILITY_WEIGHTS.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!((QUALITY_WEIGHTS.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!((ACCESSIBILITY_WEIGHTS.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!((OVERALL_WEIGHTS.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn clamp_round_stays_in_bounds() {
        assert_eq!(clamp_round(-5.0), 0);
        assert_eq!(clamp_round(105.0), 100);
        assert_eq!(clamp_round(72.4), 72);
        assert_eq!(clamp_round(72.6), 73);
    }

    #[test]
    fn confidence_label_thresholds() {
        assert_eq!(confidence_label(0.0), ConfidenceLabel::Low);
        assert_eq!(confidence_label(99.9), ConfidenceLabel::Low);
        assert_eq!(confidence_label(100.0), ConfidenceLabel::Medium);
        assert_eq!(confidence_label(499.9), ConfidenceLabel::Medium);
        assert_eq!(confidence_label(500.0), ConfidenceLabel::High);
    }

    /// Fresh relay, single fast open probe, rich metadata, no monitor or
    /// report data: every component should land in its "good" range and
    /// confidence should be low (one observation only).
    #[test]
    fn fresh_open_relay_scores_high_with_low_confidence() {
        let now = 1_700_000_000;
        let bundle = AggregateBundle {
            probes: vec![ProbeSample {
                timestamp: now,
                reachable: true,
                connect_latency_ms: Some(45),
                access_level_is_open: true,
            }],
            has_metadata: true,
            metadata_name: Some("relay".into()),
            metadata_description: Some("a relay".into()),
            metadata_contact: Some("admin@example.com".into()),
            metadata_software: Some("my-relay".into()),
            has_limitation_block: true,
            is_tls: true,
            latest_access_level_open: Some(true),
            ..Default::default()
        };

        let scores = score_relay(&bundle, 1, now);
        assert!(scores.reliability >= 85, "reliability was {}", scores.reliability);
        assert!(scores.quality >= 85, "quality was {}", scores.quality);
        assert!(scores.overall >= 60, "overall was {}", scores.overall);
        assert_eq!(scores.confidence, ConfidenceLabel::Low);
    }

    /// 30 probes at 1-hour cadence, the last 4 unreachable: reliability
    /// must come in strictly below a relay with identical latencies but
    /// no outage.
    #[test]
    fn outage_then_recovery_depresses_reliability_below_always_up() {
        let now = 1_700_000_000;
        let hour = 3600;

        let mut degraded_probes = Vec::new();
        for i in 0..30 {
            let timestamp = now - (29 - i) * hour;
            let reachable = i < 26;
            degraded_probes.push(ProbeSample {
                timestamp,
                reachable,
                connect_latency_ms: if reachable { Some(80) } else { None },
                access_level_is_open: true,
            });
        }
        let degraded = AggregateBundle {
            probes: degraded_probes,
            ..Default::default()
        };

        let healthy_probes: Vec<ProbeSample> = (0..30)
            .map(|i| ProbeSample {
                timestamp: now - (29 - i) * hour,
                reachable: true,
                connect_latency_ms: Some(80),
                access_level_is_open: true,
            })
            .collect();
        let healthy = AggregateBundle {
            probes: healthy_probes,
            ..Default::default()
        };

        let degraded_scores = score_relay(&degraded, 30, now);
        let healthy_scores = score_relay(&healthy, 30, now);
        assert!(
            degraded_scores.reliability < healthy_scores.reliability,
            "degraded={} healthy={}",
            degraded_scores.reliability,
            healthy_scores.reliability
        );
    }
}
