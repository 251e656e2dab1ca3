//! Reliability = 0.40*Uptime + 0.20*Resilience + 0.20*Consistency + 0.20*Latency.

use super::{clamp_round, AggregateBundle, RELIABILITY_WEIGHTS};

const HALF_LIFE_DAYS: f64 = 3.0;
const FLAPPING_WINDOW_STATE_CHANGE_CAP: u32 = 3;

/// `w(t) = max(0.1, exp(-(now-t)/86400/3))`. Half-life 3 days, floor 0.1.
pub fn temporal_weight(t: i64, now: i64) -> f64 {
    let age_days = (now - t).max(0) as f64 / 86400.0;
    (-age_days / HALF_LIFE_DAYS).exp().max(0.1)
}

pub fn reliability_score(bundle: &AggregateBundle, now: i64) -> u8 {
    let uptime = uptime_score(bundle, now);
    let resilience = resilience_score(bundle, now);
    let consistency = consistency_score(bundle);
    let latency = latency_score(bundle);

    let raw = RELIABILITY_WEIGHTS[0] * uptime
        + RELIABILITY_WEIGHTS[1] * resilience
        + RELIABILITY_WEIGHTS[2] * consistency
        + RELIABILITY_WEIGHTS[3] * latency;

    let latest_reachable = bundle.probes.last().map(|p| p.reachable);
    if latest_reachable == Some(false) {
        let uptime_pct = uptime;
        let last_online_ts = bundle
            .probes
            .iter()
            .rev()
            .find(|p| p.reachable)
            .map(|p| p.timestamp);
        return clamp_round(offline_decay(uptime_pct, last_online_ts, now));
    }

    clamp_round(raw)
}

fn uptime_score(bundle: &AggregateBundle, now: i64) -> f64 {
    if bundle.probes.is_empty() {
        return if bundle.nip66.as_ref().map(|n| n.metric_count).unwrap_or(0) > 0 {
            95.0
        } else {
            50.0
        };
    }

    let mut weighted_reachable = 0.0;
    let mut weighted_total = 0.0;
    for probe in &bundle.probes {
        let w = temporal_weight(probe.timestamp, now);
        weighted_total += w;
        if probe.reachable {
            weighted_reachable += w;
        }
    }

    if weighted_total <= 0.0 {
        return 50.0;
    }
    (weighted_reachable / weighted_total) * 100.0
}

fn resilience_score(bundle: &AggregateBundle, now: i64) -> f64 {
    if bundle.probes.is_empty() {
        return 100.0;
    }

    let outage_severity = outage_severity_penalty(bundle, now);
    let frequency = frequency_penalty(bundle);
    let flapping = flapping_penalty(bundle);

    (100.0 - outage_severity - frequency - flapping).max(0.0)
}

/// Groups consecutive unreachable probes into runs, maps run length to a
/// point value, weights by recency of the run's end, caps the sum at 60.
fn outage_severity_penalty(bundle: &AggregateBundle, now: i64) -> f64 {
    let mut total = 0.0;
    let mut run_len = 0u32;
    let mut run_end_ts = 0i64;

    let mut flush = |run_len: u32, run_end_ts: i64, total: &mut f64| {
        if run_len == 0 {
            return;
        }
        let points = outage_points(run_len);
        *total += points * temporal_weight(run_end_ts, now);
    };

    for probe in &bundle.probes {
        if !probe.reachable {
            run_len += 1;
            run_end_ts = probe.timestamp;
        } else {
            flush(run_len, run_end_ts, &mut total);
            run_len = 0;
        }
    }
    flush(run_len, run_end_ts, &mut total);

    total.min(60.0)
}

fn outage_points(run_len: u32) -> f64 {
    match run_len {
        0..=1 => 2.0,
        2..=3 => 6.0,
        4..=6 => 15.0,
        7..=12 => 25.0,
        13..=24 => 40.0,
        _ => 60.0,
    }
}

fn frequency_penalty(bundle: &AggregateBundle) -> f64 {
    let mut distinct_outages = 0u32;
    let mut in_outage = false;
    for probe in &bundle.probes {
        if !probe.reachable {
            if !in_outage {
                distinct_outages += 1;
                in_outage = true;
            }
        } else {
            in_outage = false;
        }
    }
    (distinct_outages as f64 * 2.0).min(20.0)
}

/// Slides a 6-hour window across the probe stream and counts reachability
/// state changes; if the max in any window exceeds 3, penalize.
fn flapping_penalty(bundle: &AggregateBundle) -> f64 {
    let window_secs = 6 * 3600;
    let mut max_changes = 0u32;

    for i in 0..bundle.probes.len() {
        let window_start = bundle.probes[i].timestamp;
        let window_end = window_start + window_secs;
        let mut changes = 0u32;
        let mut prev_reachable: Option<bool> = None;
        for probe in &bundle.probes[i..] {
            if probe.timestamp > window_end {
                break;
            }
            if let Some(prev) = prev_reachable {
                if prev != probe.reachable {
                    changes += 1;
                }
            }
            prev_reachable = Some(probe.reachable);
        }
        max_changes = max_changes.max(changes);
    }

    if max_changes > FLAPPING_WINDOW_STATE_CHANGE_CAP {
        (max_changes as f64 * 3.0).min(15.0)
    } else {
        0.0
    }
}

fn consistency_score(bundle: &AggregateBundle) -> f64 {
    let mut latencies: Vec<f64> = bundle
        .probes
        .iter()
        .filter(|p| p.reachable)
        .filter_map(|p| p.connect_latency_ms)
        .map(|ms| ms as f64)
        .collect();

    if latencies.len() < 4 {
        return 70.0;
    }

    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let p25 = percentile(&latencies, 0.25);
    let p50 = percentile(&latencies, 0.50);
    let p75 = percentile(&latencies, 0.75);

    if p50 <= 0.0 {
        return 100.0;
    }

    (100.0 - 50.0 * (p75 - p25) / p50).clamp(0.0, 100.0)
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn latency_score(bundle: &AggregateBundle) -> f64 {
    if let Some(score) = bundle.nip66.as_ref().and_then(|n| n.latency_percentile_score) {
        return score.clamp(0.0, 100.0);
    }

    let probe_mean = mean_reachable_connect_latency(bundle);
    let monitor_mean = bundle.nip66.as_ref().and_then(|n| n.mean_rtt_ms);

    let fused = match (probe_mean, monitor_mean) {
        (Some(p), Some(m)) => Some(0.3 * p + 0.7 * m),
        (Some(p), None) => Some(p),
        (None, Some(m)) => Some(m),
        (None, None) => None,
    };

    match fused {
        None => 70.0, // insufficient data: neutral, never zero
        Some(ms) => tiered_latency_score(ms),
    }
}

fn mean_reachable_connect_latency(bundle: &AggregateBundle) -> Option<f64> {
    let samples: Vec<f64> = bundle
        .probes
        .iter()
        .filter(|p| p.reachable)
        .filter_map(|p| p.connect_latency_ms)
        .map(|ms| ms as f64)
        .collect();
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

fn tiered_latency_score(mean_rtt_ms: f64) -> f64 {
    if mean_rtt_ms <= 50.0 {
        100.0
    } else if mean_rtt_ms <= 100.0 {
        95.0
    } else if mean_rtt_ms <= 150.0 {
        90.0
    } else if mean_rtt_ms <= 200.0 {
        85.0
    } else if mean_rtt_ms <= 300.0 {
        75.0
    } else if mean_rtt_ms <= 500.0 {
        60.0
    } else if mean_rtt_ms <= 750.0 {
        40.0
    } else if mean_rtt_ms <= 1000.0 {
        20.0
    } else {
        0.0
    }
}

/// Cap at `min(50, uptime%)`; linearly decay to 20% of that cap over 30
/// days since `last_online_ts`. No `last_online_ts` decays fully (20% of
/// cap) immediately.
pub fn offline_decay(uptime_pct: f64, last_online_ts: Option<i64>, now: i64) -> f64 {
    let cap = uptime_pct.min(50.0).max(0.0);
    let elapsed_fraction = match last_online_ts {
        None => 1.0,
        Some(ts) => {
            let elapsed_days = (now - ts).max(0) as f64 / 86400.0;
            (elapsed_days / 30.0).min(1.0)
        }
    };
    cap * (1.0 - 0.8 * elapsed_fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::ProbeSample;

    #[test]
    fn temporal_weight_bounds() {
        let now = 1_700_000_000;
        assert_eq!(temporal_weight(now, now), 1.0);
        assert!(temporal_weight(now - 86400, now) < 1.0);
        assert!(temporal_weight(now - 86400, now) >= 0.1);
        assert!(temporal_weight(now - 86400 * 3650, now) >= 0.1);
        assert!(temporal_weight(now - 1, now) <= 1.0);
    }

    #[test]
    fn consistency_identical_latencies_is_100() {
        let now = 1_700_000_000;
        let probes: Vec<ProbeSample> = (0..5)
            .map(|i| ProbeSample {
                timestamp: now - i * 3600,
                reachable: true,
                connect_latency_ms: Some(50),
                access_level_is_open: true,
            })
            .collect();
        let bundle = AggregateBundle {
            probes,
            ..Default::default()
        };
        assert_eq!(consistency_score(&bundle) as u32, 100);
    }

    #[test]
    fn consistency_under_four_samples_is_neutral() {
        let now = 1_700_000_000;
        let probes: Vec<ProbeSample> = (0..2)
            .map(|i| ProbeSample {
                timestamp: now - i * 3600,
                reachable: true,
                connect_latency_ms: Some(50),
                access_level_is_open: true,
            })
            .collect();
        let bundle = AggregateBundle {
            probes,
            ..Default::default()
        };
        assert_eq!(consistency_score(&bundle) as u32, 70);
    }

    #[test]
    fn offline_decay_respects_bounds() {
        let now = 1_700_000_000;
        let uptime = 80.0; // cap becomes min(50, 80) = 50
        let fresh = offline_decay(uptime, Some(now), now);
        assert!((fresh - 50.0).abs() < 1e-9);

        let stale = offline_decay(uptime, Some(now - 31 * 86400), now);
        assert!((stale - 10.0).abs() < 1e-6); // 0.2 * 50

        let unknown = offline_decay(uptime, None, now);
        assert!((unknown - 10.0).abs() < 1e-6);
    }

    #[test]
    fn outage_run_mapping() {
        assert_eq!(outage_points(1) as u32, 2);
        assert_eq!(outage_points(3) as u32, 6);
        assert_eq!(outage_points(6) as u32, 15);
        assert_eq!(outage_points(12) as u32, 25);
        assert_eq!(outage_points(24) as u32, 40);
        assert_eq!(outage_points(25) as u32, 60);
    }
}
