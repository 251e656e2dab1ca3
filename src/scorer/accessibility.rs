//! Accessibility = 0.40*Barriers + 0.20*Limits + 0.20*Jurisdiction + 0.20*Surveillance.

use super::{clamp_round, AggregateBundle, ACCESSIBILITY_WEIGHTS};

pub fn accessibility_score(bundle: &AggregateBundle) -> u8 {
    let barriers = barriers_score(bundle);
    let limits = limits_score(bundle);
    let jurisdiction = jurisdiction_score(bundle);
    let surveillance = surveillance_score(bundle);

    clamp_round(
        ACCESSIBILITY_WEIGHTS[0] * barriers
            + ACCESSIBILITY_WEIGHTS[1] * limits
            + ACCESSIBILITY_WEIGHTS[2] * jurisdiction
            + ACCESSIBILITY_WEIGHTS[3] * surveillance,
    )
}

fn barriers_score(bundle: &AggregateBundle) -> f64 {
    let mut score: f64 = 100.0;

    if bundle.limitation_auth_required || bundle.latest_access_level_open == Some(false) {
        score -= 30.0;
    }
    if bundle.limitation_payment_required {
        score -= 50.0;
    }
    if let Some(pow) = bundle.limitation_min_pow_difficulty {
        if pow > 0 {
            score -= 20.0 * (pow as f64 / 30.0).min(1.0);
        }
    }

    score.clamp(0.0, 100.0)
}

fn limits_score(bundle: &AggregateBundle) -> f64 {
    let mut score: f64 = 50.0;

    score += match bundle.limitation_max_message_length {
        Some(len) if len >= 256 * 1024 => 20.0,
        Some(len) if len >= 64 * 1024 => 10.0,
        _ => 0.0,
    };
    score += match bundle.limitation_max_subscriptions {
        Some(n) if n >= 20 => 15.0,
        Some(n) if n >= 10 => 7.0,
        _ => 0.0,
    };
    score += match bundle.limitation_max_filters {
        Some(n) if n >= 10 => 15.0,
        Some(n) if n >= 5 => 7.0,
        _ => 0.0,
    };

    score.clamp(0.0, 100.0)
}

fn jurisdiction_score(bundle: &AggregateBundle) -> f64 {
    let Some(info) = bundle.jurisdiction.as_ref() else {
        return 60.0; // unknown: treat as partly-free, neutral
    };
    if info.is_tor {
        return 100.0;
    }
    match info.country_code.as_deref() {
        Some(cc) => match freedom_category(cc) {
            FreedomCategory::Free => 100.0,
            FreedomCategory::PartlyFree => 60.0,
            FreedomCategory::NotFree => 20.0,
        },
        None => 60.0,
    }
}

fn surveillance_score(bundle: &AggregateBundle) -> f64 {
    let Some(info) = bundle.jurisdiction.as_ref() else {
        return 50.0;
    };
    if info.is_tor {
        return 100.0;
    }
    match info.country_code.as_deref() {
        Some(cc) => match alliance_category(cc) {
            AllianceCategory::PrivacyFriendly => 100.0,
            AllianceCategory::NonAligned => 80.0,
            AllianceCategory::FourteenEyes => 40.0,
            AllianceCategory::NineEyes => 25.0,
            AllianceCategory::FiveEyes => 10.0,
            AllianceCategory::Unknown => 50.0,
        },
        None => 50.0,
    }
}

enum FreedomCategory {
    Free,
    PartlyFree,
    NotFree,
}

fn freedom_category(country_code: &str) -> FreedomCategory {
    const NOT_FREE: &[&str] = &["CN", "RU", "IR", "KP", "SY", "TM", "ER", "SA"];
    const FREE: &[&str] = &[
        "US", "CA", "GB", "DE", "FR", "NL", "SE", "NO", "DK", "FI", "CH", "AU", "NZ", "JP", "IE",
        "IS", "LU", "AT", "BE", "PT", "ES", "IT", "CZ", "EE", "LT", "LV", "SI", "SK", "PL",
    ];
    let upper = country_code.to_ascii_uppercase();
    if NOT_FREE.contains(&upper.as_str()) {
        FreedomCategory::NotFree
    } else if FREE.contains(&upper.as_str()) {
        FreedomCategory::Free
    } else {
        FreedomCategory::PartlyFree
    }
}

enum AllianceCategory {
    PrivacyFriendly,
    NonAligned,
    FourteenEyes,
    NineEyes,
    FiveEyes,
    Unknown,
}

fn alliance_category(country_code: &str) -> AllianceCategory {
    const FIVE_EYES: &[&str] = &["US", "GB", "CA", "AU", "NZ"];
    const NINE_EYES: &[&str] = &["DK", "FR", "NL", "NO"];
    const FOURTEEN_EYES: &[&str] = &["DE", "BE", "IT", "ES", "SE"];
    const PRIVACY_FRIENDLY: &[&str] = &["CH", "IS"];

    let upper = country_code.to_ascii_uppercase();
    if FIVE_EYES.contains(&upper.as_str()) {
        AllianceCategory::FiveEyes
    } else if NINE_EYES.contains(&upper.as_str()) {
        AllianceCategory::NineEyes
    } else if FOURTEEN_EYES.contains(&upper.as_str()) {
        AllianceCategory::FourteenEyes
    } else if PRIVACY_FRIENDLY.contains(&upper.as_str()) {
        AllianceCategory::PrivacyFriendly
    } else if upper.is_empty() {
        AllianceCategory::Unknown
    } else {
        AllianceCategory::NonAligned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barriers_penalize_payment_required() {
        let mut bundle = AggregateBundle::default();
        bundle.limitation_payment_required = true;
        assert_eq!(barriers_score(&bundle) as u32, 50);
    }

    #[test]
    fn limits_reward_generous_ceilings() {
        let mut bundle = AggregateBundle::default();
        bundle.limitation_max_message_length = Some(512 * 1024);
        bundle.limitation_max_subscriptions = Some(50);
        bundle.limitation_max_filters = Some(20);
        assert_eq!(limits_score(&bundle) as u32, 100);
    }

    #[test]
    fn unknown_jurisdiction_is_neutral() {
        let bundle = AggregateBundle::default();
        assert_eq!(jurisdiction_score(&bundle) as u32, 60);
        assert_eq!(surveillance_score(&bundle) as u32, 50);
    }
}
