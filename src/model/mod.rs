//! Data model: the entities named in the relay trust data model, plus the
//! `RelayUrl` newtype that makes canonicalization a structural guarantee
//! rather than a convention callers must remember.

mod url;

pub use url::{RelayUrl, UrlError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detected capability shape of a relay, from metadata + probe behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelayKind {
    General,
    Specialized,
    RemoteSigner,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessLevel {
    Open,
    AuthRequired,
    PaymentRequired,
    Restricted,
    Unknown,
}

/// One probe's result. `(url, timestamp)` is the conceptual primary key;
/// the timestamp is the cycle start, never the instant the probe actually
/// ran, so storage order follows cycle monotonicity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeObservation {
    pub url: RelayUrl,
    pub timestamp: i64,
    pub reachable: bool,
    pub relay_kind: RelayKind,
    pub access_level: AccessLevel,
    pub closed_reason: Option<String>,
    pub connect_latency_ms: Option<u32>,
    pub read_latency_ms: Option<u32>,
    pub metadata_fetch_latency_ms: Option<u32>,
    pub metadata: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// A third-party monitor's observation of a relay, identified by the
/// external event id so re-delivery of the same event is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorMetric {
    pub event_id: String,
    pub url: RelayUrl,
    pub monitor_pubkey: String,
    pub timestamp: i64,
    pub rtt_open_ms: Option<u32>,
    pub rtt_read_ms: Option<u32>,
    pub rtt_write_ms: Option<u32>,
    pub network: Option<String>,
    pub capabilities: Vec<u32>,
    pub geohash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportType {
    Spam,
    Censorship,
    Unreliable,
    Malicious,
}

impl ReportType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "spam" => Some(Self::Spam),
            "censorship" => Some(Self::Censorship),
            "unreliable" => Some(Self::Unreliable),
            "malicious" => Some(Self::Malicious),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub event_id: String,
    pub url: RelayUrl,
    pub reporter_pubkey: String,
    pub report_type: ReportType,
    pub content: String,
    pub timestamp: i64,
    pub reporter_trust_weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerifiedVia {
    Claimed,
    Metadata,
    Dns,
    WellKnown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorResolution {
    pub url: RelayUrl,
    pub operator_pubkey: Option<String>,
    pub verified_via: Option<VerifiedVia>,
    pub confidence: u8,
    pub last_verified_at: i64,
    pub metadata_pubkey: Option<String>,
    pub dns_pubkey: Option<String>,
    pub well_known_pubkey: Option<String>,
    pub sources_disagree: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionInfo {
    pub url: RelayUrl,
    pub resolved_ip: Option<String>,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub isp: Option<String>,
    pub asn: Option<u32>,
    pub is_hosting: bool,
    pub is_tor: bool,
    pub resolved_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfidenceLabel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorTrust {
    pub operator_pubkey: String,
    pub score: u8,
    pub confidence: ConfidenceLabel,
    pub provider_count: u32,
    pub updated_at: i64,
}

impl OperatorTrust {
    pub fn is_stale(&self, now: i64) -> bool {
        now - self.updated_at > 24 * 3600
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub url: RelayUrl,
    pub timestamp: i64,
    pub overall: u8,
    pub reliability: u8,
    pub quality: u8,
    pub accessibility: u8,
    pub operator_trust: Option<u8>,
    pub confidence: ConfidenceLabel,
    pub observation_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedAssertion {
    pub url: RelayUrl,
    pub last_event_id: String,
    pub last_score: u8,
    pub last_confidence: ConfidenceLabel,
    pub last_observation_count: u64,
    pub published_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedMonitor {
    pub pubkey: String,
    pub added_at: i64,
    pub last_seen: i64,
    pub event_count: u64,
}

/// The raw, shape-validated shell of an inbound event, before it is
/// interpreted as a `MonitorMetric` or `Report`. Kept distinct from
/// `serde_json::Value` so downstream code never touches dynamic JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNostrEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl RawNostrEvent {
    /// Shape validation per the monitor/report ingest contract: hex
    /// lengths, a sane creation-time range, and array-of-string tags
    /// (already guaranteed by this struct's type once deserialized).
    pub fn is_shape_valid(&self) -> bool {
        is_hex_of_len(&self.id, 64)
            && is_hex_of_len(&self.pubkey, 64)
            && is_hex_of_len(&self.sig, 128)
            && self.created_at >= 1_577_836_800 // 2020-01-01T00:00:00Z
            && self.created_at <= 4_102_444_800 // 2100-01-01T00:00:00Z
    }

    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(|s| s.as_str()) == Some(name))
            .and_then(|t| t.get(1))
            .map(|s| s.as_str())
    }
}

fn is_hex_of_len(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Timestamp helper used only at the service-loop boundary; nothing in
/// `scorer`, `assertion`, or the material-change gate may call this.
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

pub fn from_unix(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
