//! Persistent evaluation store.
//!
//! A single process-wide handle to an embedded DuckDB database. Blocking
//! DuckDB calls are isolated behind `tokio::task::spawn_blocking` so the
//! async runtime stays responsive, the same way the teacher's prober
//! isolates blocking DNS resolution. The connection itself is guarded by
//! a plain `std::sync::Mutex`, held only for the duration of one blocking
//! closure and never across an `.await`.

mod schema;
mod trends;

pub use trends::{RollingAverage, ScoreTrend, TrendPoint};

use crate::error::{ServiceError, ServiceResult};
use crate::model::{
    AccessLevel, ConfidenceLabel, JurisdictionInfo, MonitorMetric, OperatorResolution,
    OperatorTrust, ProbeObservation, PublishedAssertion, RelayKind, RelayUrl, Report, ReportType,
    ScoreSnapshot, VerifiedVia,
};
use crate::scorer::{AggregateBundle, Nip66Aggregate, ProbeSample, ReportStats};
use duckdb::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> anyhow::Result<Connection> {
            let conn = Connection::open(&path)?;
            schema::run_migrations(&conn)?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs a blocking DuckDB closure on the blocking thread pool. The
    /// connection is guarded by a plain `std::sync::Mutex` rather than a
    /// tokio one: the lock is only ever held inside a blocking-pool
    /// thread, never across an `.await`.
    async fn with_conn<T, F>(&self, f: F) -> ServiceResult<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("store connection mutex poisoned");
            f(&guard)
        })
        .await;

        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ServiceError::StoreWriteFailed),
            Err(_) => Err(ServiceError::Cancelled),
        }
    }

    // ---- write API -----------------------------------------------------

    pub async fn insert_probe(&self, probe: &ProbeObservation) -> ServiceResult<()> {
        let probe = probe.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO probe_observations
                 (url, timestamp, reachable, relay_kind, access_level, closed_reason,
                  connect_latency_ms, read_latency_ms, metadata_fetch_latency_ms, metadata_json, error)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (url, timestamp) DO UPDATE SET
                    reachable = excluded.reachable,
                    relay_kind = excluded.relay_kind,
                    access_level = excluded.access_level,
                    closed_reason = excluded.closed_reason,
                    connect_latency_ms = excluded.connect_latency_ms,
                    read_latency_ms = excluded.read_latency_ms,
                    metadata_fetch_latency_ms = excluded.metadata_fetch_latency_ms,
                    metadata_json = excluded.metadata_json,
                    error = excluded.error",
                duckdb::params![
                    probe.url.as_str(),
                    probe.timestamp,
                    probe.reachable,
                    format!("{:?}", probe.relay_kind),
                    format!("{:?}", probe.access_level),
                    probe.closed_reason,
                    probe.connect_latency_ms,
                    probe.read_latency_ms,
                    probe.metadata_fetch_latency_ms,
                    probe.metadata.as_ref().map(|v| v.to_string()),
                    probe.error,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn insert_monitor_metric(&self, metric: &MonitorMetric) -> ServiceResult<()> {
        let metric = metric.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO monitor_metrics
                 (event_id, url, monitor_pubkey, timestamp, rtt_open_ms, rtt_read_ms, rtt_write_ms, network, capabilities, geohash)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (event_id) DO NOTHING",
                duckdb::params![
                    metric.event_id,
                    metric.url.as_str(),
                    metric.monitor_pubkey,
                    metric.timestamp,
                    metric.rtt_open_ms,
                    metric.rtt_read_ms,
                    metric.rtt_write_ms,
                    metric.network,
                    serde_json::to_string(&metric.capabilities).unwrap_or_default(),
                    metric.geohash,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Enforces `max_per_reporter_per_relay_per_day` and dedup-by-event-id.
    /// Returns `true` if the report was persisted, `false` if it was a
    /// duplicate or exceeded the per-day cap.
    pub async fn insert_report(
        &self,
        report: &Report,
        max_per_reporter_per_relay_per_day: u32,
    ) -> ServiceResult<bool> {
        let report = report.clone();
        self.with_conn(move |conn| {
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM reports WHERE event_id = ?",
                duckdb::params![report.event_id],
                |row| row.get(0),
            )?;
            if exists > 0 {
                return Ok(false);
            }

            let day_start = report.timestamp - (report.timestamp % 86400);
            let day_end = day_start + 86400;
            let count_today: i64 = conn.query_row(
                "SELECT COUNT(*) FROM reports WHERE reporter_pubkey = ? AND url = ? AND timestamp >= ? AND timestamp < ?",
                duckdb::params![report.reporter_pubkey, report.url.as_str(), day_start, day_end],
                |row| row.get(0),
            )?;
            if count_today as u32 >= max_per_reporter_per_relay_per_day {
                return Ok(false);
            }

            conn.execute(
                "INSERT INTO reports (event_id, url, reporter_pubkey, report_type, content, timestamp, reporter_trust_weight)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                duckdb::params![
                    report.event_id,
                    report.url.as_str(),
                    report.reporter_pubkey,
                    format!("{:?}", report.report_type),
                    report.content,
                    report.timestamp,
                    report.reporter_trust_weight,
                ],
            )?;
            Ok(true)
        })
        .await
    }

    pub async fn upsert_operator_resolution(&self, res: &OperatorResolution) -> ServiceResult<()> {
        let res = res.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO operator_resolutions
                 (url, operator_pubkey, verified_via, confidence, last_verified_at, metadata_pubkey, dns_pubkey, well_known_pubkey, sources_disagree)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (url) DO UPDATE SET
                    operator_pubkey = excluded.operator_pubkey,
                    verified_via = excluded.verified_via,
                    confidence = excluded.confidence,
                    last_verified_at = excluded.last_verified_at,
                    metadata_pubkey = excluded.metadata_pubkey,
                    dns_pubkey = excluded.dns_pubkey,
                    well_known_pubkey = excluded.well_known_pubkey,
                    sources_disagree = excluded.sources_disagree",
                duckdb::params![
                    res.url.as_str(),
                    res.operator_pubkey,
                    res.verified_via.map(|v| format!("{v:?}")),
                    res.confidence,
                    res.last_verified_at,
                    res.metadata_pubkey,
                    res.dns_pubkey,
                    res.well_known_pubkey,
                    res.sources_disagree,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_jurisdiction(&self, info: &JurisdictionInfo) -> ServiceResult<()> {
        let info = info.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO jurisdiction_info
                 (url, resolved_ip, country_code, country_name, region, city, isp, asn, is_hosting, is_tor, resolved_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (url) DO UPDATE SET
                    resolved_ip = excluded.resolved_ip,
                    country_code = excluded.country_code,
                    country_name = excluded.country_name,
                    region = excluded.region,
                    city = excluded.city,
                    isp = excluded.isp,
                    asn = excluded.asn,
                    is_hosting = excluded.is_hosting,
                    is_tor = excluded.is_tor,
                    resolved_at = excluded.resolved_at",
                duckdb::params![
                    info.url.as_str(),
                    info.resolved_ip,
                    info.country_code,
                    info.country_name,
                    info.region,
                    info.city,
                    info.isp,
                    info.asn,
                    info.is_hosting,
                    info.is_tor,
                    info.resolved_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_operator_trust(&self, trust: &OperatorTrust) -> ServiceResult<()> {
        let trust = trust.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO operator_trust (operator_pubkey, score, confidence, provider_count, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (operator_pubkey) DO UPDATE SET
                    score = excluded.score,
                    confidence = excluded.confidence,
                    provider_count = excluded.provider_count,
                    updated_at = excluded.updated_at",
                duckdb::params![
                    trust.operator_pubkey,
                    trust.score,
                    format!("{:?}", trust.confidence),
                    trust.provider_count,
                    trust.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn insert_score_snapshot(&self, snapshot: &ScoreSnapshot) -> ServiceResult<()> {
        let snapshot = snapshot.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO score_snapshots
                 (url, timestamp, overall, reliability, quality, accessibility, operator_trust, confidence, observation_count)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (url, timestamp) DO NOTHING",
                duckdb::params![
                    snapshot.url.as_str(),
                    snapshot.timestamp,
                    snapshot.overall,
                    snapshot.reliability,
                    snapshot.quality,
                    snapshot.accessibility,
                    snapshot.operator_trust,
                    format!("{:?}", snapshot.confidence),
                    snapshot.observation_count as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_published_assertion(&self, assertion: &PublishedAssertion) -> ServiceResult<()> {
        let assertion = assertion.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO published_assertions
                 (url, last_event_id, last_score, last_confidence, last_observation_count, published_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT (url) DO UPDATE SET
                    last_event_id = excluded.last_event_id,
                    last_score = excluded.last_score,
                    last_confidence = excluded.last_confidence,
                    last_observation_count = excluded.last_observation_count,
                    published_at = excluded.published_at",
                duckdb::params![
                    assertion.url.as_str(),
                    assertion.last_event_id,
                    assertion.last_score,
                    format!("{:?}", assertion.last_confidence),
                    assertion.last_observation_count as i64,
                    assertion.published_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    // ---- per-relay read API ---------------------------------------------

    pub async fn latest_published_assertion(
        &self,
        url: &RelayUrl,
    ) -> ServiceResult<Option<PublishedAssertion>> {
        let url = url.clone();
        self.with_conn(move |conn| {
            let result = conn.query_row(
                "SELECT last_event_id, last_score, last_confidence, last_observation_count, published_at
                 FROM published_assertions WHERE url = ?",
                duckdb::params![url.as_str()],
                |row| {
                    let confidence_str: String = row.get(2)?;
                    Ok(PublishedAssertion {
                        url: url.clone(),
                        last_event_id: row.get(0)?,
                        last_score: row.get(1)?,
                        last_confidence: parse_confidence(&confidence_str),
                        last_observation_count: row.get::<_, i64>(3)? as u64,
                        published_at: row.get(4)?,
                    })
                },
            );
            match result {
                Ok(assertion) => Ok(Some(assertion)),
                Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    pub async fn latest_score_snapshot(
        &self,
        url: &RelayUrl,
    ) -> ServiceResult<Option<ScoreSnapshot>> {
        let url = url.clone();
        self.with_conn(move |conn| {
            let result = conn.query_row(
                "SELECT timestamp, overall, reliability, quality, accessibility, operator_trust, confidence, observation_count
                 FROM score_snapshots WHERE url = ? ORDER BY timestamp DESC LIMIT 1",
                duckdb::params![url.as_str()],
                |row| row_to_snapshot(row, url.clone()),
            );
            match result {
                Ok(snapshot) => Ok(Some(snapshot)),
                Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// `days` is expected to already be validated to the 1-365 range by
    /// the API layer before this is called.
    pub async fn score_history(
        &self,
        url: &RelayUrl,
        days: u32,
        now: i64,
    ) -> ServiceResult<Vec<ScoreSnapshot>> {
        let url = url.clone();
        let since = now - days as i64 * 86400;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, overall, reliability, quality, accessibility, operator_trust, confidence, observation_count
                 FROM score_snapshots WHERE url = ? AND timestamp >= ? ORDER BY timestamp ASC",
            )?;
            let mut rows = stmt.query(duckdb::params![url.as_str(), since])?;
            let mut history = Vec::new();
            while let Some(row) = rows.next()? {
                history.push(row_to_snapshot(row, url.clone())?);
            }
            Ok(history)
        })
        .await
    }

    pub async fn latest_probe(&self, url: &RelayUrl) -> ServiceResult<Option<ProbeObservation>> {
        let url = url.clone();
        self.with_conn(move |conn| {
            let result = conn.query_row(
                "SELECT timestamp, reachable, relay_kind, access_level, closed_reason,
                        connect_latency_ms, read_latency_ms, metadata_fetch_latency_ms, metadata_json, error
                 FROM probe_observations WHERE url = ? ORDER BY timestamp DESC LIMIT 1",
                duckdb::params![url.as_str()],
                |row| {
                    let relay_kind_str: String = row.get(2)?;
                    let access_level_str: String = row.get(3)?;
                    let metadata_json: Option<String> = row.get(8)?;
                    Ok(ProbeObservation {
                        url: url.clone(),
                        timestamp: row.get(0)?,
                        reachable: row.get(1)?,
                        relay_kind: parse_relay_kind(&relay_kind_str),
                        access_level: parse_access_level(&access_level_str),
                        closed_reason: row.get(4)?,
                        connect_latency_ms: row.get(5)?,
                        read_latency_ms: row.get(6)?,
                        metadata_fetch_latency_ms: row.get(7)?,
                        metadata: metadata_json.and_then(|s| serde_json::from_str(&s).ok()),
                        error: row.get(9)?,
                    })
                },
            );
            match result {
                Ok(probe) => Ok(Some(probe)),
                Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// One row per url: its most recent `score_snapshots` entry. Backs
    /// `/api/relays`, `/api/rankings`, and `/api/stats`.
    pub async fn all_latest_scores(&self) -> ServiceResult<Vec<ScoreSnapshot>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "WITH ranked AS (
                    SELECT url, timestamp, overall, reliability, quality, accessibility,
                           operator_trust, confidence, observation_count,
                           ROW_NUMBER() OVER (PARTITION BY url ORDER BY timestamp DESC) AS rn
                    FROM score_snapshots
                 )
                 SELECT url, timestamp, overall, reliability, quality, accessibility, operator_trust, confidence, observation_count
                 FROM ranked WHERE rn = 1",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let url_str: String = row.get(0)?;
                let url = RelayUrl::parse(&url_str)
                    .map_err(|e| anyhow::anyhow!("stored score snapshot url invalid: {e}"))?;
                let confidence_str: String = row.get(7)?;
                out.push(ScoreSnapshot {
                    url,
                    timestamp: row.get(1)?,
                    overall: row.get(2)?,
                    reliability: row.get(3)?,
                    quality: row.get(4)?,
                    accessibility: row.get(5)?,
                    operator_trust: row.get(6)?,
                    confidence: parse_confidence(&confidence_str),
                    observation_count: row.get::<_, i64>(8)? as u64,
                });
            }
            Ok(out)
        })
        .await
    }

    pub async fn jurisdiction_for(&self, url: &RelayUrl) -> ServiceResult<Option<JurisdictionInfo>> {
        let url = url.clone();
        self.with_conn(move |conn| {
            let result = conn.query_row(
                "SELECT resolved_ip, country_code, country_name, region, city, isp, asn, is_hosting, is_tor, resolved_at
                 FROM jurisdiction_info WHERE url = ?",
                duckdb::params![url.as_str()],
                |row| {
                    Ok(JurisdictionInfo {
                        url: url.clone(),
                        resolved_ip: row.get(0)?,
                        country_code: row.get(1)?,
                        country_name: row.get(2)?,
                        region: row.get(3)?,
                        city: row.get(4)?,
                        isp: row.get(5)?,
                        asn: row.get(6)?,
                        is_hosting: row.get(7)?,
                        is_tor: row.get(8)?,
                        resolved_at: row.get(9)?,
                    })
                },
            );
            match result {
                Ok(info) => Ok(Some(info)),
                Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    pub async fn operator_resolution_for(
        &self,
        url: &RelayUrl,
    ) -> ServiceResult<Option<OperatorResolution>> {
        let url = url.clone();
        self.with_conn(move |conn| {
            let result = conn.query_row(
                "SELECT operator_pubkey, verified_via, confidence, last_verified_at, metadata_pubkey, dns_pubkey, well_known_pubkey, sources_disagree
                 FROM operator_resolutions WHERE url = ?",
                duckdb::params![url.as_str()],
                |row| {
                    let verified_via_str: Option<String> = row.get(1)?;
                    Ok(OperatorResolution {
                        url: url.clone(),
                        operator_pubkey: row.get(0)?,
                        verified_via: verified_via_str.as_deref().map(parse_verified_via),
                        confidence: row.get(2)?,
                        last_verified_at: row.get(3)?,
                        metadata_pubkey: row.get(4)?,
                        dns_pubkey: row.get(5)?,
                        well_known_pubkey: row.get(6)?,
                        sources_disagree: row.get(7)?,
                    })
                },
            );
            match result {
                Ok(res) => Ok(Some(res)),
                Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    // ---- bulk read API ---------------------------------------------------

    /// `allProbes(window)` reduced into exactly what the scorer needs,
    /// grouped by url, in timestamp order.
    pub async fn all_probes_for_scoring(
        &self,
        window_secs: i64,
        now: i64,
    ) -> ServiceResult<HashMap<String, Vec<ProbeSample>>> {
        let since = now - window_secs;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT url, timestamp, reachable, connect_latency_ms, access_level
                 FROM probe_observations
                 WHERE timestamp >= ?
                 ORDER BY url, timestamp ASC",
            )?;
            let mut rows = stmt.query(duckdb::params![since])?;
            let mut map: HashMap<String, Vec<ProbeSample>> = HashMap::new();
            while let Some(row) = rows.next()? {
                let url: String = row.get(0)?;
                let access_level: String = row.get(4)?;
                let sample = ProbeSample {
                    timestamp: row.get(1)?,
                    reachable: row.get(2)?,
                    connect_latency_ms: row.get(3)?,
                    access_level_is_open: access_level == "Open",
                };
                map.entry(url).or_default().push(sample);
            }
            Ok(map)
        })
        .await
    }

    /// `nip66Aggregates(window)`: per-relay metric-count, distinct-monitor
    /// count, mean RTT, first/last seen. The percentile-based latency
    /// score is computed separately in `nip66_latency_percentiles` since
    /// it requires per-monitor normalization across all relays that
    /// monitor observed, not a single-relay GROUP BY.
    pub async fn nip66_aggregates(
        &self,
        window_secs: i64,
        now: i64,
    ) -> ServiceResult<HashMap<String, Nip66Aggregate>> {
        let since = now - window_secs;
        let percentiles = self.nip66_latency_percentiles(window_secs, now).await?;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT url,
                        COUNT(*) AS metric_count,
                        COUNT(DISTINCT monitor_pubkey) AS distinct_monitors,
                        AVG(rtt_open_ms) AS mean_rtt,
                        MIN(timestamp) AS first_seen,
                        MAX(timestamp) AS last_seen
                 FROM monitor_metrics
                 WHERE timestamp >= ?
                 GROUP BY url",
            )?;
            let mut rows = stmt.query(duckdb::params![since])?;
            let mut map: HashMap<String, Nip66Aggregate> = HashMap::new();
            while let Some(row) = rows.next()? {
                let url: String = row.get(0)?;
                let aggregate = Nip66Aggregate {
                    metric_count: row.get::<_, i64>(1)? as u64,
                    distinct_monitor_count: row.get::<_, i64>(2)? as u64,
                    mean_rtt_ms: row.get(3)?,
                    first_seen: row.get(4)?,
                    last_seen: row.get(5)?,
                    latency_percentile_score: percentiles.get(&url).copied(),
                };
                map.insert(url, aggregate);
            }
            Ok(map)
        })
        .await
    }

    /// Per-monitor percentile rank: for each qualifying monitor (>=20
    /// distinct relays tracked in the window), compute the fraction of
    /// that monitor's observed relays with a higher RTT than this relay,
    /// then average across qualifying monitors. Expressed as a DuckDB
    /// window query over `PERCENT_RANK`.
    async fn nip66_latency_percentiles(
        &self,
        window_secs: i64,
        now: i64,
    ) -> ServiceResult<HashMap<String, f64>> {
        let since = now - window_secs;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "WITH per_monitor_relay AS (
                    SELECT monitor_pubkey, url, AVG(rtt_open_ms) AS mean_rtt
                    FROM monitor_metrics
                    WHERE timestamp >= ? AND rtt_open_ms IS NOT NULL
                    GROUP BY monitor_pubkey, url
                 ),
                 qualifying_monitors AS (
                    SELECT monitor_pubkey
                    FROM per_monitor_relay
                    GROUP BY monitor_pubkey
                    HAVING COUNT(DISTINCT url) >= 20
                 ),
                 ranked AS (
                    SELECT p.url,
                           p.monitor_pubkey,
                           PERCENT_RANK() OVER (PARTITION BY p.monitor_pubkey ORDER BY p.mean_rtt DESC) AS pct_rank
                    FROM per_monitor_relay p
                    INNER JOIN qualifying_monitors q ON p.monitor_pubkey = q.monitor_pubkey
                 )
                 SELECT url, AVG(pct_rank) * 100.0 AS latency_percentile_score
                 FROM ranked
                 GROUP BY url",
            )?;
            let mut rows = stmt.query(duckdb::params![since])?;
            let mut map = HashMap::new();
            while let Some(row) = rows.next()? {
                let url: String = row.get(0)?;
                let score: f64 = row.get(1)?;
                map.insert(url, score);
            }
            Ok(map)
        })
        .await
    }

    pub async fn all_jurisdictions(&self) -> ServiceResult<HashMap<String, JurisdictionInfo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT url, resolved_ip, country_code, country_name, region, city, isp, asn, is_hosting, is_tor, resolved_at
                 FROM jurisdiction_info",
            )?;
            let mut rows = stmt.query([])?;
            let mut map = HashMap::new();
            while let Some(row) = rows.next()? {
                let url_str: String = row.get(0)?;
                let info = JurisdictionInfo {
                    url: RelayUrl::parse(&url_str)
                        .map_err(|e| anyhow::anyhow!("stored jurisdiction url invalid: {e}"))?,
                    resolved_ip: row.get(1)?,
                    country_code: row.get(2)?,
                    country_name: row.get(3)?,
                    region: row.get(4)?,
                    city: row.get(5)?,
                    isp: row.get(6)?,
                    asn: row.get(7)?,
                    is_hosting: row.get(8)?,
                    is_tor: row.get(9)?,
                    resolved_at: row.get(10)?,
                };
                map.insert(url_str, info);
            }
            Ok(map)
        })
        .await
    }

    pub async fn all_operator_resolutions(
        &self,
    ) -> ServiceResult<HashMap<String, OperatorResolution>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT url, operator_pubkey, verified_via, confidence, last_verified_at,
                        metadata_pubkey, dns_pubkey, well_known_pubkey, sources_disagree
                 FROM operator_resolutions",
            )?;
            let mut rows = stmt.query([])?;
            let mut map = HashMap::new();
            while let Some(row) = rows.next()? {
                let url_str: String = row.get(0)?;
                let verified_via: Option<String> = row.get(2)?;
                let resolution = OperatorResolution {
                    url: RelayUrl::parse(&url_str)
                        .map_err(|e| anyhow::anyhow!("stored operator resolution url invalid: {e}"))?,
                    operator_pubkey: row.get(1)?,
                    verified_via: verified_via.as_deref().map(parse_verified_via),
                    confidence: row.get(3)?,
                    last_verified_at: row.get(4)?,
                    metadata_pubkey: row.get(5)?,
                    dns_pubkey: row.get(6)?,
                    well_known_pubkey: row.get(7)?,
                    sources_disagree: row.get(8)?,
                };
                map.insert(url_str, resolution);
            }
            Ok(map)
        })
        .await
    }

    pub async fn all_report_stats(
        &self,
        window_secs: i64,
        now: i64,
    ) -> ServiceResult<HashMap<String, ReportStats>> {
        let since = now - window_secs;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT url, report_type, COUNT(*), SUM(reporter_trust_weight)
                 FROM reports
                 WHERE timestamp >= ?
                 GROUP BY url, report_type",
            )?;
            let mut rows = stmt.query(duckdb::params![since])?;
            let mut map: HashMap<String, ReportStats> = HashMap::new();
            while let Some(row) = rows.next()? {
                let url: String = row.get(0)?;
                let report_type_str: String = row.get(1)?;
                let count: i64 = row.get(2)?;
                let weighted: f64 = row.get(3)?;
                if let Some(report_type) = parse_report_type(&report_type_str) {
                    let entry = map.entry(url).or_default();
                    entry.counts_by_type.insert(report_type, count as u64);
                    entry.weighted_counts_by_type.insert(report_type, weighted);
                }
            }
            Ok(map)
        })
        .await
    }

    pub async fn all_score_trends(
        &self,
        preferred_window_secs: i64,
        now: i64,
    ) -> ServiceResult<HashMap<String, ScoreTrend>> {
        self.with_conn(move |conn| trends::score_trends(conn, preferred_window_secs, now))
            .await
    }

    pub async fn all_rolling_averages(
        &self,
        window_days: u32,
        now: i64,
    ) -> ServiceResult<HashMap<String, RollingAverage>> {
        self.with_conn(move |conn| trends::rolling_averages(conn, window_days, now))
            .await
    }

    pub async fn all_trend_data(
        &self,
        window_secs: i64,
        now: i64,
    ) -> ServiceResult<HashMap<String, TrendPoint>> {
        self.with_conn(move |conn| trends::trend_data(conn, window_secs, now))
            .await
    }

    /// Retention: purges append-only entities older than the cutoff.
    /// Returns per-table delete counts.
    pub async fn cleanup(&self, retention_days: u32) -> ServiceResult<HashMap<String, u64>> {
        self.with_conn(move |conn| {
            let cutoff = chrono::Utc::now().timestamp() - retention_days as i64 * 86400;
            let mut counts = HashMap::new();
            for table in ["probe_observations", "monitor_metrics", "reports", "score_snapshots"] {
                let deleted = conn.execute(
                    &format!("DELETE FROM {table} WHERE timestamp < ?"),
                    duckdb::params![cutoff],
                )?;
                counts.insert(table.to_string(), deleted as u64);
            }
            Ok(counts)
        })
        .await
    }

    pub async fn checkpoint(&self) -> ServiceResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch("CHECKPOINT")?;
            Ok(())
        })
        .await
    }

    /// Last time the named at-most-once-per-interval cycle task ran, if
    /// it ever has.
    pub async fn latest_checkpoint_marker(&self, name: &str) -> ServiceResult<Option<i64>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let result = conn.query_row(
                "SELECT last_run_at FROM service_markers WHERE name = ?",
                duckdb::params![name],
                |row| row.get(0),
            );
            match result {
                Ok(ts) => Ok(Some(ts)),
                Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    pub async fn record_checkpoint_marker(&self, name: &str, now: i64) -> ServiceResult<()> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO service_markers (name, last_run_at) VALUES (?, ?)
                 ON CONFLICT (name) DO UPDATE SET last_run_at = excluded.last_run_at",
                duckdb::params![name, now],
            )?;
            Ok(())
        })
        .await
    }

    /// Builds the per-relay aggregate bundle the scorer needs, fetching
    /// every bulk path in one pass per cycle rather than per relay.
    pub async fn build_aggregate_bundles(
        &self,
        window_secs: i64,
        now: i64,
    ) -> ServiceResult<HashMap<String, AggregateBundle>> {
        let probes = self.all_probes_for_scoring(window_secs, now).await?;
        let nip66 = self.nip66_aggregates(window_secs, now).await?;
        let jurisdictions = self.all_jurisdictions().await?;
        let resolutions = self.all_operator_resolutions().await?;
        let report_stats = self.all_report_stats(window_secs, now).await?;
        let trust_by_pubkey = self.all_operator_trust().await?;
        let metadata = self.latest_metadata_for_all().await?;
        let access_levels = self.latest_access_level_for_all().await?;

        let mut urls: std::collections::HashSet<String> = std::collections::HashSet::new();
        urls.extend(probes.keys().cloned());
        urls.extend(nip66.keys().cloned());
        urls.extend(jurisdictions.keys().cloned());
        urls.extend(resolutions.keys().cloned());
        urls.extend(metadata.keys().cloned());

        let mut bundles = HashMap::new();
        for url in urls {
            let resolution = resolutions.get(&url).cloned();
            let operator_trust = resolution
                .as_ref()
                .and_then(|r| r.operator_pubkey.as_ref())
                .and_then(|pubkey| trust_by_pubkey.get(pubkey).cloned());
            let is_tls = RelayUrl::parse(&url).map(|u| u.is_tls()).unwrap_or(false);
            let mut bundle = AggregateBundle {
                probes: probes.get(&url).cloned().unwrap_or_default(),
                nip66: nip66.get(&url).cloned(),
                jurisdiction: jurisdictions.get(&url).cloned(),
                operator_resolution: resolution,
                operator_trust,
                report_stats: report_stats.get(&url).cloned(),
                is_tls,
                latest_access_level_open: access_levels.get(&url).copied(),
                ..Default::default()
            };
            if let Some(doc) = metadata.get(&url) {
                apply_nip11_metadata(&mut bundle, doc);
            }
            bundles.insert(url, bundle);
        }
        Ok(bundles)
    }

    /// Whether the most recent probe of each relay saw `access_level ==
    /// Open`, independent of the scoring window used for reliability
    /// aggregates.
    pub async fn latest_access_level_for_all(&self) -> ServiceResult<HashMap<String, bool>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "WITH ranked AS (
                    SELECT url, access_level,
                           ROW_NUMBER() OVER (PARTITION BY url ORDER BY timestamp DESC) AS rn
                    FROM probe_observations
                 )
                 SELECT url, access_level FROM ranked WHERE rn = 1",
            )?;
            let mut rows = stmt.query([])?;
            let mut map = HashMap::new();
            while let Some(row) = rows.next()? {
                let url: String = row.get(0)?;
                let access_level: String = row.get(1)?;
                map.insert(url, access_level == "Open");
            }
            Ok(map)
        })
        .await
    }

    /// Most recent non-null NIP-11 metadata document per relay, across all
    /// recorded probes (not windowed: operator identity and declared
    /// policy change rarely and are worth remembering past the scoring
    /// window).
    pub async fn latest_metadata_for_all(
        &self,
    ) -> ServiceResult<HashMap<String, serde_json::Value>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "WITH ranked AS (
                    SELECT url, metadata_json,
                           ROW_NUMBER() OVER (PARTITION BY url ORDER BY timestamp DESC) AS rn
                    FROM probe_observations
                    WHERE metadata_json IS NOT NULL
                 )
                 SELECT url, metadata_json FROM ranked WHERE rn = 1",
            )?;
            let mut rows = stmt.query([])?;
            let mut map = HashMap::new();
            while let Some(row) = rows.next()? {
                let url: String = row.get(0)?;
                let raw: String = row.get(1)?;
                if let Ok(value) = serde_json::from_str(&raw) {
                    map.insert(url, value);
                }
            }
            Ok(map)
        })
        .await
    }

    /// Distinct operator pubkeys (from resolved relays) whose trust score
    /// is missing or older than 24h, per `OperatorTrust::is_stale`.
    pub async fn stale_or_missing_operator_pubkeys(&self, now: i64) -> ServiceResult<Vec<String>> {
        let resolutions = self.all_operator_resolutions().await?;
        let trust = self.all_operator_trust().await?;

        let mut pubkeys: std::collections::HashSet<String> = std::collections::HashSet::new();
        for resolution in resolutions.values() {
            if let Some(pubkey) = &resolution.operator_pubkey {
                pubkeys.insert(pubkey.clone());
            }
        }

        Ok(pubkeys
            .into_iter()
            .filter(|pubkey| match trust.get(pubkey) {
                Some(existing) => existing.is_stale(now),
                None => true,
            })
            .collect())
    }

    pub async fn all_operator_trust(&self) -> ServiceResult<HashMap<String, OperatorTrust>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT operator_pubkey, score, confidence, provider_count, updated_at FROM operator_trust",
            )?;
            let mut rows = stmt.query([])?;
            let mut map = HashMap::new();
            while let Some(row) = rows.next()? {
                let pubkey: String = row.get(0)?;
                let confidence_str: String = row.get(2)?;
                map.insert(
                    pubkey.clone(),
                    OperatorTrust {
                        operator_pubkey: pubkey,
                        score: row.get(1)?,
                        confidence: parse_confidence(&confidence_str),
                        provider_count: row.get(3)?,
                        updated_at: row.get(4)?,
                    },
                );
            }
            Ok(map)
        })
        .await
    }
}

fn row_to_snapshot(row: &duckdb::Row, url: RelayUrl) -> duckdb::Result<ScoreSnapshot> {
    let confidence_str: String = row.get(7)?;
    Ok(ScoreSnapshot {
        url,
        timestamp: row.get(0)?,
        overall: row.get(1)?,
        reliability: row.get(2)?,
        quality: row.get(3)?,
        accessibility: row.get(4)?,
        operator_trust: row.get(5)?,
        confidence: parse_confidence(&confidence_str),
        observation_count: row.get::<_, i64>(8)? as u64,
    })
}

fn parse_relay_kind(s: &str) -> RelayKind {
    match s {
        "General" => RelayKind::General,
        "Specialized" => RelayKind::Specialized,
        "RemoteSigner" => RelayKind::RemoteSigner,
        _ => RelayKind::Unknown,
    }
}

fn parse_access_level(s: &str) -> AccessLevel {
    match s {
        "Open" => AccessLevel::Open,
        "AuthRequired" => AccessLevel::AuthRequired,
        "PaymentRequired" => AccessLevel::PaymentRequired,
        "Restricted" => AccessLevel::Restricted,
        _ => AccessLevel::Unknown,
    }
}

/// Folds a relay's NIP-11 document into the scorer's flattened metadata
/// fields. Unknown/missing keys simply leave the corresponding bundle
/// field `None`/`false`, which the scorer treats as absent evidence.
fn apply_nip11_metadata(bundle: &mut AggregateBundle, doc: &serde_json::Value) {
    bundle.has_metadata = true;
    bundle.metadata_name = doc.get("name").and_then(|v| v.as_str()).map(str::to_string);
    bundle.metadata_description = doc
        .get("description")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    bundle.metadata_contact = doc
        .get("contact")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    bundle.metadata_software = doc
        .get("software")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    bundle.metadata_version = doc
        .get("version")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    if let Some(limitation) = doc.get("limitation") {
        bundle.has_limitation_block = true;
        bundle.limitation_auth_required = limitation
            .get("auth_required")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        bundle.limitation_payment_required = limitation
            .get("payment_required")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        bundle.limitation_min_pow_difficulty = limitation
            .get("min_pow_difficulty")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32);
        bundle.limitation_max_message_length = limitation
            .get("max_message_length")
            .and_then(|v| v.as_u64());
        bundle.limitation_max_subscriptions = limitation
            .get("max_subscriptions")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32);
        bundle.limitation_max_filters = limitation
            .get("max_filters")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32);
    }

    bundle.fees_declared = doc
        .get("fees")
        .map(|fees| fees.is_object() && !fees.as_object().unwrap().is_empty())
        .unwrap_or(false);
}

fn parse_confidence(s: &str) -> ConfidenceLabel {
    match s {
        "High" => ConfidenceLabel::High,
        "Medium" => ConfidenceLabel::Medium,
        _ => ConfidenceLabel::Low,
    }
}

fn parse_verified_via(s: &str) -> VerifiedVia {
    match s {
        "Dns" => VerifiedVia::Dns,
        "WellKnown" => VerifiedVia::WellKnown,
        "Metadata" => VerifiedVia::Metadata,
        _ => VerifiedVia::Claimed,
    }
}

fn parse_report_type(s: &str) -> Option<ReportType> {
    match s {
        "Spam" => Some(ReportType::Spam),
        "Censorship" => Some(ReportType::Censorship),
        "Unreliable" => Some(ReportType::Unreliable),
        "Malicious" => Some(ReportType::Malicious),
        _ => None,
    }
}

