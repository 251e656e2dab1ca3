//! Schema + idempotent migrations.
//!
//! Per the design notes: "try a SELECT; on failure, add the column" is
//! realized here as a small ordered list of migrations, each of which
//! probes for its target column before altering.

use duckdb::Connection;

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS probe_observations (
    url TEXT NOT NULL,
    timestamp BIGINT NOT NULL,
    reachable BOOLEAN NOT NULL,
    relay_kind TEXT NOT NULL,
    access_level TEXT NOT NULL,
    closed_reason TEXT,
    connect_latency_ms INTEGER,
    read_latency_ms INTEGER,
    metadata_fetch_latency_ms INTEGER,
    metadata_json TEXT,
    error TEXT,
    PRIMARY KEY (url, timestamp)
);

CREATE TABLE IF NOT EXISTS monitor_metrics (
    event_id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    monitor_pubkey TEXT NOT NULL,
    timestamp BIGINT NOT NULL,
    rtt_open_ms INTEGER,
    rtt_read_ms INTEGER,
    rtt_write_ms INTEGER,
    network TEXT,
    capabilities TEXT,
    geohash TEXT
);

CREATE TABLE IF NOT EXISTS reports (
    event_id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    reporter_pubkey TEXT NOT NULL,
    report_type TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp BIGINT NOT NULL,
    reporter_trust_weight DOUBLE NOT NULL
);

CREATE TABLE IF NOT EXISTS operator_resolutions (
    url TEXT PRIMARY KEY,
    operator_pubkey TEXT,
    verified_via TEXT,
    confidence SMALLINT NOT NULL,
    last_verified_at BIGINT NOT NULL,
    metadata_pubkey TEXT,
    dns_pubkey TEXT,
    well_known_pubkey TEXT,
    sources_disagree BOOLEAN NOT NULL
);

CREATE TABLE IF NOT EXISTS jurisdiction_info (
    url TEXT PRIMARY KEY,
    resolved_ip TEXT,
    country_code TEXT,
    country_name TEXT,
    region TEXT,
    city TEXT,
    isp TEXT,
    asn INTEGER,
    is_hosting BOOLEAN NOT NULL,
    is_tor BOOLEAN NOT NULL,
    resolved_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS operator_trust (
    operator_pubkey TEXT PRIMARY KEY,
    score SMALLINT NOT NULL,
    confidence TEXT NOT NULL,
    provider_count INTEGER NOT NULL,
    updated_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS score_snapshots (
    url TEXT NOT NULL,
    timestamp BIGINT NOT NULL,
    overall SMALLINT NOT NULL,
    reliability SMALLINT NOT NULL,
    quality SMALLINT NOT NULL,
    accessibility SMALLINT NOT NULL,
    operator_trust SMALLINT,
    confidence TEXT NOT NULL,
    observation_count BIGINT NOT NULL,
    PRIMARY KEY (url, timestamp)
);

CREATE TABLE IF NOT EXISTS published_assertions (
    url TEXT PRIMARY KEY,
    last_event_id TEXT NOT NULL,
    last_score SMALLINT NOT NULL,
    last_confidence TEXT NOT NULL,
    last_observation_count BIGINT NOT NULL,
    published_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS trusted_monitors (
    pubkey TEXT PRIMARY KEY,
    added_at BIGINT NOT NULL,
    last_seen BIGINT NOT NULL,
    event_count BIGINT NOT NULL
);

-- Tracks when at-most-once-per-interval cycle tasks (retention cleanup,
-- WAL checkpoint) last ran, keyed by task name.
CREATE TABLE IF NOT EXISTS service_markers (
    name TEXT PRIMARY KEY,
    last_run_at BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_probe_url_ts ON probe_observations (url, timestamp);
CREATE INDEX IF NOT EXISTS idx_monitor_url ON monitor_metrics (url);
CREATE INDEX IF NOT EXISTS idx_reports_url ON reports (url);
CREATE INDEX IF NOT EXISTS idx_reports_reporter_day ON reports (reporter_pubkey, url, timestamp);
CREATE INDEX IF NOT EXISTS idx_score_snapshots_url ON score_snapshots (url, timestamp);
"#;

/// One additive migration: a column to probe for, and the statement that
/// adds it if the probe fails. The single specified rename is expressed
/// as an add-new/drop-old pair so it fits the same probe-then-alter shape.
struct Migration {
    probe_table: &'static str,
    probe_column: &'static str,
    alter_sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    // Historical rename: `closed_reason` used to be named `close_reason`.
    Migration {
        probe_table: "probe_observations",
        probe_column: "closed_reason",
        alter_sql: "ALTER TABLE probe_observations ADD COLUMN closed_reason TEXT",
    },
];

pub fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    for migration in MIGRATIONS {
        let probe = format!(
            "SELECT {} FROM {} LIMIT 0",
            migration.probe_column, migration.probe_table
        );
        if conn.execute_batch(&probe).is_err() {
            conn.execute_batch(migration.alter_sql)?;
        }
    }

    Ok(())
}
