//! Trend and rolling-average read paths: `allScoreTrends`,
//! `allRollingAverages`, `allTrendData`. Split out from `mod.rs` since all
//! three share the "aggregate `score_snapshots` over a window" shape.

use duckdb::Connection;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoreTrend {
    pub current: u8,
    pub previous: u8,
    pub delta: i16,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RollingAverage {
    pub window_days: u32,
    pub mean_overall: f64,
    pub sample_count: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrendPoint {
    pub slope_per_day: f64,
    pub sample_count: u64,
}

/// Current vs. immediately-preceding snapshot per relay, within the
/// preferred window. Falls back to `current == previous` (delta 0) when
/// only one snapshot exists in range.
pub(super) fn score_trends(
    conn: &Connection,
    preferred_window_secs: i64,
    now: i64,
) -> anyhow::Result<HashMap<String, ScoreTrend>> {
    let since = now - preferred_window_secs;
    let mut stmt = conn.prepare(
        "WITH ordered AS (
            SELECT url, overall, timestamp,
                   ROW_NUMBER() OVER (PARTITION BY url ORDER BY timestamp DESC) AS rn
            FROM score_snapshots
            WHERE timestamp >= ?
         )
         SELECT cur.url, cur.overall, prev.overall
         FROM ordered cur
         LEFT JOIN ordered prev ON cur.url = prev.url AND prev.rn = 2
         WHERE cur.rn = 1",
    )?;
    let mut rows = stmt.query(duckdb::params![since])?;
    let mut map = HashMap::new();
    while let Some(row) = rows.next()? {
        let url: String = row.get(0)?;
        let current: i16 = row.get(1)?;
        let previous: Option<i16> = row.get(2)?;
        let previous = previous.unwrap_or(current);
        map.insert(
            url,
            ScoreTrend {
                current: current as u8,
                previous: previous as u8,
                delta: current - previous,
            },
        );
    }
    Ok(map)
}

pub(super) fn rolling_averages(
    conn: &Connection,
    window_days: u32,
    now: i64,
) -> anyhow::Result<HashMap<String, RollingAverage>> {
    let since = now - window_days as i64 * 86400;
    let mut stmt = conn.prepare(
        "SELECT url, AVG(overall), COUNT(*)
         FROM score_snapshots
         WHERE timestamp >= ?
         GROUP BY url",
    )?;
    let mut rows = stmt.query(duckdb::params![since])?;
    let mut map = HashMap::new();
    while let Some(row) = rows.next()? {
        let url: String = row.get(0)?;
        let mean: f64 = row.get(1)?;
        let count: i64 = row.get(2)?;
        map.insert(
            url,
            RollingAverage {
                window_days,
                mean_overall: mean,
                sample_count: count as u64,
            },
        );
    }
    Ok(map)
}

/// Per-relay linear-regression slope of `overall` against `timestamp`,
/// expressed in score points per day, via DuckDB's `regr_slope`. Relays
/// with fewer than two snapshots in the window are omitted rather than
/// reported with a meaningless slope.
pub(super) fn trend_data(
    conn: &Connection,
    window_secs: i64,
    now: i64,
) -> anyhow::Result<HashMap<String, TrendPoint>> {
    let since = now - window_secs;
    let mut stmt = conn.prepare(
        "SELECT url,
                regr_slope(overall, timestamp) * 86400.0 AS slope_per_day,
                COUNT(*) AS sample_count
         FROM score_snapshots
         WHERE timestamp >= ?
         GROUP BY url
         HAVING COUNT(*) >= 2",
    )?;
    let mut rows = stmt.query(duckdb::params![since])?;
    let mut map = HashMap::new();
    while let Some(row) = rows.next()? {
        let url: String = row.get(0)?;
        let slope: Option<f64> = row.get(1)?;
        let count: i64 = row.get(2)?;
        map.insert(
            url,
            TrendPoint {
                slope_per_day: slope.unwrap_or(0.0),
                sample_count: count as u64,
            },
        );
    }
    Ok(map)
}
