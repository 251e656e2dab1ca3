//! Handlers. Path parameters carrying a relay URL are percent-encoded by
//! the caller (e.g. `wss%3A%2F%2Frelay.example.com`); axum decodes the
//! segment before it reaches `RelayUrl::parse`.

use super::error::{bad_request, not_found, ApiError};
use super::ApiState;
use crate::model::RelayUrl;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

fn cache_get(state: &ApiState, key: &str) -> Option<Response> {
    state
        .cache
        .get(key)
        .map(|body| ([("content-type", "application/json")], body).into_response())
}

fn cache_put(state: &ApiState, key: String, body: &serde_json::Value, ttl: std::time::Duration) {
    state.cache.put(key, body.to_string(), ttl);
}

fn parse_url_param(raw: &str) -> Result<RelayUrl, Response> {
    RelayUrl::parse(raw).map_err(|e| bad_request(&format!("invalid relay url: {e}")))
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

pub async fn list_relays(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<PageParams>,
) -> Result<Response, ApiError> {
    let page = params.page.unwrap_or(0) as usize;
    let page_size = params
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE) as usize;
    let cache_key = format!("relays:{page}:{page_size}");
    if let Some(hit) = cache_get(&state, &cache_key) {
        return Ok(hit);
    }

    let mut scores = state.store.all_latest_scores().await?;
    scores.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.url.cmp(&b.url)));
    let total = scores.len();
    let window: Vec<_> = scores.into_iter().skip(page * page_size).take(page_size).collect();

    let body = json!({
        "page": page,
        "page_size": page_size,
        "total": total,
        "relays": window,
    });
    cache_put(&state, cache_key, &body, state.cache_ttl_aggregate);
    Ok(Json(body).into_response())
}

pub async fn rankings(
    State(state): State<Arc<ApiState>>,
) -> Result<Response, ApiError> {
    let cache_key = "rankings".to_string();
    if let Some(hit) = cache_get(&state, &cache_key) {
        return Ok(hit);
    }

    let mut scores = state.store.all_latest_scores().await?;
    scores.sort_by(|a, b| b.overall.cmp(&a.overall).then(a.url.cmp(&b.url)));

    let body = json!({ "rankings": scores });
    cache_put(&state, cache_key, &body, state.cache_ttl_aggregate);
    Ok(Json(body).into_response())
}

pub async fn relay_score(
    State(state): State<Arc<ApiState>>,
    Path(raw_url): Path<String>,
) -> Result<Response, ApiError> {
    let url = match parse_url_param(&raw_url) {
        Ok(url) => url,
        Err(resp) => return Ok(resp),
    };
    let cache_key = format!("score:{}", url.as_str());
    if let Some(hit) = cache_get(&state, &cache_key) {
        return Ok(hit);
    }

    let Some(snapshot) = state.store.latest_score_snapshot(&url).await? else {
        return Ok(not_found());
    };

    let body = serde_json::to_value(&snapshot).expect("ScoreSnapshot always serializes");
    cache_put(&state, cache_key, &body, state.cache_ttl_relay);
    Ok(Json(body).into_response())
}

pub async fn relay_detail(
    State(state): State<Arc<ApiState>>,
    Path(raw_url): Path<String>,
) -> Result<Response, ApiError> {
    let url = match parse_url_param(&raw_url) {
        Ok(url) => url,
        Err(resp) => return Ok(resp),
    };
    let cache_key = format!("detail:{}", url.as_str());
    if let Some(hit) = cache_get(&state, &cache_key) {
        return Ok(hit);
    }

    let (score, probe, jurisdiction, operator) = tokio::try_join!(
        state.store.latest_score_snapshot(&url),
        state.store.latest_probe(&url),
        state.store.jurisdiction_for(&url),
        state.store.operator_resolution_for(&url),
    )?;

    if score.is_none() && probe.is_none() {
        return Ok(not_found());
    }

    let body = json!({
        "url": url.as_str(),
        "score": score,
        "probe": probe,
        "jurisdiction": jurisdiction,
        "operator": operator,
    });
    cache_put(&state, cache_key, &body, state.cache_ttl_relay);
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub days: Option<u32>,
}

pub async fn relay_history(
    State(state): State<Arc<ApiState>>,
    Path(raw_url): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Response, ApiError> {
    let url = match parse_url_param(&raw_url) {
        Ok(url) => url,
        Err(resp) => return Ok(resp),
    };
    let days = params.days.unwrap_or(7);
    if days < 1 || days > 365 {
        return Ok(bad_request("days must be between 1 and 365"));
    }

    let cache_key = format!("history:{}:{days}", url.as_str());
    if let Some(hit) = cache_get(&state, &cache_key) {
        return Ok(hit);
    }

    let now = crate::model::now_unix();
    let history = state.store.score_history(&url, days, now).await?;
    let body = json!({ "url": url.as_str(), "days": days, "history": history });
    cache_put(&state, cache_key, &body, state.cache_ttl_relay);
    Ok(Json(body).into_response())
}

pub async fn relay_assertion(
    State(state): State<Arc<ApiState>>,
    Path(raw_url): Path<String>,
) -> Result<Response, ApiError> {
    let url = match parse_url_param(&raw_url) {
        Ok(url) => url,
        Err(resp) => return Ok(resp),
    };
    let Some(assertion) = state.store.latest_published_assertion(&url).await? else {
        return Ok(not_found());
    };
    Ok(Json(assertion).into_response())
}

pub async fn jurisdictions(
    State(state): State<Arc<ApiState>>,
) -> Result<Response, ApiError> {
    let cache_key = "jurisdictions".to_string();
    if let Some(hit) = cache_get(&state, &cache_key) {
        return Ok(hit);
    }

    let map = state.store.all_jurisdictions().await?;
    let mut by_country: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    for info in map.values() {
        let key = info.country_code.clone().unwrap_or_else(|| "unknown".to_string());
        *by_country.entry(key).or_insert(0) += 1;
    }

    let body = json!({
        "total_resolved": map.len(),
        "by_country": by_country,
        "jurisdictions": map.values().collect::<Vec<_>>(),
    });
    cache_put(&state, cache_key, &body, state.cache_ttl_aggregate);
    Ok(Json(body).into_response())
}

pub async fn stats(
    State(state): State<Arc<ApiState>>,
) -> Result<Response, ApiError> {
    let cache_key = "stats".to_string();
    if let Some(hit) = cache_get(&state, &cache_key) {
        return Ok(hit);
    }

    let scores = state.store.all_latest_scores().await?;
    let total = scores.len();
    let mean_overall = if total == 0 {
        0.0
    } else {
        scores.iter().map(|s| s.overall as f64).sum::<f64>() / total as f64
    };
    let high_confidence = scores
        .iter()
        .filter(|s| s.confidence == crate::model::ConfidenceLabel::High)
        .count();

    let body = json!({
        "total_relays": total,
        "mean_overall_score": mean_overall,
        "high_confidence_count": high_confidence,
    });
    cache_put(&state, cache_key, &body, state.cache_ttl_aggregate);
    Ok(Json(body).into_response())
}

pub async fn analytics(
    State(state): State<Arc<ApiState>>,
) -> Result<Response, ApiError> {
    let cache_key = "analytics".to_string();
    if let Some(hit) = cache_get(&state, &cache_key) {
        return Ok(hit);
    }

    let now = crate::model::now_unix();
    let (trends, rolling, slopes) = tokio::try_join!(
        state.store.all_score_trends(7 * 86400, now),
        state.store.all_rolling_averages(30, now),
        state.store.all_trend_data(30 * 86400, now),
    )?;

    let body = json!({
        "trends": trends,
        "rolling_averages_30d": rolling,
        "slopes_30d": slopes,
    });
    cache_put(&state, cache_key, &body, state.cache_ttl_aggregate);
    Ok(Json(body).into_response())
}
