//! Read-only HTTP API. Thin glue over the Store: every handler either
//! serves a cached body or runs one (or a small, fixed number of) Store
//! reads and serializes the result. No handler ever touches the scorer
//! directly — scores are whatever the last cycle persisted.

mod cache;
mod error;
mod routes;

use crate::config::ApiConfig;
use crate::middleware::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};
use crate::store::Store;
use axum::http::Method;
use axum::routing::get;
use axum::Router;
use cache::ResponseCache;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

pub struct ApiState {
    pub store: Arc<Store>,
    pub cache: ResponseCache,
    pub cache_ttl_relay: Duration,
    pub cache_ttl_aggregate: Duration,
}

impl ApiState {
    pub fn new(store: Arc<Store>, config: &ApiConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            cache: ResponseCache::new(),
            cache_ttl_relay: Duration::from_secs(config.cache_ttl_relay_secs),
            cache_ttl_aggregate: Duration::from_secs(config.cache_ttl_aggregate_secs),
        })
    }
}

/// Builds the full read-API router: global rate limiting everywhere, a
/// second stricter layer scoped to the two list-style endpoints, and a
/// permissive CORS policy since every response is public read-only data.
pub fn router(state: Arc<ApiState>, config: &ApiConfig) -> Router {
    let global_limiter = RateLimitLayer::new(RateLimitConfig {
        max_requests: config.rate_limit.max_requests,
        window: Duration::from_secs(config.rate_limit.window_secs),
        burst: config.rate_limit.burst,
    });
    let strict_limiter = RateLimitLayer::new(RateLimitConfig {
        max_requests: config.strict_rate_limit.max_requests,
        window: Duration::from_secs(config.strict_rate_limit.window_secs),
        burst: config.strict_rate_limit.burst,
    });

    let listing = Router::new()
        .route("/api/relays", get(routes::list_relays))
        .route("/api/rankings", get(routes::rankings))
        .layer(axum::middleware::from_fn_with_state(
            strict_limiter,
            rate_limit_middleware,
        ));

    let rest = Router::new()
        .route("/api/relays/:url/score", get(routes::relay_score))
        .route("/api/relays/:url", get(routes::relay_detail))
        .route("/api/relays/:url/history", get(routes::relay_history))
        .route("/api/relays/:url/assertion", get(routes::relay_assertion))
        .route("/api/jurisdictions", get(routes::jurisdictions))
        .route("/api/stats", get(routes::stats))
        .route("/api/analytics", get(routes::analytics));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_origin(Any);

    Router::new()
        .merge(listing)
        .merge(rest)
        .layer(axum::middleware::from_fn_with_state(
            global_limiter,
            rate_limit_middleware,
        ))
        .layer(cors)
        .with_state(state)
}
