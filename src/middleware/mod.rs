//! HTTP middleware shared by the read API.

mod rate_limit;

pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};
