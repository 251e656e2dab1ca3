//! WotClient: aggregates a third-party trust assertion across a
//! configurable set of provider endpoints.

mod client;

pub use client::{TrustProvider, WotClient};
