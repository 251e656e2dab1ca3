//! Resolves hostname -> IP -> geo/ASN for a relay. `.onion` hosts
//! short-circuit with `is_tor = true` and skip the network entirely.

use crate::model::{JurisdictionInfo, RelayUrl};
use hickory_resolver::TokioAsyncResolver;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub struct JurisdictionResolver {
    dns: Arc<TokioAsyncResolver>,
    http: reqwest::Client,
    geo_endpoint: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GeoResponse {
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    country: Option<String>,
    #[serde(rename = "regionName")]
    region: Option<String>,
    city: Option<String>,
    isp: Option<String>,
    #[serde(rename = "as")]
    asn_line: Option<String>,
    hosting: Option<bool>,
}

impl JurisdictionResolver {
    pub fn new(dns: Arc<TokioAsyncResolver>, geo_endpoint: String, timeout: Duration) -> Self {
        Self {
            dns,
            http: reqwest::Client::new(),
            geo_endpoint,
            timeout,
        }
    }

    pub async fn resolve(&self, url: &RelayUrl, now: i64) -> JurisdictionInfo {
        if url.is_onion() {
            return JurisdictionInfo {
                url: url.clone(),
                resolved_ip: None,
                country_code: None,
                country_name: None,
                region: None,
                city: None,
                isp: None,
                asn: None,
                is_hosting: false,
                is_tor: true,
                resolved_at: now,
            };
        }

        let Some(hostname) = url.hostname() else {
            return empty(url, now);
        };

        let Some(ip) = self.resolve_ip(hostname).await else {
            return empty(url, now);
        };

        let Some(geo) = self.query_geo(&ip).await else {
            return JurisdictionInfo {
                url: url.clone(),
                resolved_ip: Some(ip),
                country_code: None,
                country_name: None,
                region: None,
                city: None,
                isp: None,
                asn: None,
                is_hosting: false,
                is_tor: false,
                resolved_at: now,
            };
        };

        JurisdictionInfo {
            url: url.clone(),
            resolved_ip: Some(ip),
            country_code: geo.country_code,
            country_name: geo.country,
            region: geo.region,
            city: geo.city,
            isp: geo.isp,
            asn: geo.asn_line.as_deref().and_then(parse_asn_number),
            is_hosting: geo.hosting.unwrap_or(false),
            is_tor: false,
            resolved_at: now,
        }
    }

    async fn resolve_ip(&self, hostname: &str) -> Option<String> {
        let result = tokio::time::timeout(self.timeout, self.dns.lookup_ip(hostname)).await;
        let lookup = result.ok()?.ok()?;
        lookup.iter().next().map(|ip| ip.to_string())
    }

    async fn query_geo(&self, ip: &str) -> Option<GeoResponse> {
        let url = format!("{}/{}", self.geo_endpoint.trim_end_matches('/'), ip);
        let result = tokio::time::timeout(self.timeout, self.http.get(&url).send()).await;
        let response = result.ok()?.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json::<GeoResponse>().await.ok()
    }
}

fn parse_asn_number(as_line: &str) -> Option<u32> {
    as_line
        .trim_start_matches("AS")
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
}

fn empty(url: &RelayUrl, now: i64) -> JurisdictionInfo {
    JurisdictionInfo {
        url: url.clone(),
        resolved_ip: None,
        country_code: None,
        country_name: None,
        region: None,
        city: None,
        isp: None,
        asn: None,
        is_hosting: false,
        is_tor: false,
        resolved_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_asn_from_as_line() {
        assert_eq!(parse_asn_number("AS13335 Cloudflare, Inc."), Some(13335));
        assert_eq!(parse_asn_number("garbage"), None);
    }
}
