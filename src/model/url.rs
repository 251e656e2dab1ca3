//! Canonical relay URL newtype.
//!
//! Normalization is idempotent: `RelayUrl::parse` applied to an already
//! canonical string returns the same string back. Invalid input is
//! rejected here, at construction, rather than left to be checked later.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("empty url")]
    Empty,
    #[error("unsupported scheme")]
    UnsupportedScheme,
    #[error("missing host")]
    MissingHost,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelayUrl(String);

impl RelayUrl {
    pub fn parse(input: &str) -> Result<Self, UrlError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(UrlError::Empty);
        }

        let lower = trimmed.to_ascii_lowercase();
        let (scheme, rest) = lower.split_once("://").ok_or(UrlError::UnsupportedScheme)?;
        if scheme != "ws" && scheme != "wss" {
            return Err(UrlError::UnsupportedScheme);
        }
        if rest.is_empty() || rest.starts_with('/') {
            return Err(UrlError::MissingHost);
        }

        let without_trailing_slash = rest.trim_end_matches('/');
        if without_trailing_slash.is_empty() {
            return Err(UrlError::MissingHost);
        }

        Ok(Self(format!("{scheme}://{without_trailing_slash}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn hostname(&self) -> Option<&str> {
        let rest = self.0.split_once("://").map(|(_, r)| r)?;
        let host_and_port = rest.split('/').next().unwrap_or(rest);
        Some(host_and_port.split(':').next().unwrap_or(host_and_port))
    }

    pub fn is_onion(&self) -> bool {
        self.hostname()
            .map(|h| h.ends_with(".onion"))
            .unwrap_or(false)
    }

    pub fn is_tls(&self) -> bool {
        self.0.starts_with("wss://")
    }

    /// The `https://` origin used for metadata fetch and well-known lookups.
    pub fn https_origin(&self) -> Option<String> {
        self.hostname().map(|h| format!("https://{h}"))
    }
}

impl fmt::Display for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RelayUrl {
    type Error = UrlError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RelayUrl> for String {
    fn from(value: RelayUrl) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_is_idempotent() {
        let inputs = [
            "wss://Relay.Example.com/",
            "ws://relay.example.com",
            "WSS://onion-test.onion/",
        ];
        for input in inputs {
            let once = RelayUrl::parse(input).unwrap();
            let twice = RelayUrl::parse(once.as_str()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn rejects_bad_scheme() {
        assert_eq!(
            RelayUrl::parse("http://relay.example.com"),
            Err(UrlError::UnsupportedScheme)
        );
    }

    #[test]
    fn rejects_empty_host() {
        assert_eq!(RelayUrl::parse("wss:///"), Err(UrlError::MissingHost));
    }

    #[test]
    fn detects_onion_and_tls() {
        let onion = RelayUrl::parse("ws://abc123.onion").unwrap();
        assert!(onion.is_onion());
        assert!(!onion.is_tls());

        let clearnet = RelayUrl::parse("wss://relay.example.com").unwrap();
        assert!(!clearnet.is_onion());
        assert!(clearnet.is_tls());
    }
}
