//! Error kinds shared across the service.
//!
//! These mirror the error-kind taxonomy rather than leaf library errors:
//! every network or store boundary normalizes into one of these variants
//! before it is allowed to propagate, and the `Display` impls never embed
//! raw error payloads (connection strings, header values, user content).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("transient network failure: {0}")]
    TransientNetwork(&'static str),

    #[error("malformed input: {0}")]
    MalformedInput(&'static str),

    #[error("store-write-failed")]
    StoreWriteFailed,

    #[error("store-read-failed")]
    StoreReadFailed,

    #[error("config-invalid")]
    ConfigInvalid,

    #[error("cancelled")]
    Cancelled,

    #[error("rate-limited")]
    RateLimited,
}

impl ServiceError {
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, ServiceError::ConfigInvalid)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
