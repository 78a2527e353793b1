//! Error taxonomy shared by the detector, dispatch engine and persistence layer.

use thiserror::Error;

use crate::config::ConfigError;

/// Failure while fetching a grid snapshot from an external provider.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("provider timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("provider failed: {0}")]
    Provider(String),

    #[error("no data for region {region}")]
    NoData { region: String },
}

/// Failure in the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("concurrent update of battery state for {region}")]
    Conflict { region: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("connection mutex poisoned")]
    Poisoned,
}

impl StoreError {
    /// Only driver-level failures are retried; a conflict is a lost race.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Sqlite(_))
    }
}

/// A record failed a sanity check and must not be persisted.
#[derive(Debug, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Per-region failure reported by the engine and the HTTP layer.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("external fetch: {0}")]
    ExternalFetch(#[from] FetchError),

    #[error("persistence: {0}")]
    Persistence(#[from] StoreError),

    #[error("validation: {0}")]
    Validation(#[from] ValidationError),
}

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_not_retryable() {
        let e = StoreError::Conflict {
            region: "ON".into(),
        };
        assert!(!e.is_retryable());
        let e = StoreError::Sqlite(rusqlite::Error::InvalidQuery);
        assert!(e.is_retryable());
    }

    #[test]
    fn store_error_converts_to_persistence() {
        let e: CoreError = StoreError::Corrupt("x".into()).into();
        assert!(matches!(e, CoreError::Persistence(_)));
        assert!(e.to_string().starts_with("persistence:"));
    }
}
