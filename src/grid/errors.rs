//! Grid-specific error types

use thiserror::Error;

/// Errors that can occur in grid trading operations
#[derive(Error, Debug, Clone)]
pub enum GridError {
    #[error("Invalid grid configuration: {0}")]
    InvalidConfig(String),

    #[error("Grid level not found: index {0}")]
    LevelNotFound(u32),

    /// Network or API failure on place/cancel/fetch. Retried on the next sweep.
    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Order not found: id {0}")]
    OrderNotFound(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("State persistence error: {0}")]
    StatePersistence(String),

    /// Snapshot was readable but does not describe a consistent engine
    #[error("Corrupt state: {0}")]
    StateCorrupt(String),

    #[error("Unsupported snapshot schema version {found} (this build reads up to {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GridError {
    /// Whether repeating the same exchange call later can succeed.
    ///
    /// Transient exchange failures and balance rejections clear up on their own
    /// (a fill frees balance); everything else needs operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GridError::Exchange(_) | GridError::InsufficientBalance { .. }
        )
    }

    /// Whether this error came from the exchange side of the engine
    pub fn is_exchange_error(&self) -> bool {
        matches!(
            self,
            GridError::Exchange(_)
                | GridError::InsufficientBalance { .. }
                | GridError::OrderNotFound(_)
        )
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::JsonParse(err.to_string())
    }
}

impl From<std::io::Error> for GridError {
    fn from(err: std::io::Error) -> Self {
        GridError::StatePersistence(err.to_string())
    }
}

impl From<config::ConfigError> for GridError {
    fn from(err: config::ConfigError) -> Self {
        GridError::Config(err.to_string())
    }
}

/// Result type for grid operations
pub type GridResult<T> = std::result::Result<T, GridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GridError::Exchange("timeout".into()).is_retryable());
        assert!(GridError::InsufficientBalance {
            required: 100.0,
            available: 10.0
        }
        .is_retryable());
        assert!(!GridError::OrderNotFound("7".into()).is_retryable());
        assert!(!GridError::StateCorrupt("bad".into()).is_retryable());
    }

    #[test]
    fn test_io_error_maps_to_persistence() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: GridError = io.into();
        assert!(matches!(err, GridError::StatePersistence(_)));
        assert!(!err.is_exchange_error());
    }
}
