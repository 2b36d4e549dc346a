//! Error types for keyed store operations.

/// Errors produced by a [`KeyedStore`](crate::KeyedStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("backend error: {detail}")]
    Backend { detail: String },

    #[error("store poisoned: {detail}")]
    Poisoned { detail: String },
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NotFound {
            key: "check-abc".to_string(),
        };
        assert!(err.to_string().contains("check-abc"));

        let err = StoreError::Backend {
            detail: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("connection refused"));
    }
}
