use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Circuit open for backend: {backend}")]
    CircuitOpen { backend: String },

    #[error("Rate limit exhausted for backend: {backend}")]
    RateLimited { backend: String },

    #[error("Unknown backend kind: {kind}")]
    UnknownBackendKind { kind: String },

    #[error("Backend {backend} error: {message}")]
    Backend { backend: String, message: String },

    #[error("Parsing error: {message}")]
    Parse { message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True when the error is the breaker's own fast-fail, as opposed to a
    /// failure reported by the wrapped operation.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, AppError::CircuitOpen { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AppError::RateLimited { .. })
    }
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
    }

    #[test]
    fn test_circuit_open_error() {
        let err = AppError::CircuitOpen {
            backend: "bigbox".to_string(),
        };
        assert_eq!(err.to_string(), "Circuit open for backend: bigbox");
        assert!(err.is_circuit_open());
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_unknown_backend_kind_error() {
        let err = AppError::UnknownBackendKind {
            kind: "carrier-pigeon".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown backend kind: carrier-pigeon");
    }

    #[test]
    fn test_backend_error() {
        let err = AppError::Backend {
            backend: "megamart".to_string(),
            message: "availability endpoint returned 503".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Backend megamart error: availability endpoint returned 503"
        );
    }
}
