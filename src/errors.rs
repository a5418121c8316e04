//! # Application Error Types
//!
//! This module defines the error types used throughout the stock tracker.
//! Store and fetch failures get their own enums because callers branch on them:
//! the dispatcher turns store errors into replies, the scheduler turns fetch
//! errors into a `FETCH_ERROR` status.

use std::fmt;

/// General application error type for consistent error handling
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Configuration validation errors
    Config(String),
    /// Validation errors (URLs, product ids, etc.)
    Validation(String),
    /// Database operation errors
    Database(String),
    /// Network/communication errors
    Network(String),
    /// Internal application errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "[CONFIG] {}", msg),
            AppError::Validation(msg) => write!(f, "[VALIDATION] {}", msg),
            AppError::Database(msg) => write!(f, "[DATABASE] {}", msg),
            AppError::Network(msg) => write!(f, "[NETWORK] {}", msg),
            AppError::Internal(msg) => write!(f, "[INTERNAL] {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Persistence(msg) => AppError::Database(msg),
            other => AppError::Validation(other.to_string()),
        }
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        AppError::Network(err.to_string())
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// Failures surfaced by a product store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The owner already tracks this URL
    AlreadyTracked { owner_id: i64, url: String },
    /// No product with this id belongs to the owner
    NotFound { owner_id: i64, product_id: i64 },
    /// The backing database failed after retries
    Persistence(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::AlreadyTracked { owner_id, url } => {
                write!(f, "[ALREADY_TRACKED] owner {} already tracks {}", owner_id, url)
            }
            StoreError::NotFound {
                owner_id,
                product_id,
            } => write!(
                f,
                "[NOT_FOUND] product {} not found for owner {}",
                product_id, owner_id
            ),
            StoreError::Persistence(msg) => write!(f, "[PERSISTENCE] {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures surfaced by the page fetcher
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// The request did not complete within the configured timeout
    Timeout { url: String },
    /// The server answered with a non-success status
    Http { url: String, status: u16 },
    /// Amazon served a CAPTCHA / robot check instead of the product page
    Blocked { url: String },
    /// Connection-level failure (DNS, TLS, reset, ...)
    Network { url: String, message: String },
    /// Fetching is paused after repeated failures
    CircuitOpen,
}

impl FetchError {
    /// Whether another attempt within the same fetch may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Network { .. } => true,
            FetchError::Http { status, .. } => *status == 429 || *status >= 500,
            FetchError::Blocked { .. } | FetchError::CircuitOpen => false,
        }
    }

    /// Whether the failure says something about Amazon as a whole rather than
    /// one product page. Only these count towards opening the circuit; a
    /// delisted product answering 404 must not stall every other product.
    pub fn indicates_upstream_trouble(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Network { .. } | FetchError::Blocked { .. } => true,
            FetchError::Http { status, .. } => matches!(*status, 403 | 429) || *status >= 500,
            FetchError::CircuitOpen => false,
        }
    }

    /// Short machine-readable label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "timeout",
            FetchError::Http { .. } => "http_error",
            FetchError::Blocked { .. } => "blocked",
            FetchError::Network { .. } => "network_error",
            FetchError::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Timeout { url } => write!(f, "[TIMEOUT] request to {} timed out", url),
            FetchError::Http { url, status } => {
                write!(f, "[HTTP_ERROR] {} answered with status {}", url, status)
            }
            FetchError::Blocked { url } => {
                write!(f, "[HTTP_ERROR] {} served a robot check page", url)
            }
            FetchError::Network { url, message } => {
                write!(f, "[NETWORK_ERROR] {}: {}", url, message)
            }
            FetchError::CircuitOpen => {
                write!(f, "[CIRCUIT_OPEN] fetching paused after repeated failures")
            }
        }
    }
}

impl std::error::Error for FetchError {}

/// Standardized error logging utilities for consistent error reporting across the application
pub mod error_logging {
    use tracing::error;

    /// Log database operation errors with contextual information
    pub fn log_database_error(
        error: &impl std::fmt::Display,
        operation: &str,
        owner_id: Option<i64>,
        product_id: Option<i64>,
    ) {
        error!(
            error = %error,
            operation = %operation,
            owner_id = ?owner_id,
            product_id = ?product_id,
            "Database operation failed"
        );
    }

    /// Log network/communication errors with connection context
    pub fn log_network_error(
        error: &impl std::fmt::Display,
        operation: &str,
        endpoint: Option<&str>,
        attempt_count: Option<u32>,
    ) {
        error!(
            error = %error,
            operation = %operation,
            endpoint = ?endpoint,
            attempt_count = ?attempt_count,
            "Network operation failed"
        );
    }

    /// Log Telegram delivery errors
    pub fn log_telegram_error(error: &impl std::fmt::Display, operation: &str, chat_id: i64) {
        error!(
            error = %error,
            operation = %operation,
            chat_id = %chat_id,
            "Telegram operation failed"
        );
    }

    /// Log configuration errors during startup/initialization
    pub fn log_config_error(error: &impl std::fmt::Display, config_key: &str, operation: &str) {
        error!(
            error = %error,
            config_key = %config_key,
            operation = %operation,
            "Configuration error"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_retryability() {
        let url = "https://www.amazon.in/dp/B0CHX1W1XY".to_string();
        assert!(FetchError::Timeout { url: url.clone() }.is_retryable());
        assert!(FetchError::Http { url: url.clone(), status: 503 }.is_retryable());
        assert!(FetchError::Http { url: url.clone(), status: 429 }.is_retryable());
        assert!(!FetchError::Http { url: url.clone(), status: 404 }.is_retryable());
        assert!(!FetchError::Http { url: url.clone(), status: 403 }.is_retryable());
        assert!(!FetchError::Blocked { url }.is_retryable());
        assert!(!FetchError::CircuitOpen.is_retryable());
    }

    #[test]
    fn test_only_upstream_failures_trip_the_circuit() {
        let url = "https://www.amazon.in/dp/B0CHX1W1XY".to_string();
        assert!(FetchError::Blocked { url: url.clone() }.indicates_upstream_trouble());
        assert!(FetchError::Timeout { url: url.clone() }.indicates_upstream_trouble());
        assert!(FetchError::Http { url: url.clone(), status: 503 }.indicates_upstream_trouble());
        assert!(FetchError::Http { url: url.clone(), status: 429 }.indicates_upstream_trouble());
        assert!(!FetchError::Http { url: url.clone(), status: 404 }.indicates_upstream_trouble());
        assert!(!FetchError::Http { url, status: 410 }.indicates_upstream_trouble());
        assert!(!FetchError::CircuitOpen.indicates_upstream_trouble());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: AppError = StoreError::Persistence("pool timed out".to_string()).into();
        assert_eq!(err, AppError::Database("pool timed out".to_string()));

        let err: AppError = StoreError::NotFound {
            owner_id: 1,
            product_id: 2,
        }
        .into();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_error_display_tags() {
        let err = StoreError::AlreadyTracked {
            owner_id: 42,
            url: "https://www.amazon.in/dp/B0CHX1W1XY".to_string(),
        };
        assert!(err.to_string().starts_with("[ALREADY_TRACKED]"));
        assert!(FetchError::CircuitOpen.to_string().starts_with("[CIRCUIT_OPEN]"));
    }
}
