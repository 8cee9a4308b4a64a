//! Error taxonomy for the aggregator.
//!
//! Every error the crate surfaces is a variant of [`SerpError`]. Each
//! variant corresponds to one failure category a host needs to branch
//! on: bad configuration, bad input, a malformed upstream response, a
//! blown deadline, a 429, a refusing circuit breaker. Remote-cache
//! transport failures are deliberately *not* represented here — they
//! degrade to a cache miss and are only logged, never surfaced.
//!
//! # Examples
//!
//! ```rust
//! use serp_aggregator::SerpError;
//!
//! match SerpError::validation("max_pages", 0) {
//!     SerpError::Validation { field, value } => {
//!         println!("bad {field}: {value}");
//!     }
//!     e => println!("other error: {e}"),
//! }
//! ```

use thiserror::Error;

/// Root error type for all aggregator operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SerpError {
    /// Settings failed validation at construction time.
    ///
    /// Config errors must surface at startup rather than at first
    /// request.
    #[error("configuration error: {0}")]
    Config(String),

    /// A public method received an out-of-range or malformed argument.
    #[error("invalid {field}: {value}")]
    Validation {
        /// Name of the offending field.
        field: String,
        /// String form of the offending value.
        value: String,
    },

    /// The upstream returned a non-retryable non-2xx response, or a
    /// response missing a required field (e.g. `response_id`).
    #[error("upstream API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response id, if the submit phase had already produced one.
        response_id: Option<String>,
        /// Human-readable detail.
        message: String,
    },

    /// An HTTP deadline expired, or the poll budget
    /// (`poll_interval * max_polls`) was exhausted without a result.
    #[error("timeout after {elapsed_secs:.1}s")]
    Timeout {
        /// Seconds elapsed before giving up.
        elapsed_secs: f64,
        /// Response id, if polling had started.
        response_id: Option<String>,
    },

    /// The upstream returned 429 on submit or poll.
    #[error("rate limited{}", .retry_after.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited {
        /// Seconds to wait before retrying, if the upstream supplied one.
        retry_after: Option<u64>,
    },

    /// A cache implementation explicitly wants to surface an error.
    #[error("cache error: {0}")]
    Cache(String),

    /// The rate limiter's circuit breaker is open and is refusing
    /// requests until the recovery timeout elapses.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying HTTP transport failure (connection, read, etc.),
    /// surfaced only after the transport retry budget is exhausted.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A response body could not be deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias used throughout the crate.
pub type SerpResult<T> = Result<T, SerpError>;

impl SerpError {
    /// Convenience constructor for [`SerpError::Validation`].
    pub fn validation(field: impl Into<String>, value: impl std::fmt::Display) -> Self {
        Self::Validation {
            field: field.into(),
            value: value.to_string(),
        }
    }

    /// Whether this error represents a condition a retry loop should
    /// treat as transient transport trouble, as opposed to a typed
    /// upstream error that must propagate immediately.
    pub fn is_retryable_transport(&self) -> bool {
        match self {
            SerpError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_formats_field_and_value() {
        let err = SerpError::validation("max_pages", 0);
        assert_eq!(err.to_string(), "invalid max_pages: 0");
    }

    #[test]
    fn rate_limited_without_retry_after_has_no_suffix() {
        let err = SerpError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "rate limited");
    }

    #[test]
    fn rate_limited_with_retry_after_has_suffix() {
        let err = SerpError::RateLimited {
            retry_after: Some(30),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 30s");
    }
}
