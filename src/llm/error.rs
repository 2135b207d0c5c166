//! Typed errors for provider calls
//!
//! Lets the router tell rate limits (which put a provider on cooldown) apart
//! from other failures without string matching.

use thiserror::Error;

use crate::core::{ChainError, TaskType};

/// Provider call errors with typed variants
///
/// Every variant makes the router move on to the next model in the chain;
/// the variant decides what else happens:
/// - `RateLimited` (429) puts the provider on cooldown
/// - `Unauthorized` (401/403) usually means a missing or revoked key
/// - `BadRequest` (400/404/422) will fail the same way on a later try
/// - `ServiceError` (5xx) and `Network` are transient
///
/// [`LlmError::is_retryable`] feeds [`RouterError::is_retryable`], which tells
/// callers whether repeating an exhausted request later could succeed.
#[derive(Debug, Error)]
pub enum LlmError {
    /// API key missing, expired or rejected (HTTP 401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exceeded (HTTP 429)
    ///
    /// The inner string may contain the provider's reset hint.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Malformed request or unknown model (HTTP 400/404/422)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Server-side error (HTTP 5xx, including Anthropic's 529 overload)
    #[error("Service error: {0}")]
    ServiceError(String),

    /// Connection refused, DNS failure or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// Provider answered but the body was not usable
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Errors from [`ModelRouter::generate_completion`](super::ModelRouter::generate_completion)
#[derive(Debug, Error)]
pub enum RouterError {
    /// Every model in the attempt list failed
    #[error("All {attempts} models for {task_type} failed, last error: {last_error}")]
    Exhausted {
        task_type: TaskType,
        attempts: usize,
        last_error: String,
        /// At least one failure was transient (rate limit, 5xx, network)
        transient: bool,
    },

    /// Prompt rejected before any provider call
    #[error("Prompt is about {estimated} tokens, limit is {limit}")]
    TokenLimitExceeded { estimated: usize, limit: usize },

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl RouterError {
    /// Check if repeating the same request later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, RouterError::Exhausted { transient: true, .. })
    }
}

impl LlmError {
    /// Check if the same request could succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::ServiceError(_) | LlmError::Network(_)
        )
    }

    /// Check if this error indicates a rate limit that requires waiting
    pub fn needs_rate_limit_wait(&self) -> bool {
        matches!(self, LlmError::RateLimited(_))
    }

    /// Convert HTTP status code and error text into typed LlmError
    pub fn from_http_status(status: reqwest::StatusCode, error_text: String) -> Self {
        match status.as_u16() {
            401 | 403 => LlmError::Unauthorized(error_text),
            429 => LlmError::RateLimited(error_text),
            400 | 404 | 422 => LlmError::BadRequest(error_text),
            408 => LlmError::Network(error_text),
            500..=599 => LlmError::ServiceError(error_text),
            _ => LlmError::Other(anyhow::anyhow!("HTTP {}: {}", status, error_text)),
        }
    }

    /// Convert network/connection errors into typed LlmError
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            LlmError::Network(format!("Connection failed: {}", e))
        } else if e.is_decode() {
            LlmError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            let error_text = e.to_string();
            Self::from_http_status(status, error_text)
        } else {
            LlmError::Other(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_is_retryable() {
        let err = LlmError::RateLimited("quota exceeded".to_string());
        assert!(err.is_retryable());
        assert!(err.needs_rate_limit_wait());
    }

    #[test]
    fn test_unauthorized_and_bad_request_not_retryable() {
        assert!(!LlmError::Unauthorized("no key".into()).is_retryable());
        assert!(!LlmError::BadRequest("invalid parameter".into()).is_retryable());
        assert!(!LlmError::InvalidResponse("empty".into()).needs_rate_limit_wait());
    }

    #[test]
    fn test_router_error_retryable_only_when_transient() {
        let permanent = RouterError::Exhausted {
            task_type: TaskType::Conversation,
            attempts: 1,
            last_error: "gpt-4o: Unauthorized: bad key".into(),
            transient: false,
        };
        assert!(!permanent.is_retryable());
        assert!(!RouterError::TokenLimitExceeded {
            estimated: 10,
            limit: 5
        }
        .is_retryable());
    }

    #[test]
    fn test_from_http_status() {
        let err = LlmError::from_http_status(
            reqwest::StatusCode::UNAUTHORIZED,
            "Invalid token".to_string(),
        );
        assert!(matches!(err, LlmError::Unauthorized(_)));

        let err = LlmError::from_http_status(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded".to_string(),
        );
        assert!(matches!(err, LlmError::RateLimited(_)));

        let err =
            LlmError::from_http_status(reqwest::StatusCode::NOT_FOUND, "No such model".to_string());
        assert!(matches!(err, LlmError::BadRequest(_)));

        let overloaded = reqwest::StatusCode::from_u16(529).unwrap();
        let err = LlmError::from_http_status(overloaded, "Overloaded".to_string());
        assert!(matches!(err, LlmError::ServiceError(_)));

        let err = LlmError::from_http_status(reqwest::StatusCode::IM_A_TEAPOT, "?".to_string());
        assert!(matches!(err, LlmError::Other(_)));
    }

    #[test]
    fn test_router_error_display() {
        let err = RouterError::Exhausted {
            task_type: TaskType::Analysis,
            attempts: 2,
            last_error: "gpt-4o: Network error: refused".into(),
            transient: true,
        };
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "All 2 models for analysis failed, last error: gpt-4o: Network error: refused"
        );
    }

    #[test]
    fn test_error_display() {
        let err = LlmError::RateLimited("quota exceeded".to_string());
        assert_eq!(err.to_string(), "Rate limited: quota exceeded");
    }
}
