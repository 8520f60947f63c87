//! Errors from the provider adapter layer.

/// Errors returned by [`ProviderAdapter`](crate::ProviderAdapter) calls.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("Provider API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The provider accepted the HTTP call but refused the request.
    #[error("Provider rejected request: {0}")]
    Rejected(String),

    /// The response did not have the expected shape.
    #[error("Malformed provider response: {0}")]
    Malformed(String),

    /// Credentials for this provider are missing.
    #[error("Provider not configured: {0}")]
    NotConfigured(&'static str),

    /// `fetch_result` was called before the task succeeded.
    #[error("Result not ready: {0}")]
    NotReady(String),

    /// A temporary failure that is worth retrying.
    #[error("Transient provider error: {0}")]
    Transient(String),
}

impl ProviderError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Network failures, timeouts, rate limiting and server errors are
    /// transient; rejections and malformed responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Request(e) => !e.is_decode() && !e.is_builder(),
            ProviderError::Api { status, .. } => is_transient_status(*status),
            ProviderError::Transient(_) => true,
            ProviderError::Rejected(_)
            | ProviderError::Malformed(_)
            | ProviderError::NotConfigured(_)
            | ProviderError::NotReady(_) => false,
        }
    }
}

/// HTTP statuses that indicate a retryable condition.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429 | 500..=599)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        for status in [408, 429, 500, 502, 503, 504] {
            let err = ProviderError::Api {
                status,
                body: String::new(),
            };
            assert!(err.is_transient(), "{status} should be transient");
        }
    }

    #[test]
    fn client_errors_are_definitive() {
        for status in [400, 401, 403, 404, 422] {
            let err = ProviderError::Api {
                status,
                body: String::new(),
            };
            assert!(!err.is_transient(), "{status} should not be transient");
        }
    }

    #[test]
    fn rejections_are_definitive() {
        assert!(!ProviderError::Rejected("bad prompt".into()).is_transient());
        assert!(!ProviderError::Malformed("no task_id".into()).is_transient());
        assert!(!ProviderError::NotConfigured("FAL_KEY").is_transient());
        assert!(ProviderError::Transient("socket reset".into()).is_transient());
    }
}
