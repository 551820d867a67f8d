use std::time::Duration;

/// Typed error hierarchy for inference backend calls.
///
/// Two broad classes exist: transport/quota failures and content/policy
/// failures. The inference client retries both identically, the split only
/// feeds logging and operator reports.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    // Transport / quota
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("backend overloaded")]
    Overloaded,
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // Content / policy
    #[error("completion blocked: {0}")]
    Blocked(String),
    #[error("backend returned an empty completion")]
    EmptyCompletion,
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    // Configuration
    #[error("no credentials configured")]
    MissingCredentials,
}

impl GatewayError {
    /// Timeouts, quota exhaustion and server-side failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_)
                | Self::InvalidRequest(_)
                | Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::Overloaded
                | Self::Network(_)
                | Self::Timeout(_)
        )
    }

    /// Empty completions, safety blocks and unparseable bodies.
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            Self::Blocked(_) | Self::EmptyCompletion | Self::MalformedResponse(_)
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Overloaded => "overloaded",
            Self::Network(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::Blocked(_) => "blocked",
            Self::EmptyCompletion => "empty_completion",
            Self::MalformedResponse(_) => "malformed_response",
            Self::MissingCredentials => "missing_credentials",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            503 | 529 => Self::Overloaded,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
