//! Error types for calls made to the controller app.

use reqwest::StatusCode;
use thiserror::Error;

/// The identity provider could not issue a service credential.
///
/// Cloneable so that every caller waiting on the same token request can be
/// handed the same failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthUnavailable {
    #[error("identity provider rejected the token request: {0}")]
    Rejected(String),

    #[error("identity provider unreachable: {0}")]
    Unreachable(String),

    #[error("token endpoint misconfigured: {0}")]
    Misconfigured(String),
}

/// Errors surfaced by the outbound call pipeline.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No credential could be obtained; the request was never dispatched.
    #[error("authentication unavailable: {0}")]
    AuthUnavailable(#[from] AuthUnavailable),

    /// The controller app answered with a client or server error status.
    #[error("controller app returned {status}: {body}")]
    Downstream { status: StatusCode, body: String },

    /// Network-level failure (timeout, connection refused, broken body).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request url: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::AuthUnavailable(_) => "auth_unavailable",
            ClientError::Downstream { .. } => "downstream_error",
            ClientError::Transport(_) => "transport_error",
            ClientError::InvalidUrl(_) => "invalid_url",
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
