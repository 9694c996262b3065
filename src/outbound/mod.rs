//! Authenticated outbound HTTP.
//!
//! Every request to the controller app goes through [`AuthenticatedClient`],
//! which attaches the service bearer token and the active correlation id
//! before handing the request to a [`Transport`].

use crate::correlation::{self, CORRELATION_ID_HEADER};
use crate::error::{AuthUnavailable, ClientError, ClientResult};
use crate::token::TokenProvider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Dispatches a fully prepared request. One attempt, no retries.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: Request) -> ClientResult<Response>;
}

#[async_trait]
impl Transport for reqwest::Client {
    async fn execute(&self, request: Request) -> ClientResult<Response> {
        reqwest::Client::execute(self, request)
            .await
            .map_err(ClientError::from)
    }
}

/// HTTP client for controller app requests
pub fn controller_http_client(
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(read_timeout)
        .build()
        .context("Failed to create controller app HTTP client")
}

/// The single chokepoint for downstream traffic.
#[derive(Clone)]
pub struct AuthenticatedClient {
    tokens: Arc<dyn TokenProvider>,
    transport: Arc<dyn Transport>,
}

impl AuthenticatedClient {
    pub fn new(tokens: Arc<dyn TokenProvider>, transport: Arc<dyn Transport>) -> Self {
        Self { tokens, transport }
    }

    /// Authenticate and dispatch `request`.
    ///
    /// When no credential can be obtained the request is dropped without
    /// being sent and the error is returned as [`ClientError::AuthUnavailable`].
    pub async fn send(&self, mut request: Request) -> ClientResult<Response> {
        let credential = self.tokens.acquire().await?;

        let mut authorization = HeaderValue::from_str(&credential.authorization_header())
            .map_err(|_| {
                AuthUnavailable::Rejected("access token is not a valid header value".to_string())
            })?;
        authorization.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, authorization);

        if let Some(correlation_id) = correlation::current() {
            match HeaderValue::from_str(correlation_id.as_str()) {
                Ok(value) => {
                    request.headers_mut().insert(CORRELATION_ID_HEADER, value);
                }
                Err(_) => warn!(
                    "Correlation id {:?} is not a valid header value, not propagated",
                    correlation_id.as_str()
                ),
            }
        }

        debug!("--> {} {}", request.method(), request.url());
        self.transport.execute(request).await
    }
}
