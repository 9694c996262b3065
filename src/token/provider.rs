//! Client-credentials token acquisition with a single-flight cache.

use super::credential::Credential;
use crate::config::OAuthSettings;
use crate::error::AuthUnavailable;
use crate::server::metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use openidconnect::core::CoreClient;
use openidconnect::{
    AuthType, ClientId, ClientSecret, IssuerUrl, JsonWebKeySet, OAuth2TokenResponse,
    RequestTokenError, Scope, TokenUrl,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of bearer credentials for outbound calls.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a usable credential, requesting a new one if needed.
    async fn acquire(&self) -> Result<Credential, AuthUnavailable>;

    /// Drop any cached credential.
    fn invalidate(&self);
}

type TokenRequest = Shared<BoxFuture<'static, Result<Credential, AuthUnavailable>>>;

#[derive(Default)]
struct TokenState {
    cached: Option<Credential>,
    in_flight: Option<TokenRequest>,
}

/// Token provider for the single service identity of this process.
///
/// Holds at most one credential. When it is missing or inside the refresh
/// margin, callers share one in-flight token request and all observe its
/// result, success or failure.
#[derive(Clone)]
pub struct ServiceTokenProvider {
    inner: Arc<Inner>,
}

struct Inner {
    settings: OAuthSettings,
    http_client: reqwest::Client,
    state: Mutex<TokenState>,
}

impl ServiceTokenProvider {
    pub fn new(settings: OAuthSettings, http_client: reqwest::Client) -> Self {
        info!(
            "Service token provider configured for client {} at {}",
            settings.client_id, settings.token_uri
        );
        Self {
            inner: Arc::new(Inner {
                settings,
                http_client,
                state: Mutex::new(TokenState::default()),
            }),
        }
    }

    /// Credential currently held in the cache, usable or not.
    pub fn cached(&self) -> Option<Credential> {
        self.inner.lock_state().cached.clone()
    }
}

/// HTTP client for token requests
pub fn token_http_client(connect_timeout: Duration, read_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(connect_timeout)
        .timeout(read_timeout)
        .build()
        .context("Failed to create token HTTP client")
}

#[async_trait]
impl TokenProvider for ServiceTokenProvider {
    async fn acquire(&self) -> Result<Credential, AuthUnavailable> {
        let request = {
            let mut state = self.inner.lock_state();

            if let Some(credential) = &state.cached {
                if credential.is_usable_at(Utc::now()) {
                    return Ok(credential.clone());
                }
                debug!(
                    "Cached service token reached its refresh point ({}), refreshing",
                    credential.refresh_at()
                );
                state.cached = None;
            }

            match &state.in_flight {
                Some(request) => request.clone(),
                None => {
                    let request = Arc::clone(&self.inner).refresh().boxed().shared();
                    state.in_flight = Some(request.clone());
                    request
                }
            }
        };

        request.await
    }

    fn invalidate(&self) {
        let mut state = self.inner.lock_state();
        if state.cached.take().is_some() {
            debug!("Discarded cached service token");
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn refresh(self: Arc<Self>) -> Result<Credential, AuthUnavailable> {
        let result = self.request_token().await;

        let mut state = self.lock_state();
        state.in_flight = None;
        match &result {
            Ok(credential) => {
                metrics::record_token_request("success");
                state.cached = Some(credential.clone());
            }
            Err(err) => {
                metrics::record_token_request("failure");
                warn!("Service token request failed: {}", err);
            }
        }

        result
    }

    async fn request_token(&self) -> Result<Credential, AuthUnavailable> {
        let settings = &self.settings;

        let issuer_url = IssuerUrl::new(settings.issuer_url.clone())
            .map_err(|e| AuthUnavailable::Misconfigured(format!("issuer url: {}", e)))?;
        let token_url = TokenUrl::new(settings.token_uri.clone())
            .map_err(|e| AuthUnavailable::Misconfigured(format!("token uri: {}", e)))?;

        let client = CoreClient::new(
            ClientId::new(settings.client_id.clone()),
            issuer_url,
            JsonWebKeySet::new(Vec::new()),
        )
        .set_client_secret(ClientSecret::new(settings.client_secret.clone()))
        .set_auth_type(AuthType::RequestBody)
        .set_token_uri(token_url);

        let mut request = client.exchange_client_credentials();
        if !settings.scope.is_empty() {
            request = request.add_scope(Scope::new(settings.scope.clone()));
        }

        debug!("Requesting service token from {}", settings.token_uri);
        let issued_at = Utc::now();
        let response = request
            .request_async(&self.http_client)
            .await
            .map_err(|err| match err {
                RequestTokenError::ServerResponse(response) => {
                    AuthUnavailable::Rejected(response.to_string())
                }
                RequestTokenError::Request(err) => AuthUnavailable::Unreachable(err.to_string()),
                other => AuthUnavailable::Rejected(other.to_string()),
            })?;

        let lifetime = response
            .expires_in()
            .unwrap_or(settings.default_token_lifetime);
        let lifetime = chrono::Duration::from_std(lifetime)
            .map_err(|e| AuthUnavailable::Rejected(format!("invalid expires_in: {}", e)))?;
        let margin = chrono::Duration::from_std(settings.refresh_margin)
            .map_err(|e| AuthUnavailable::Misconfigured(format!("refresh margin: {}", e)))?;

        let scope = response
            .scopes()
            .map(|scopes| {
                scopes
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_else(|| settings.scope.clone());

        let credential = Credential::issue(
            response.access_token().secret().clone(),
            scope,
            issued_at,
            lifetime,
            margin,
        );

        if !credential.is_usable_at(Utc::now()) {
            return Err(AuthUnavailable::Rejected(
                "identity provider issued a token that expires within the refresh margin"
                    .to_string(),
            ));
        }

        info!(
            "Obtained service token for {}, expires at {}",
            settings.client_id,
            credential.expires_at()
        );
        Ok(credential)
    }
}
