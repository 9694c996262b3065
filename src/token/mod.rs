//! Service credentials obtained through the OAuth2 client-credentials grant.

mod credential;
mod provider;

pub use credential::Credential;
#[cfg(feature = "mock")]
pub use provider::MockTokenProvider;
pub use provider::{token_http_client, ServiceTokenProvider, TokenProvider};
