use chrono::{DateTime, Duration, Utc};

/// A bearer token issued for the service identity.
///
/// Credentials are never mutated: a refresh produces a new one.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
    scope: String,
    expires_at: DateTime<Utc>,
    refresh_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential issued at `issued_at` for `lifetime`.
    ///
    /// The credential stops being usable `margin` before it expires. A
    /// lifetime at or below the margin yields a credential that is never
    /// usable.
    pub fn issue(
        access_token: impl Into<String>,
        scope: impl Into<String>,
        issued_at: DateTime<Utc>,
        lifetime: Duration,
        margin: Duration,
    ) -> Self {
        let lifetime = lifetime.max(Duration::zero());
        let margin = margin.max(Duration::zero());
        let expires_at = issued_at + lifetime;
        Self {
            access_token: access_token.into(),
            scope: scope.into(),
            expires_at,
            refresh_at: expires_at - margin,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Instant from which the credential must be refreshed.
    pub fn refresh_at(&self) -> DateTime<Utc> {
        self.refresh_at
    }

    /// `true` while `now < expires_at - margin`.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_at
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .field("refresh_at", &self.refresh_at)
            .finish()
    }
}
