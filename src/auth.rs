//! Bearer tokens for identity-based destination credentials.
//!
//! Token acquisition is left to the application: plug in anything that can hand out an
//! OAuth access token for a scope (a managed-identity endpoint, a CLI cache, a fixed token in
//! tests).

use crate::error::SinkError;
use chrono::{DateTime, Utc};
use std::fmt;

/// Scope requested for the streaming endpoint.
pub const EVENT_HUBS_SCOPE: &str = "https://eventhubs.azure.net/.default";
/// Scope requested for the lakehouse file store.
pub const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into(), expires_at: None }
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies access tokens on demand. Called from synchronous client callbacks, so it must not
/// block on async work.
pub trait TokenSource: Send + Sync {
    fn token(&self, scope: &str) -> Result<AccessToken, SinkError>;
}

impl<F> TokenSource for F
where
    F: Fn(&str) -> Result<AccessToken, SinkError> + Send + Sync,
{
    fn token(&self, scope: &str) -> Result<AccessToken, SinkError> {
        self(scope)
    }
}

/// Always returns the same token, whatever the scope.
#[derive(Debug, Clone)]
pub struct StaticToken(AccessToken);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(AccessToken::new(token))
    }
}

impl TokenSource for StaticToken {
    fn token(&self, _scope: &str) -> Result<AccessToken, SinkError> {
        Ok(self.0.clone())
    }
}
