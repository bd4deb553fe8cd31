//! Clients for reaching the warehouse service.
//!
//! Credential acquisition is an external capability: the data-plane only
//! asks an [`Authenticator`] for a bearer token and tells it when the
//! service rejected one.

pub mod bigquery;
pub mod models;

use std::fmt;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::SinkResult;

/// Opaque credential capability.
///
/// Implementations own token refresh mechanics entirely; the data-plane
/// calls [`Authenticator::invalidate`] after an authentication failure so
/// the next [`Authenticator::access_token`] call re-authenticates instead of
/// reusing stale state.
#[async_trait]
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Resolves a bearer token for the next request.
    async fn access_token(&self) -> SinkResult<SecretString>;

    /// Drops any cached credential state. The default implementation is a
    /// no-op for authenticators that do not cache.
    fn invalidate(&self) {}
}

/// Authenticator wrapping one fixed token. Useful for tests and for hosts
/// that manage token refresh themselves.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    token: SecretString,
}

impl StaticAuthenticator {
    pub fn new(token: impl Into<String>) -> StaticAuthenticator {
        StaticAuthenticator {
            token: SecretString::new(token.into()),
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn access_token(&self) -> SinkResult<SecretString> {
        Ok(self.token.clone())
    }
}
