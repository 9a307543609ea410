//! Identity resolution at the HTTP edge.
//!
//! Resources never look up a "current user" themselves; the transport asks
//! each configured provider in turn and passes the first identity found.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::clock::Clock;
use crate::errors::AppError;
use crate::models::token::{ACCESS_TOKEN_BUNDLE, TOKEN_ENTITY_TYPE};
use crate::models::{AccessToken, Identity};
use crate::store::{EntityQuery, EntityStore};

/// Set by the fronting login layer (session or basic auth) once it has
/// authenticated the caller.
pub const TRUSTED_UID_HEADER: &str = "x-authenticated-uid";
pub const TRUSTED_NAME_HEADER: &str = "x-authenticated-name";

/// Header carrying a previously issued access token.
pub const ACCESS_TOKEN_HEADER: &str = "access-token";

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the request carries no credentials this provider
    /// accepts.
    async fn identify(&self, headers: &HeaderMap) -> anyhow::Result<Option<Identity>>;
}

/// Trusts the uid forwarded by the login layer in front of the service.
/// Only sound when that layer strips the header from client requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustedHeaderProvider;

#[async_trait]
impl IdentityProvider for TrustedHeaderProvider {
    fn name(&self) -> &'static str {
        "trusted_header"
    }

    async fn identify(&self, headers: &HeaderMap) -> anyhow::Result<Option<Identity>> {
        let Some(raw) = headers.get(TRUSTED_UID_HEADER).and_then(|v| v.to_str().ok()) else {
            return Ok(None);
        };
        let Ok(uid) = raw.trim().parse::<i64>() else {
            tracing::warn!("ignoring malformed {} header", TRUSTED_UID_HEADER);
            return Ok(None);
        };
        let name = headers
            .get(TRUSTED_NAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        Ok(Some(Identity { uid, name }))
    }
}

/// Authenticates requests by a previously issued access token.
pub struct TokenAuthenticator {
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    delete_expired: bool,
}

impl TokenAuthenticator {
    pub fn new(store: Arc<dyn EntityStore>, clock: Arc<dyn Clock>, delete_expired: bool) -> Self {
        Self {
            store,
            clock,
            delete_expired,
        }
    }

    /// Identity owning `token_value`, if that token exists and is live.
    pub async fn authenticate(&self, token_value: &str) -> anyhow::Result<Option<Identity>> {
        let query = EntityQuery::new(TOKEN_ENTITY_TYPE)
            .bundle(ACCESS_TOKEN_BUNDLE)
            .condition("token", token_value)
            .limit(1);

        let ids = self.store.query(&query).await?;
        let Some(&id) = ids.first() else {
            tracing::debug!("unknown access token presented");
            return Ok(None);
        };
        let Some(entity) = self.store.load(TOKEN_ENTITY_TYPE, id).await? else {
            return Ok(None);
        };

        let token = AccessToken::try_from(&entity)?;
        if token.is_expired(self.clock.now()) {
            if self.delete_expired {
                self.store.delete(&entity).await?;
            }
            tracing::debug!(token_id = id, uid = token.uid, "expired access token presented");
            return Ok(None);
        }

        Ok(Some(Identity::new(token.uid)))
    }
}

#[async_trait]
impl IdentityProvider for TokenAuthenticator {
    fn name(&self) -> &'static str {
        "access_token"
    }

    async fn identify(&self, headers: &HeaderMap) -> anyhow::Result<Option<Identity>> {
        match bearer_token(headers) {
            Some(token) => self.authenticate(token).await,
            None => Ok(None),
        }
    }
}

/// Token from `access-token`, falling back to `Authorization: Bearer`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// First identity any provider yields, or `Unauthorized`.
pub async fn resolve_identity(
    providers: &[Arc<dyn IdentityProvider>],
    headers: &HeaderMap,
) -> Result<Identity, AppError> {
    for provider in providers {
        if let Some(identity) = provider.identify(headers).await? {
            tracing::debug!(provider = provider.name(), uid = identity.uid, "identity resolved");
            return Ok(identity);
        }
    }
    tracing::warn!("request carried no usable credentials");
    Err(AppError::Unauthorized)
}
