//! Login token resource.
//!
//! `GET {base}/login-token` hands the caller their access token. A live token
//! is returned as-is; a missing or expired one is replaced by a fresh token
//! from the store. Expired tokens are deleted on discovery unless
//! `delete_expired_tokens` is off, in which case they are left behind.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::errors::AppError;
use crate::models::token::{
    is_expired, seconds_until, timestamp_from_value, ACCESS_TOKEN_BUNDLE, TOKEN_ENTITY_TYPE,
};
use crate::models::Entity;
use crate::resource::runtime::{HandlerCall, ResourceDefinition, ResourceHandler, ResourceRuntime};
use crate::resource::{FieldMap, PathRouter, Projection, Verb};
use crate::store::{EntityQuery, EntityStore};

pub const RESOURCE_NAME: &str = "access_token";
pub const RESOURCE_LABEL: &str = "Access token authentication";

#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub api_base_path: String,
    pub login_path_segment: String,
    pub delete_expired_tokens: bool,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            api_base_path: "api".to_string(),
            login_path_segment: "login-token".to_string(),
            delete_expired_tokens: true,
        }
    }
}

impl TokenSettings {
    /// `{api_base_path}/{login_path_segment}`, without surrounding slashes.
    pub fn base_path(&self) -> String {
        let base = self.api_base_path.trim_matches('/');
        let segment = self.login_path_segment.trim_matches('/');
        if base.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{}", base, segment)
        }
    }
}

/// Public shape of a token: bearer value, type and expiry, followed by the
/// implicit `id`, `label` and `self`.
pub fn token_fields(clock: Arc<dyn Clock>) -> FieldMap {
    FieldMap::new()
        .property("access_token", "token")
        .derived("type", "tokenType", |_| json!("Bearer"))
        .derived("expires_in", "expiresIn", move |entity| {
            let expire = entity.get_property("expire").ok();
            timestamp_from_value(expire.as_ref())
                .map(|expire| Value::from(seconds_until(expire, clock.now())))
                .unwrap_or(Value::Null)
        })
        .field("expire")
}

/// Build the login token resource. Only the collection path is routed.
pub fn access_token_resource(
    settings: &TokenSettings,
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<ResourceRuntime> {
    let definition = ResourceDefinition::new(RESOURCE_NAME, RESOURCE_LABEL, &settings.base_path())
        .entity(TOKEN_ENTITY_TYPE, ACCESS_TOKEN_BUNDLE)
        .fields(token_fields(clock.clone()));

    let handler: Arc<dyn ResourceHandler> =
        Arc::new(GetOrCreateToken::new(clock, settings.delete_expired_tokens));
    let routes = PathRouter::builder()
        .route("", Verb::Get, "orCreateToken", handler)
        .build()?;

    Ok(ResourceRuntime::new(definition, routes, store))
}

/// `getOrCreateToken`.
///
/// The check-then-create sequence is serialized per uid, so concurrent
/// requests from one identity within this process observe a single token.
pub struct GetOrCreateToken {
    clock: Arc<dyn Clock>,
    delete_expired: bool,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl GetOrCreateToken {
    pub fn new(clock: Arc<dyn Clock>, delete_expired: bool) -> Self {
        Self {
            clock,
            delete_expired,
            locks: DashMap::new(),
        }
    }

    fn slot(&self, uid: i64) -> UidSlot<'_> {
        let lock = self.locks.entry(uid).or_default().clone();
        UidSlot {
            locks: &self.locks,
            uid,
            lock,
        }
    }

    /// The caller's most recent token if it is still live. An expired token
    /// is deleted here when configured to.
    async fn find_live_token(
        &self,
        store: &dyn EntityStore,
        entity_type: &str,
        uid: i64,
    ) -> Result<Option<Entity>, AppError> {
        let query = EntityQuery::new(entity_type)
            .bundle(ACCESS_TOKEN_BUNDLE)
            .condition("uid", uid)
            .limit(1);

        let ids = store.query(&query).await?;
        let Some(&id) = ids.first() else {
            return Ok(None);
        };
        let Some(entity) = store.load(entity_type, id).await? else {
            return Ok(None);
        };

        let expire = timestamp_from_value(entity.property("expire"));
        if !is_expired(expire, self.clock.now()) {
            return Ok(Some(entity));
        }

        if self.delete_expired {
            store.delete(&entity).await?;
            tracing::info!(uid = uid, token_id = id, "deleted expired access token");
        } else {
            tracing::debug!(uid = uid, token_id = id, "expired access token left in storage");
        }
        Ok(None)
    }

    async fn get_or_create(&self, resource: &ResourceRuntime, uid: i64) -> Result<Entity, AppError> {
        let entity_type = resource
            .definition()
            .entity_type
            .as_deref()
            .unwrap_or(TOKEN_ENTITY_TYPE);
        let store = resource.store().as_ref();

        if let Some(token) = self.find_live_token(store, entity_type, uid).await? {
            tracing::debug!(uid = uid, token_id = token.id, "reusing live access token");
            return Ok(token);
        }

        let token = store.generate_access_token(uid).await?;
        tracing::info!(uid = uid, token_id = token.id, "issued access token");
        Ok(token)
    }
}

#[async_trait]
impl ResourceHandler for GetOrCreateToken {
    async fn handle(
        &self,
        resource: &ResourceRuntime,
        call: HandlerCall<'_>,
    ) -> Result<Projection, AppError> {
        resource.authorize(call.identity)?;
        let uid = call.identity.uid;

        let slot = self.slot(uid);
        let _guard = slot.lock.lock().await;
        let token = self.get_or_create(resource, uid).await?;

        // Rendered from the entity in hand, not reloaded. Always the full
        // field set.
        resource.render(&token)
    }
}

/// A uid's issuance lock, checked out of the lock map. Dropping it removes
/// the map entry once nobody else holds or waits on the lock, including when
/// the request future is cancelled mid-flight.
struct UidSlot<'a> {
    locks: &'a DashMap<i64, Arc<Mutex<()>>>,
    uid: i64,
    lock: Arc<Mutex<()>>,
}

impl Drop for UidSlot<'_> {
    fn drop(&mut self) {
        // Unused when only the map and this slot still reference it.
        self.locks
            .remove_if(&self.uid, |_, lock| Arc::strong_count(lock) == 2);
    }
}
