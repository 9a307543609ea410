use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entity::Entity;

/// Entity type under which access tokens are stored.
pub const TOKEN_ENTITY_TYPE: &str = "restful_token_auth";

/// Bundle of login access tokens within [`TOKEN_ENTITY_TYPE`].
pub const ACCESS_TOKEN_BUNDLE: &str = "access_token";

/// Label given to tokens a user issues for themselves.
pub const SELF_TOKEN_LABEL: &str = "self";

/// Typed view over an access token entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: i64,
    pub uid: i64,
    pub token_value: String,
    /// `None` means the token never expires.
    pub expire: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expire, now)
    }
}

/// A token is expired once `expire` is strictly before `now`. An unset
/// `expire` never expires.
pub fn is_expired(expire: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(expire, Some(expire) if expire < now)
}

/// Seconds left before `expire`, clamped at zero.
pub fn seconds_until(expire: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expire - now).num_seconds().max(0)
}

impl TryFrom<&Entity> for AccessToken {
    type Error = anyhow::Error;

    fn try_from(entity: &Entity) -> anyhow::Result<Self> {
        let uid = entity
            .property_i64("uid")
            .with_context(|| format!("access token {} has no uid", entity.id))?;
        let token_value = entity
            .property("token")
            .and_then(Value::as_str)
            .with_context(|| format!("access token {} has no token value", entity.id))?
            .to_string();

        Ok(Self {
            id: entity.id,
            uid,
            token_value,
            expire: timestamp_from_value(entity.property("expire")),
            created: timestamp_from_value(entity.property("created")),
        })
    }
}

/// A token about to be written by a store.
#[derive(Debug, Clone)]
pub struct NewAccessToken {
    pub uid: i64,
    pub token_value: String,
    pub expire: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

impl NewAccessToken {
    /// Fresh random token for `uid`. A `ttl` of `None` never expires.
    pub fn generate(uid: i64, now: DateTime<Utc>, ttl: Option<Duration>) -> Self {
        let mut random_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut random_bytes);

        Self {
            uid,
            token_value: hex::encode(random_bytes),
            expire: ttl.map(|ttl| now + ttl),
            created: now,
        }
    }

    /// Property bag as persisted on the entity.
    pub fn properties(&self) -> IndexMap<String, Value> {
        let mut props = IndexMap::new();
        props.insert("uid".to_string(), Value::from(self.uid));
        props.insert("token".to_string(), Value::from(self.token_value.clone()));
        props.insert("expire".to_string(), timestamp_value(self.expire));
        props.insert("created".to_string(), Value::from(self.created.timestamp()));
        props
    }
}

/// Unix seconds, or `null` when unset.
pub fn timestamp_value(ts: Option<DateTime<Utc>>) -> Value {
    ts.map(|t| Value::from(t.timestamp())).unwrap_or(Value::Null)
}

/// Zero and `null` both read as unset.
pub fn timestamp_from_value(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_i64)
        .filter(|secs| *secs != 0)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
