pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::Entity;

/// Abstraction over entity storage backends.
/// Implementations: MemoryStore (process-local), PgStore (JSONB rows in PG).
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Ids of entities matching `query`, most recent (highest id) first.
    async fn query(&self, query: &EntityQuery) -> anyhow::Result<Vec<i64>>;

    /// Load an entity of `entity_type` by id. `None` if there is none.
    async fn load(&self, entity_type: &str, id: i64) -> anyhow::Result<Option<Entity>>;

    async fn delete(&self, entity: &Entity) -> anyhow::Result<()>;

    /// Create and persist a new access token bound to `uid`.
    /// The store owns token value generation and the expiry period.
    async fn generate_access_token(&self, uid: i64) -> anyhow::Result<Entity>;
}

/// Condition-based entity lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityQuery {
    pub entity_type: String,
    pub bundle: Option<String>,
    /// Property name → required value (equality).
    pub conditions: Vec<(String, Value)>,
    pub limit: Option<usize>,
}

impl EntityQuery {
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            bundle: None,
            conditions: Vec::new(),
            limit: None,
        }
    }

    pub fn bundle(mut self, bundle: &str) -> Self {
        self.bundle = Some(bundle.to_string());
        self
    }

    pub fn condition(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((property.to_string(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `entity` satisfies type, bundle and every property condition.
    pub fn matches(&self, entity: &Entity) -> bool {
        entity.entity_type == self.entity_type
            && self.bundle.as_deref().map_or(true, |b| entity.bundle == b)
            && self
                .conditions
                .iter()
                .all(|(name, value)| entity.property(name) == Some(value))
    }

    /// Conditions as a JSON object, for containment queries.
    pub fn conditions_object(&self) -> Value {
        Value::Object(self.conditions.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use serde_json::json;

    fn entity(bundle: &str, uid: i64) -> Entity {
        let mut properties = IndexMap::new();
        properties.insert("uid".to_string(), json!(uid));
        Entity {
            id: 1,
            entity_type: "restful_token_auth".into(),
            bundle: bundle.into(),
            label: None,
            properties,
        }
    }

    #[test]
    fn test_query_matches_type_bundle_and_conditions() {
        let q = EntityQuery::new("restful_token_auth")
            .bundle("access_token")
            .condition("uid", 5);
        assert!(q.matches(&entity("access_token", 5)));
        assert!(!q.matches(&entity("access_token", 6)));
        assert!(!q.matches(&entity("refresh_token", 5)));
    }

    #[test]
    fn test_query_without_bundle_matches_any_bundle() {
        let q = EntityQuery::new("restful_token_auth");
        assert!(q.matches(&entity("access_token", 5)));
        assert!(q.matches(&entity("page", 5)));
        assert!(!EntityQuery::new("node").matches(&entity("page", 5)));
    }

    #[test]
    fn test_conditions_object() {
        let q = EntityQuery::new("t").condition("uid", 5).condition("token", "abc");
        assert_eq!(q.conditions_object(), json!({"uid": 5, "token": "abc"}));
    }
}
