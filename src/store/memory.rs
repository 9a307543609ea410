use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::Value;

use super::{EntityQuery, EntityStore};
use crate::clock::Clock;
use crate::models::token::{ACCESS_TOKEN_BUNDLE, SELF_TOKEN_LABEL, TOKEN_ENTITY_TYPE};
use crate::models::{Entity, NewAccessToken};

/// Process-local entity store. Ids are assigned from a single counter
/// shared by every entity type, starting at 1.
pub struct MemoryStore {
    entities: DashMap<i64, Entity>,
    next_id: AtomicI64,
    clock: Arc<dyn Clock>,
    token_ttl: Option<Duration>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>, token_ttl: Option<Duration>) -> Self {
        Self {
            entities: DashMap::new(),
            next_id: AtomicI64::new(1),
            clock,
            token_ttl,
        }
    }

    /// Insert an arbitrary entity and return it with its assigned id.
    pub fn insert(
        &self,
        entity_type: &str,
        bundle: &str,
        label: Option<&str>,
        properties: IndexMap<String, Value>,
    ) -> Entity {
        let entity = Entity {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            entity_type: entity_type.to_string(),
            bundle: bundle.to_string(),
            label: label.map(String::from),
            properties,
        };
        self.entities.insert(entity.id, entity.clone());
        entity
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entities.contains_key(&id)
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn query(&self, query: &EntityQuery) -> anyhow::Result<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .entities
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        if let Some(limit) = query.limit {
            ids.truncate(limit);
        }
        Ok(ids)
    }

    async fn load(&self, entity_type: &str, id: i64) -> anyhow::Result<Option<Entity>> {
        Ok(self
            .entities
            .get(&id)
            .filter(|entry| entry.entity_type == entity_type)
            .map(|entry| entry.value().clone()))
    }

    async fn delete(&self, entity: &Entity) -> anyhow::Result<()> {
        self.entities.remove(&entity.id);
        Ok(())
    }

    async fn generate_access_token(&self, uid: i64) -> anyhow::Result<Entity> {
        let new = NewAccessToken::generate(uid, self.clock.now(), self.token_ttl);
        Ok(self.insert(
            TOKEN_ENTITY_TYPE,
            ACCESS_TOKEN_BUNDLE,
            Some(SELF_TOKEN_LABEL),
            new.properties(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn store() -> MemoryStore {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ));
        MemoryStore::new(clock, Some(Duration::seconds(3600)))
    }

    #[tokio::test]
    async fn test_generate_assigns_increasing_ids() {
        let store = store();
        let a = store.generate_access_token(5).await.unwrap();
        let b = store.generate_access_token(5).await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.bundle, ACCESS_TOKEN_BUNDLE);
        assert_eq!(a.property("uid"), Some(&json!(5)));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_query_orders_newest_first_and_limits() {
        let store = store();
        let a = store.generate_access_token(5).await.unwrap();
        let b = store.generate_access_token(5).await.unwrap();
        store.generate_access_token(6).await.unwrap();

        let q = EntityQuery::new(TOKEN_ENTITY_TYPE)
            .bundle(ACCESS_TOKEN_BUNDLE)
            .condition("uid", 5);
        assert_eq!(store.query(&q).await.unwrap(), vec![b.id, a.id]);
        assert_eq!(store.query(&q.limit(1)).await.unwrap(), vec![b.id]);
    }

    #[tokio::test]
    async fn test_load_checks_entity_type() {
        let store = store();
        let page = store.insert("node", "page", Some("About"), IndexMap::new());
        assert!(store.load("node", page.id).await.unwrap().is_some());
        assert!(store.load(TOKEN_ENTITY_TYPE, page.id).await.unwrap().is_none());
        assert!(store.load("node", 999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_entity() {
        let store = store();
        let token = store.generate_access_token(1).await.unwrap();
        store.delete(&token).await.unwrap();
        assert!(!store.contains(token.id));
        assert!(store.is_empty());
    }
}
