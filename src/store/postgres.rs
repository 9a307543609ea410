use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use indexmap::IndexMap;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;

use super::{EntityQuery, EntityStore};
use crate::clock::Clock;
use crate::models::token::{ACCESS_TOKEN_BUNDLE, SELF_TOKEN_LABEL, TOKEN_ENTITY_TYPE};
use crate::models::{Entity, NewAccessToken};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    token_ttl: Option<Duration>,
}

impl PgStore {
    pub async fn connect(
        database_url: &str,
        clock: Arc<dyn Clock>,
        token_ttl: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self {
            pool,
            clock,
            token_ttl,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn query(&self, query: &EntityQuery) -> anyhow::Result<Vec<i64>> {
        let limit = query.limit.map(i64::try_from).transpose()?;
        let ids = sqlx::query_scalar::<_, i64>(
            r#"SELECT id FROM entities
               WHERE entity_type = $1
                 AND ($2::TEXT IS NULL OR bundle = $2)
                 AND properties @> $3
               ORDER BY id DESC
               LIMIT $4"#,
        )
        .bind(&query.entity_type)
        .bind(query.bundle.as_deref())
        .bind(Json(query.conditions_object()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn load(&self, entity_type: &str, id: i64) -> anyhow::Result<Option<Entity>> {
        let row = sqlx::query_as::<_, EntityRow>(
            "SELECT id, entity_type, bundle, label, properties FROM entities WHERE entity_type = $1 AND id = $2",
        )
        .bind(entity_type)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Entity::from))
    }

    async fn delete(&self, entity: &Entity) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM entities WHERE entity_type = $1 AND id = $2")
            .bind(&entity.entity_type)
            .bind(entity.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn generate_access_token(&self, uid: i64) -> anyhow::Result<Entity> {
        let new = NewAccessToken::generate(uid, self.clock.now(), self.token_ttl);
        let properties = new.properties();

        let id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO entities (entity_type, bundle, label, properties)
               VALUES ($1, $2, $3, $4)
               RETURNING id"#,
        )
        .bind(TOKEN_ENTITY_TYPE)
        .bind(ACCESS_TOKEN_BUNDLE)
        .bind(SELF_TOKEN_LABEL)
        .bind(Json(properties.clone()))
        .fetch_one(&self.pool)
        .await?;

        Ok(Entity {
            id,
            entity_type: TOKEN_ENTITY_TYPE.to_string(),
            bundle: ACCESS_TOKEN_BUNDLE.to_string(),
            label: Some(SELF_TOKEN_LABEL.to_string()),
            properties,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntityRow {
    id: i64,
    entity_type: String,
    bundle: String,
    label: Option<String>,
    properties: Json<IndexMap<String, Value>>,
}

impl From<EntityRow> for Entity {
    fn from(row: EntityRow) -> Self {
        Entity {
            id: row.id,
            entity_type: row.entity_type,
            bundle: row.bundle,
            label: row.label,
            properties: row.properties.0,
        }
    }
}
