use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::fields::{parse_field_list, EntityView, FieldMap, Projection, ProjectionError};
use super::router::{PathRouter, PathRouterBuilder, Verb};
use crate::errors::AppError;
use crate::models::{Entity, Identity};
use crate::store::EntityStore;

// ── Request ──────────────────────────────────────────────────

/// Transport-neutral request handed to resource handlers.
#[derive(Debug, Clone, Default)]
pub struct ResourceRequest {
    /// Query-string style parameters, e.g. `fields`.
    pub params: HashMap<String, String>,
    pub body: Option<Value>,
}

impl ResourceRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Client field allow-list from `fields=a,b,c`; empty means "all".
    pub fn fields(&self) -> Vec<String> {
        parse_field_list(self.param("fields"))
    }
}

/// Arguments of a single handler invocation.
#[derive(Debug, Clone, Copy)]
pub struct HandlerCall<'a> {
    /// Path below the resource base (an entity id for entity routes).
    pub path: &'a str,
    pub request: &'a ResourceRequest,
    pub identity: &'a Identity,
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn handle(
        &self,
        resource: &ResourceRuntime,
        call: HandlerCall<'_>,
    ) -> Result<Projection, AppError>;
}

pub type RouteTable = PathRouter<Arc<dyn ResourceHandler>>;

// ── Definition ───────────────────────────────────────────────

/// Decides whether `identity` may use the resource at all.
pub type AccessCheck = fn(&ResourceDefinition, &Identity) -> bool;

pub fn always_grant(_: &ResourceDefinition, _: &Identity) -> bool {
    true
}

/// Static description of a resource, frozen once the runtime is built.
#[derive(Clone)]
pub struct ResourceDefinition {
    pub name: String,
    pub label: String,
    pub entity_type: Option<String>,
    /// Expected bundle of single entities; `None` accepts any bundle.
    pub bundle: Option<String>,
    pub base_path: String,
    pub fields: FieldMap,
    pub access: AccessCheck,
}

impl ResourceDefinition {
    pub fn new(name: &str, label: &str, base_path: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            entity_type: None,
            bundle: None,
            base_path: base_path.trim_matches('/').to_string(),
            fields: FieldMap::new(),
            access: always_grant,
        }
    }

    pub fn entity(mut self, entity_type: &str, bundle: &str) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.bundle = Some(bundle.to_string());
        self
    }

    pub fn fields(mut self, fields: FieldMap) -> Self {
        self.fields = fields;
        self
    }

    pub fn access(mut self, check: AccessCheck) -> Self {
        self.access = check;
        self
    }

    pub fn is_entity_backed(&self) -> bool {
        self.entity_type.is_some()
    }
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("name", &self.name)
            .field("label", &self.label)
            .field("entity_type", &self.entity_type)
            .field("bundle", &self.bundle)
            .field("base_path", &self.base_path)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

// ── Runtime ──────────────────────────────────────────────────

/// Generic resource: routes a request to its handler, validates entity
/// requests against the definition and projects results.
pub struct ResourceRuntime {
    definition: ResourceDefinition,
    fields: FieldMap,
    routes: RouteTable,
    store: Arc<dyn EntityStore>,
}

impl ResourceRuntime {
    pub fn new(definition: ResourceDefinition, routes: RouteTable, store: Arc<dyn EntityStore>) -> Self {
        let fields = if definition.is_entity_backed() {
            definition.fields.clone().with_entity_defaults()
        } else {
            definition.fields.clone()
        };
        Self {
            definition,
            fields,
            routes,
            store,
        }
    }

    /// `""` GET → list, `\d+` GET → entity.
    pub fn default_routes() -> PathRouterBuilder<Arc<dyn ResourceHandler>> {
        PathRouter::builder()
            .route("", Verb::Get, "list", Arc::new(ListEntities) as Arc<dyn ResourceHandler>)
            .route(r"\d+", Verb::Get, "entity", Arc::new(ViewEntity) as Arc<dyn ResourceHandler>)
    }

    /// A resource serving the default entity routes.
    pub fn with_default_routes(
        definition: ResourceDefinition,
        store: Arc<dyn EntityStore>,
    ) -> Result<Self, regex::Error> {
        Ok(Self::new(definition, Self::default_routes().build()?, store))
    }

    pub fn definition(&self) -> &ResourceDefinition {
        &self.definition
    }

    /// Declared fields plus the implicit `id`/`label`/`self`.
    pub fn public_fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn access(&self, identity: &Identity) -> bool {
        (self.definition.access)(&self.definition, identity)
    }

    /// `AccessDenied` unless `access()` grants `identity`. Handlers call this
    /// after any entity validation.
    pub fn authorize(&self, identity: &Identity) -> Result<(), AppError> {
        if self.access(identity) {
            return Ok(());
        }
        tracing::warn!(
            resource = %self.definition.name,
            uid = identity.uid,
            "resource access denied"
        );
        Err(AppError::AccessDenied {
            resource: self.definition.label.clone(),
        })
    }

    pub async fn process(
        &self,
        path: &str,
        request: &ResourceRequest,
        verb: Verb,
        identity: &Identity,
    ) -> Result<Projection, AppError> {
        let route = self.routes.resolve(path, verb)?;

        tracing::debug!(
            resource = %self.definition.name,
            handler = %route.name,
            path = path,
            uid = identity.uid,
            "dispatching resource request"
        );

        route
            .handler
            .handle(
                self,
                HandlerCall {
                    path,
                    request,
                    identity,
                },
            )
            .await
    }

    /// Single entity, limited to the client's `fields` allow-list.
    pub async fn get_entity(
        &self,
        id: &str,
        request: &ResourceRequest,
        identity: &Identity,
    ) -> Result<Projection, AppError> {
        let entity = self.validate_entity(id).await?;
        self.authorize(identity)?;
        Ok(self.project(&entity, &request.fields())?)
    }

    /// Single entity with its full declared field set.
    pub async fn view(&self, id: i64) -> Result<Projection, AppError> {
        let entity = self.validate_entity(&id.to_string()).await?;
        Ok(self.project(&entity, &[])?)
    }

    /// Load `id` and check it against the configured type and bundle.
    pub async fn validate_entity(&self, id: &str) -> Result<Entity, AppError> {
        let not_found = || AppError::EntityNotFound {
            id: id.to_string(),
            resource: self.definition.label.clone(),
        };

        let entity_type = self.definition.entity_type.as_deref().ok_or_else(not_found)?;
        let numeric_id: i64 = id.parse().map_err(|_| not_found())?;
        let entity = self
            .store
            .load(entity_type, numeric_id)
            .await?
            .ok_or_else(not_found)?;

        self.check_bundle(&entity)?;
        Ok(entity)
    }

    /// Full field set of an entity the caller already holds, after the same
    /// type and bundle checks `validate_entity` applies.
    pub fn render(&self, entity: &Entity) -> Result<Projection, AppError> {
        if self.definition.entity_type.as_deref() != Some(entity.entity_type.as_str()) {
            return Err(AppError::EntityNotFound {
                id: entity.id.to_string(),
                resource: self.definition.label.clone(),
            });
        }
        self.check_bundle(entity)?;
        Ok(self.project(entity, &[])?)
    }

    fn check_bundle(&self, entity: &Entity) -> Result<(), AppError> {
        match &self.definition.bundle {
            Some(bundle) if &entity.bundle != bundle => Err(AppError::EntityMismatch {
                id: entity.id.to_string(),
                resource: self.definition.label.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn project(&self, entity: &Entity, allow: &[String]) -> Result<Projection, ProjectionError> {
        let view = BoundEntity {
            entity,
            url: format!("{}/{}", self.definition.base_path, entity.id),
        };
        self.fields.project(&view, allow)
    }
}

/// An entity as seen through one resource: `url` resolves to the entity's
/// address under that resource unless the entity stores its own.
struct BoundEntity<'a> {
    entity: &'a Entity,
    url: String,
}

impl EntityView for BoundEntity<'_> {
    fn identifier(&self) -> Value {
        Value::from(self.entity.id)
    }

    fn label(&self) -> Value {
        self.entity
            .label
            .clone()
            .map(Value::from)
            .unwrap_or(Value::Null)
    }

    fn get_property(&self, name: &str) -> Result<Value, ProjectionError> {
        if let Some(value) = self.entity.property(name) {
            return Ok(value.clone());
        }
        if name == "url" {
            return Ok(Value::from(self.url.clone()));
        }
        Err(ProjectionError::PropertyMissing(name.to_string()))
    }
}

// ── Default handlers ─────────────────────────────────────────

/// `getList`: no collection semantics, answers with an empty object.
pub struct ListEntities;

#[async_trait]
impl ResourceHandler for ListEntities {
    async fn handle(
        &self,
        resource: &ResourceRuntime,
        call: HandlerCall<'_>,
    ) -> Result<Projection, AppError> {
        resource.authorize(call.identity)?;
        Ok(Projection::new())
    }
}

/// `getEntity`: validated, field-limited single entity.
pub struct ViewEntity;

#[async_trait]
impl ResourceHandler for ViewEntity {
    async fn handle(
        &self,
        resource: &ResourceRuntime,
        call: HandlerCall<'_>,
    ) -> Result<Projection, AppError> {
        resource
            .get_entity(call.path, call.request, call.identity)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::memory::MemoryStore;
    use chrono::Utc;
    use indexmap::IndexMap;
    use serde_json::json;

    fn page_props(title: &str, body: Value) -> IndexMap<String, Value> {
        let mut props = IndexMap::new();
        props.insert("title".to_string(), json!(title));
        props.insert("body".to_string(), body);
        props
    }

    fn setup() -> (Arc<MemoryStore>, ResourceRuntime) {
        let store = Arc::new(MemoryStore::new(Arc::new(ManualClock::new(Utc::now())), None));
        let definition = ResourceDefinition::new("articles", "Article", "/api/articles/")
            .entity("node", "article")
            .fields(FieldMap::new().field("title").field("body"));
        let runtime =
            ResourceRuntime::with_default_routes(definition, store.clone() as Arc<dyn EntityStore>)
                .unwrap();
        (store, runtime)
    }

    #[tokio::test]
    async fn test_get_entity_projects_declared_then_default_fields() {
        let (store, runtime) = setup();
        let article = store.insert("node", "article", Some("Hello"), page_props("Hello", json!("text")));

        let out = runtime
            .process(&article.id.to_string(), &ResourceRequest::new(), Verb::Get, &Identity::new(1))
            .await
            .unwrap();

        let keys: Vec<_> = out.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["title", "body", "id", "label", "self"]);
        assert_eq!(out["id"], json!(article.id));
        assert_eq!(out["label"], json!("Hello"));
        assert_eq!(out["self"], json!(format!("api/articles/{}", article.id)));
    }

    #[tokio::test]
    async fn test_get_entity_honours_fields_param() {
        let (store, runtime) = setup();
        let article = store.insert("node", "article", None, page_props("Hello", json!("text")));
        let request = ResourceRequest::new().with_param("fields", "title");

        let out = runtime
            .process(&article.id.to_string(), &request, Verb::Get, &Identity::new(1))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out["title"], json!("Hello"));
    }

    #[tokio::test]
    async fn test_empty_property_and_null_label() {
        let (store, runtime) = setup();
        let article = store.insert("node", "article", None, page_props("Hello", json!("")));
        let out = runtime.view(article.id).await.unwrap();
        assert!(!out.contains_key("body"));
        // Derivations are emitted even when null.
        assert_eq!(out["label"], Value::Null);
    }

    #[tokio::test]
    async fn test_bundle_mismatch() {
        let (store, runtime) = setup();
        let page = store.insert("node", "page", None, page_props("About", json!("x")));
        let err = runtime
            .process(&page.id.to_string(), &ResourceRequest::new(), Verb::Get, &Identity::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EntityMismatch { .. }));
    }

    #[tokio::test]
    async fn test_unknown_id_is_entity_not_found() {
        let (_, runtime) = setup();
        let err = runtime
            .process("999", &ResourceRequest::new(), Verb::Get, &Identity::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EntityNotFound { ref id, .. } if id == "999"));
    }

    #[tokio::test]
    async fn test_non_numeric_entity_path_is_entity_not_found() {
        // `\d+` is a search, so "a1" routes to the entity handler.
        let (_, runtime) = setup();
        let err = runtime
            .process("a1", &ResourceRequest::new(), Verb::Get, &Identity::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EntityNotFound { .. }));
    }

    #[tokio::test]
    async fn test_validation_runs_before_projection() {
        // The field map references a property the stored page lacks, but the
        // bundle check fails first.
        let (store, runtime) = setup();
        let page = store.insert("node", "page", None, IndexMap::new());
        let err = runtime.view(page.id).await.unwrap_err();
        assert!(matches!(err, AppError::EntityMismatch { .. }));
    }

    #[tokio::test]
    async fn test_missing_property_is_reported() {
        let (store, runtime) = setup();
        let article = store.insert("node", "article", None, IndexMap::new());
        let err = runtime.view(article.id).await.unwrap_err();
        assert!(matches!(err, AppError::PropertyMissing { ref property } if property == "title"));
    }

    #[tokio::test]
    async fn test_list_and_routing_errors() {
        let (_, runtime) = setup();
        let identity = Identity::new(1);
        let request = ResourceRequest::new();

        let out = runtime.process("", &request, Verb::Get, &identity).await.unwrap();
        assert!(out.is_empty());

        let err = runtime.process("42", &request, Verb::Post, &identity).await.unwrap_err();
        assert!(matches!(err, AppError::HandlerNotFound { .. }));

        let err = runtime.process("latest", &request, Verb::Get, &identity).await.unwrap_err();
        assert!(matches!(err, AppError::RouteNotFound { .. }));
    }

    #[tokio::test]
    async fn test_access_check_can_deny() {
        let store = Arc::new(MemoryStore::new(Arc::new(ManualClock::new(Utc::now())), None));
        let definition = ResourceDefinition::new("admin", "Admin", "api/admin")
            .entity("node", "article")
            .access(|_, identity| identity.uid == 1);
        let runtime =
            ResourceRuntime::with_default_routes(definition, store as Arc<dyn EntityStore>).unwrap();

        let err = runtime
            .process("", &ResourceRequest::new(), Verb::Get, &Identity::new(2))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AccessDenied { .. }));
        assert!(runtime.access(&Identity::new(1)));
    }

    #[tokio::test]
    async fn test_render_checks_type_and_bundle() {
        let (store, runtime) = setup();
        let article = store.insert("node", "article", Some("Hi"), page_props("Hi", json!("x")));
        let out = runtime.render(&article).unwrap();
        assert_eq!(out["title"], json!("Hi"));
        assert_eq!(out["self"], json!(format!("api/articles/{}", article.id)));

        let page = store.insert("node", "page", None, page_props("About", json!("x")));
        assert!(matches!(runtime.render(&page), Err(AppError::EntityMismatch { .. })));

        let user = store.insert("user", "article", None, page_props("Ada", json!("x")));
        assert!(matches!(runtime.render(&user), Err(AppError::EntityNotFound { .. })));
    }

    #[tokio::test]
    async fn test_entity_validation_precedes_access_check() {
        let store = Arc::new(MemoryStore::new(Arc::new(ManualClock::new(Utc::now())), None));
        let definition = ResourceDefinition::new("admin", "Admin", "api/admin")
            .entity("node", "article")
            .fields(FieldMap::new().field("title"))
            .access(|_, identity| identity.uid == 1);
        let runtime = ResourceRuntime::with_default_routes(
            definition,
            store.clone() as Arc<dyn EntityStore>,
        )
        .unwrap();
        let request = ResourceRequest::new();
        let outsider = Identity::new(2);

        let err = runtime.process("999", &request, Verb::Get, &outsider).await.unwrap_err();
        assert!(matches!(err, AppError::EntityNotFound { .. }));

        let page = store.insert("node", "page", None, IndexMap::new());
        let err = runtime
            .process(&page.id.to_string(), &request, Verb::Get, &outsider)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EntityMismatch { .. }));

        let article = store.insert("node", "article", None, page_props("Hi", json!("x")));
        let err = runtime
            .process(&article.id.to_string(), &request, Verb::Get, &outsider)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AccessDenied { .. }));

        let out = runtime
            .process(&article.id.to_string(), &request, Verb::Get, &Identity::new(1))
            .await
            .unwrap();
        assert_eq!(out["title"], json!("Hi"));
    }

    #[test]
    fn test_base_path_is_normalised_and_defaults_appended() {
        let (_, runtime) = setup();
        assert_eq!(runtime.definition().base_path, "api/articles");
        let names: Vec<_> = runtime.public_fields().names().collect();
        assert_eq!(names, vec!["title", "body", "id", "label", "self"]);
    }

    #[test]
    fn test_non_entity_resource_has_no_defaults() {
        let store = Arc::new(MemoryStore::new(Arc::new(ManualClock::new(Utc::now())), None));
        let definition = ResourceDefinition::new("status", "Status", "api/status")
            .fields(FieldMap::new().field("version"));
        let runtime =
            ResourceRuntime::with_default_routes(definition, store as Arc<dyn EntityStore>).unwrap();
        assert_eq!(runtime.public_fields().len(), 1);
    }
}
