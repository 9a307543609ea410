use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    routing::{any, get},
    Json, Router,
};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::auth::{resolve_identity, IdentityProvider, TokenAuthenticator, TrustedHeaderProvider};
use crate::clock::Clock;
use crate::config::Config;
use crate::errors::AppError;
use crate::resource::{Projection, ResourceRequest, ResourceRuntime, Verb};
use crate::store::EntityStore;
use crate::token::access_token_resource;

/// Shared state behind every request: mounted resources keyed by their path
/// segment below the API base path, and the identity providers consulted in
/// order.
pub struct AppState {
    pub config: Config,
    resources: HashMap<String, Arc<ResourceRuntime>>,
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl AppState {
    /// State with the login token resource mounted. Requests authenticate by
    /// access token; the login-layer uid header is honoured only when
    /// `trust_uid_header` is set, and is then consulted first.
    pub fn new(
        config: Config,
        store: Arc<dyn EntityStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let settings = config.token_settings();
        let tokens = access_token_resource(&settings, store.clone(), clock.clone())?;

        let mut providers: Vec<Arc<dyn IdentityProvider>> = Vec::new();
        if config.trust_uid_header {
            tracing::info!("trusting uid header from the login layer");
            providers.push(Arc::new(TrustedHeaderProvider));
        }
        providers.push(Arc::new(TokenAuthenticator::new(
            store,
            clock,
            settings.delete_expired_tokens,
        )));

        let mut state = Self {
            config,
            resources: HashMap::new(),
            providers,
        };
        let segment = state.config.token_login_path_segment.clone();
        state.mount(&segment, tokens);
        Ok(state)
    }

    /// Mount `runtime` at `/{api_base_path}/{segment}`. A segment that is
    /// already mounted is replaced.
    pub fn mount(&mut self, segment: &str, runtime: ResourceRuntime) {
        let segment = segment.trim_matches('/').to_string();
        tracing::info!(
            resource = %runtime.definition().name,
            segment = %segment,
            "resource mounted"
        );
        self.resources.insert(segment, Arc::new(runtime));
    }

    pub fn resource(&self, segment: &str) -> Option<&Arc<ResourceRuntime>> {
        self.resources.get(segment)
    }

    pub fn providers(&self) -> &[Arc<dyn IdentityProvider>] {
        &self.providers
    }
}

/// Build the HTTP surface: every mounted resource under the configured base
/// path, plus `/healthz`.
pub fn app(state: Arc<AppState>) -> Router {
    let base = state.config.api_base_path.trim_matches('/').to_string();
    let resources = api_router();

    let router = Router::new().route("/healthz", get(|| async { "ok" }));
    let router = if base.is_empty() {
        router.merge(resources)
    } else {
        router.nest(&format!("/{}", base), resources)
    };

    router
        .fallback(fallback_404)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Resource routes, relative to the API base path.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:resource", any(dispatch_collection))
        .route("/:resource/*path", any(dispatch_member))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn dispatch_collection(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Projection>, AppError> {
    dispatch(&state, &resource, "", method, params, &headers, &body).await
}

async fn dispatch_member(
    State(state): State<Arc<AppState>>,
    Path((resource, path)): Path<(String, String)>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Projection>, AppError> {
    dispatch(&state, &resource, &path, method, params, &headers, &body).await
}

async fn dispatch(
    state: &AppState,
    resource: &str,
    path: &str,
    method: Method,
    params: HashMap<String, String>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<Projection>, AppError> {
    let identity = resolve_identity(state.providers(), headers).await?;

    let runtime = state.resource(resource).ok_or_else(|| AppError::RouteNotFound {
        path: format!("{}/{}", resource, path).trim_end_matches('/').to_string(),
    })?;

    let verb: Verb = method.as_str().parse().map_err(|_| AppError::HandlerNotFound {
        verb: method.to_string(),
        path: path.to_string(),
    })?;

    let request = ResourceRequest {
        params,
        body: parse_body(body),
    };

    let projection = runtime.process(path, &request, verb, &identity).await?;
    Ok(Json(projection))
}

/// JSON request body, if there is one. Anything unparsable is dropped.
fn parse_body(body: &[u8]) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    match serde_json::from_slice(body) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("ignoring request body that is not JSON: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(b""), None);
        assert_eq!(parse_body(b"{\"a\":1}"), Some(json!({"a": 1})));
        assert_eq!(parse_body(b"not json"), None);
    }
}
