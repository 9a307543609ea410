use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::resource::fields::ProjectionError;
use crate::resource::router::RouteError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("path '{path}' does not exist")]
    RouteNotFound { path: String },

    #[error("no {verb} handler for path '{path}'")]
    HandlerNotFound { verb: String, path: String },

    #[error("the specific entity ID {id} for {resource} does not exist")]
    EntityNotFound { id: String, resource: String },

    #[error("the specified entity ID {id} is not a valid {resource}")]
    EntityMismatch { id: String, resource: String },

    #[error("property {property} does not exist")]
    PropertyMissing { property: String },

    #[error("authentication required")]
    Unauthorized,

    #[error("access to {resource} denied")]
    AccessDenied { resource: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<RouteError> for AppError {
    fn from(e: RouteError) -> Self {
        match e {
            RouteError::RouteNotFound { path } => AppError::RouteNotFound { path },
            RouteError::HandlerNotFound { verb, path } => AppError::HandlerNotFound {
                verb: verb.to_string(),
                path,
            },
        }
    }
}

impl From<ProjectionError> for AppError {
    fn from(e: ProjectionError) -> Self {
        match e {
            ProjectionError::PropertyMissing(property) => AppError::PropertyMissing { property },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::RouteNotFound { .. } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "route_not_found",
                self.to_string(),
            ),
            AppError::HandlerNotFound { .. } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "handler_not_found",
                self.to_string(),
            ),
            AppError::EntityNotFound { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_request_error",
                "entity_not_found",
                self.to_string(),
            ),
            AppError::EntityMismatch { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_request_error",
                "entity_mismatch",
                self.to_string(),
            ),
            AppError::PropertyMissing { property } => {
                // The field map and the entity schema disagree; nothing the caller can fix.
                tracing::error!(property = %property, "field map references a missing property");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "property_missing",
                    "internal server error".to_string(),
                )
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthorized",
                "invalid or missing credentials".to_string(),
            ),
            AppError::AccessDenied { .. } => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "access_denied",
                self.to_string(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
