//! Typed errors and HTTP mapping.

use crate::config::Environment;
use crate::service::QueryFeature;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Descriptor problems. Fatal at startup: the server must not accept requests.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: entity {entity} column {column}")]
    InvalidPrimaryKey { entity: String, column: String },
    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),
    #[error("duplicate route: {method} {path}")]
    DuplicateRoute { method: String, path: String },
    #[error("unsupported database client: {0}")]
    UnsupportedDialect(String),
    #[error("relationship cycle without a root entity: {0}")]
    RelationCycle(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Field name to the list of messages that failed for it.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    NotFound(String),
    #[error("Unsupported query feature: {feature}{}", .key.as_ref().map(|k| format!(" [{}]", k)).unwrap_or_default())]
    PermissionDenied {
        feature: QueryFeature,
        key: Option<String>,
    },
    #[error("validation failed")]
    Validation(FieldErrors),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("internal: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn not_found(entity: &str) -> Self {
        AppError::NotFound(format!("The item is not found on {}.", entity))
    }

    /// Expected per-request conditions raised on purpose by handlers or the permission engine.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::NotFound(_)
                | AppError::PermissionDenied { .. }
                | AppError::Validation(_)
                | AppError::BadRequest(_)
        ) || matches!(self, AppError::Db(sqlx::Error::RowNotFound))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PermissionDenied { .. } => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Config(_) | AppError::Db(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::NotFound(_) => "not_found",
            AppError::PermissionDenied { .. } => "unsupported_query_feature",
            AppError::Validation(_) => "validation_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Db(sqlx::Error::RowNotFound) => "not_found",
            AppError::Db(_) => "database_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Render for the given environment. Unclassified errors are always logged; outside
    /// development and test their message is replaced by a generic one.
    pub fn into_response_for(self, env: Environment) -> Response {
        let status = self.status();
        let details = match &self {
            AppError::Validation(fields) => serde_json::to_value(fields).ok(),
            AppError::PermissionDenied { feature, key } => Some(serde_json::json!({
                "feature": feature,
                "key": key,
            })),
            _ => None,
        };
        if self.is_client_error() {
            let body = ErrorBody {
                error: ErrorDetail {
                    code: self.code().to_string(),
                    message: self.to_string(),
                    details,
                },
            };
            return (status, Json(body)).into_response();
        }

        tracing::error!(error = %self, debug = ?self, "request failed");
        let body = if env.is_production() {
            ErrorBody {
                error: ErrorDetail {
                    code: "internal_error".to_string(),
                    message: "An error occurred.".to_string(),
                    details: None,
                },
            }
        } else {
            ErrorBody {
                error: ErrorDetail {
                    code: self.code().to_string(),
                    message: self.to_string(),
                    details: Some(serde_json::json!({ "debug": format!("{:?}", self) })),
                },
            }
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_response_for(Environment::Production)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_message_names_feature_and_key() {
        let err = AppError::PermissionDenied {
            feature: QueryFeature::WhereEqual,
            key: Some("secret".into()),
        };
        assert_eq!(err.to_string(), "Unsupported query feature: where_equal [secret]");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = AppError::PermissionDenied {
            feature: QueryFeature::Sorting,
            key: None,
        };
        assert_eq!(err.to_string(), "Unsupported query feature: sorting");
    }

    #[test]
    fn unclassified_errors_map_to_500() {
        let err = AppError::Internal("boom".into());
        assert!(!err.is_client_error());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = err.into_response_for(Environment::Production);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_names_entity() {
        let err = AppError::not_found("Post");
        assert_eq!(err.to_string(), "The item is not found on Post.");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
