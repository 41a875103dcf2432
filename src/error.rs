//! Typed errors and HTTP mapping.

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Fixed conflict messages; never carry store details to the client.
pub const UNIQUE_VIOLATED: &str = "Unique constraint violated";
pub const FOREIGN_KEY_VIOLATED: &str = "Foreign key constraint violated";
pub const LINKED_CONTENT: &str = "Other content links to this";
pub const CONDITIONS_VIOLATED: &str = "Resource found but conditions violated";

const INTERNAL: &str = "An internal server error occurred";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: model {model} column {column}")]
    InvalidPrimaryKey { model: String, column: String },
    #[error("duplicate name: {0}")]
    DuplicateName(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Backend failures, classified so the resource layer can pick a status code.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),
    #[error("stale version: {0}")]
    StaleVersion(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("unsupported by store: {0}")]
    Unsupported(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("method not allowed")]
    MethodNotAllowed(Vec<Method>),
    #[error("programming error: {0}")]
    Programming(String),
    #[error("unsupported geometry type {0}")]
    UnsupportedGeometryType(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Store(StoreError::Db(e))
    }
}

impl AppError {
    /// Misconfiguration or an impossible result. Logged here with full context; the client only sees a generic 500.
    pub fn programming(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!("Programming error: {}", message);
        AppError::Programming(message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Config(_)
            | AppError::Programming(_)
            | AppError::UnsupportedGeometryType(_)
            | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::MethodNotAllowed(_) => "method_not_allowed",
            AppError::Config(_) => "config_error",
            AppError::Programming(_) | AppError::UnsupportedGeometryType(_) => "internal_error",
            AppError::Store(_) => "database_error",
        }
    }

    /// Message safe to send to the client.
    pub fn public_message(&self) -> String {
        match self {
            AppError::BadRequest(m) | AppError::Unauthorized(m) | AppError::Forbidden(m) => m.clone(),
            AppError::NotFound => "The requested resource was not found".into(),
            AppError::Conflict(m) => (*m).to_string(),
            AppError::MethodNotAllowed(_) => "Method not allowed for this resource".into(),
            AppError::Config(_)
            | AppError::Programming(_)
            | AppError::UnsupportedGeometryType(_)
            | AppError::Store(_) => INTERNAL.into(),
        }
    }
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

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let AppError::Store(e) = &self {
            tracing::error!(error = %e, "store failure");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.public_message(),
                details: None,
            },
        };
        let mut response = (status, Json(body)).into_response();
        if let AppError::MethodNotAllowed(allowed) = &self {
            let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
            if let Ok(v) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, v);
            }
        }
        response
    }
}
