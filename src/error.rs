//! Typed errors and HTTP mapping.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Registry-time misconfiguration. Fatal at startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("entity '{0}' has no primary key (mark a column primary_key or declare an 'id' column)")]
    MissingPrimaryKey(String),
    #[error("entity '{0}' is registered twice")]
    DuplicateEntity(String),
    #[error("entity '{entity}' declares column '{column}' twice")]
    DuplicateField { entity: String, column: String },
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
    #[error("unknown relationship '{owner}.{name}'")]
    UnknownRelationship { owner: String, name: String },
    #[error("relationship '{owner}.{name}' targets unknown entity '{target}'")]
    UnresolvedTarget { owner: String, name: String, target: String },
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("relationship '{owner}.{name}' has no foreign key path to '{target}'")]
    NoJoinPath { owner: String, name: String, target: String },
    #[error("relationship '{owner}.{name}' has more than one foreign key path to '{target}'; set foreign_keys")]
    AmbiguousJoin { owner: String, name: String, target: String },
    #[error("relationship '{owner}.{name}': {message}")]
    InvalidRelationship { owner: String, name: String, message: String },
    #[error("config load: {0}")]
    Load(String),
}

/// What went wrong while resolving a payload fragment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MutationErrorKind {
    #[error("ambiguous operations '{}' for values {fragment}", .ops.join("' and '"))]
    AmbiguousOperation { ops: Vec<&'static str>, fragment: Value },
    #[error("can't execute '{op}' without '{field}' for values {fragment}")]
    MissingIdentity {
        op: &'static str,
        field: String,
        fragment: Value,
    },
    #[error("can't execute nested '{op}' operation: '{entity}' {identity} was not found")]
    NotFound {
        op: &'static str,
        entity: String,
        identity: String,
        fragment: Value,
    },
    #[error("can't remove model '{entity}' on column(s) '{columns}' with value(s) {values}")]
    NotLinked {
        entity: String,
        columns: String,
        values: String,
    },
    #[error("'{field}' is an invalid keyword argument for {entity}")]
    InvalidField { entity: String, field: String },
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("nested array was not allowed")]
    NestedArray,
    #[error("nested object was not allowed")]
    NestedObject,
}

/// Payload-shape problem. Always keeps the original input so callers can echo it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct GraphMutationError {
    pub kind: MutationErrorKind,
    pub input: Value,
}

impl GraphMutationError {
    pub fn new(kind: MutationErrorKind, input: &Value) -> Self {
        GraphMutationError {
            kind,
            input: input.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache codec: {0}")]
    Codec(String),
    #[error("cache backend: {0}")]
    Backend(String),
}

/// Environment configuration problem. Fatal at startup.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("invalid value '{value}' for {name}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Mutation(#[from] GraphMutationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {message}")]
    Validation { message: String, input: Option<Value> },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("method not allowed")]
    MethodNotAllowed { allowed: Vec<String> },
    #[error("{message}")]
    Unauthorized {
        message: String,
        realm: String,
        forbidden: bool,
    },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            input: None,
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
    pub details: Option<Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Schema(_) => (StatusCode::INTERNAL_SERVER_ERROR, "schema_error"),
            AppError::Mutation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "mutation_error"),
            AppError::Store(StoreError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            AppError::Cache(_) => (StatusCode::INTERNAL_SERVER_ERROR, "cache_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Validation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::MethodNotAllowed { .. } => (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed"),
            AppError::Unauthorized { forbidden: true, .. } => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "unauthorized"),
        };
        if matches!(status, StatusCode::INTERNAL_SERVER_ERROR) {
            tracing::error!(error = %self, "request failed");
        }
        let details = match &self {
            AppError::Mutation(e) => Some(serde_json::json!({ "input": e.input })),
            AppError::Validation { input: Some(input), .. } => Some(serde_json::json!({ "input": input })),
            _ => None,
        };
        let extra_header = match &self {
            AppError::MethodNotAllowed { allowed } => {
                HeaderValue::from_str(&allowed.join(", ")).ok().map(|v| (header::ALLOW, v))
            }
            AppError::Unauthorized { realm, .. } => {
                HeaderValue::from_str(&format!("Basic realm=\"{}\"", realm))
                    .ok()
                    .map(|v| (header::WWW_AUTHENTICATE, v))
            }
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        };
        let mut response = (status, Json(body)).into_response();
        if let Some((name, value)) = extra_header {
            response.headers_mut().insert(name, value);
        }
        response
    }
}
