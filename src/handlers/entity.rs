//! Entity handlers: one per HTTP verb, on the collection (`/:key`) and on one
//! identity (`/:key/:id`).

use crate::engine::Page;
use crate::error::AppError;
use crate::handlers::{params, schema_doc};
use crate::model::Identity;
use crate::response::{listing, mirror, single};
use crate::schema::Entity;
use crate::service::ModelService;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

const SCHEMA_SEGMENT: &str = "_schema";

/// Looks the entity up by its URL key and checks the verb against its `operations`.
fn entity_for<'a>(state: &'a AppState, key: &str, method: &Method) -> Result<&'a Entity, AppError> {
    let entity = state
        .registry
        .entity_by_key(key)
        .ok_or_else(|| AppError::NotFound(key.to_string()))?;
    if !entity.allows(&method.as_str().to_lowercase()) {
        return Err(AppError::MethodNotAllowed {
            allowed: entity.operations.iter().map(|o| o.to_uppercase()).collect(),
        });
    }
    Ok(entity)
}

fn parse_u64(params: &HashMap<String, String>, name: &str) -> Result<Option<u64>, AppError> {
    params
        .get(name)
        .map(|v| {
            v.parse()
                .map_err(|_| AppError::BadRequest(format!("{} must be a non-negative integer", name)))
        })
        .transpose()
}

/// Identities listed in a DELETE body: one key value or object, or a list of them.
fn body_identities(entity: &Entity, body: Value) -> Result<Vec<Identity>, AppError> {
    let items = match body {
        Value::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .map(|v| params::identity_from_value(entity, v))
        .collect()
}

/// GET on the collection: the rows at `ids`, or a page of all rows. 404 when none match.
pub async fn list(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let entity = entity_for(&state, &key, &Method::GET)?;
    let ids = query
        .get("ids")
        .map(|raw| params::identities(entity, raw))
        .transpose()?;
    let page = Page::new(parse_u64(&query, "limit")?, parse_u64(&query, "offset")?);
    let mut session = state.session().await?;
    let rows = ModelService::get(&mut session, &entity.name, ids, page, None).await?;
    if rows.is_empty() {
        return Err(AppError::NotFound(key));
    }
    Ok(listing(StatusCode::OK, rows))
}

pub async fn read(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let entity = entity_for(&state, &key, &Method::GET)?;
    if id == SCHEMA_SEGMENT {
        let doc = schema_doc::entity_document(&state.registry, entity, &state.settings.api_prefix);
        return Ok(Json(doc).into_response());
    }
    let identity = params::identity(entity, &id)?;
    let mut session = state.session().await?;
    let mut rows = ModelService::get(&mut session, &entity.name, Some(vec![identity]), Page::default(), None).await?;
    let row = rows.pop().ok_or_else(|| AppError::NotFound(id))?;
    Ok(single(StatusCode::OK, row))
}

pub async fn create(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let entity = entity_for(&state, &key, &Method::POST)?;
    let mut session = state.session().await?;
    let dicts = ModelService::create(&mut session, &entity.name, &body).await?;
    Ok(mirror(&body, dicts, StatusCode::CREATED))
}

/// POST with the identity in the URI; the URI fills absent key fields.
pub async fn create_at(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let entity = entity_for(&state, &key, &Method::POST)?;
    let identity = params::identity(entity, &id)?;
    let body = ModelService::bind_identity(&body, &identity)?;
    let mut session = state.session().await?;
    let dicts = ModelService::create(&mut session, &entity.name, &body).await?;
    Ok(mirror(&body, dicts, StatusCode::CREATED))
}

/// PUT and PATCH on the collection: update by the identities in the body, 404 when none exist.
async fn update_by_body(state: AppState, key: String, method: Method, body: Value) -> Result<Response, AppError> {
    let entity = entity_for(&state, &key, &method)?;
    let mut session = state.session().await?;
    let dicts = ModelService::update(&mut session, &entity.name, &body, None).await?;
    if dicts.is_empty() {
        return Err(AppError::NotFound(key));
    }
    Ok(mirror(&body, dicts, StatusCode::OK))
}

pub async fn replace(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    update_by_body(state, key, Method::PUT, body).await
}

pub async fn patch(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    update_by_body(state, key, Method::PATCH, body).await
}

/// PUT with the identity in the URI: update, or insert when it does not exist.
pub async fn replace_at(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let entity = entity_for(&state, &key, &Method::PUT)?;
    let identity = params::identity(entity, &id)?;
    let mut session = state.session().await?;
    let (mut dicts, created) = ModelService::upsert(&mut session, &entity.name, &body, identity).await?;
    let dict = dicts.pop().unwrap_or(Value::Null);
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok(single(status, dict))
}

pub async fn patch_at(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let entity = entity_for(&state, &key, &Method::PATCH)?;
    let identity = params::identity(entity, &id)?;
    let body = ModelService::bind_identity(&body, &identity)?;
    let mut session = state.session().await?;
    let mut dicts = ModelService::update(&mut session, &entity.name, &body, Some(vec![identity])).await?;
    let dict = dicts.pop().ok_or_else(|| AppError::NotFound(id))?;
    Ok(single(StatusCode::OK, dict))
}

/// DELETE on the collection with a list of identities in the body.
pub async fn remove(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let entity = entity_for(&state, &key, &Method::DELETE)?;
    let ids = body_identities(entity, body)?;
    let mut session = state.session().await?;
    let deleted = ModelService::delete(&mut session, &entity.name, ids).await?;
    if deleted.is_empty() {
        return Err(AppError::NotFound(key));
    }
    Ok(listing(StatusCode::OK, deleted.iter().map(Identity::to_value).collect()))
}

pub async fn remove_at(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let entity = entity_for(&state, &key, &Method::DELETE)?;
    let identity = params::identity(entity, &id)?;
    let mut session = state.session().await?;
    let deleted = ModelService::delete(&mut session, &entity.name, vec![identity]).await?;
    if deleted.is_empty() {
        return Err(AppError::NotFound(id));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}
