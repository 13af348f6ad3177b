//! ModelService: graph operations returning marshalled dicts, one call per HTTP verb.

use crate::engine::{GraphEngine, Page};
use crate::error::AppError;
use crate::marshal::Marshaller;
use crate::model::{normalize_value, Identity, ProjectionSchema};
use crate::service::validation::{Check, PayloadValidator};
use crate::session::Session;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

pub struct ModelService;

impl ModelService {
    /// Validates and inserts the payload, answering with the inserted dicts.
    pub async fn create(session: &mut Session, entity: &str, payload: &Value) -> Result<Vec<Value>, AppError> {
        let registry = session.registry().clone();
        PayloadValidator::validate(&registry, registry.require(entity)?, payload, Check::Insert)?;
        let ids = GraphEngine::insert(session, entity, payload, true).await?;
        Marshaller::marshal_many(session, &ids, None).await
    }

    /// Updates the instances found. Empty when none of them exist.
    pub async fn update(
        session: &mut Session,
        entity: &str,
        payload: &Value,
        ids: Option<Vec<Identity>>,
    ) -> Result<Vec<Value>, AppError> {
        let registry = session.registry().clone();
        PayloadValidator::validate(&registry, registry.require(entity)?, payload, Check::Update)?;
        let found = GraphEngine::update(session, entity, payload, ids, true).await?;
        Marshaller::marshal_many(session, &found, None).await
    }

    /// Updates the object at `identity`, inserting it when it does not exist. The flag
    /// reports whether it was inserted. Body keys may rename an existing object, but an
    /// insert with keys contradicting the URI is ambiguous.
    pub async fn upsert(
        session: &mut Session,
        entity: &str,
        payload: &Value,
        identity: Identity,
    ) -> Result<(Vec<Value>, bool), AppError> {
        let bound = Self::bind_identity(payload, &identity)?;
        let updated = Self::update(session, entity, &bound, Some(vec![identity.clone()])).await?;
        if !updated.is_empty() {
            return Ok((updated, false));
        }
        if let Some(field) = contradicting_field(&bound, &identity) {
            return Err(AppError::Validation {
                message: format!("Ambiguous value for '{}'", field),
                input: Some(payload.clone()),
            });
        }
        tracing::debug!(entity = %entity, "nothing to update, inserting");
        Ok((Self::create(session, entity, &bound).await?, true))
    }

    pub async fn delete(session: &mut Session, entity: &str, ids: Vec<Identity>) -> Result<BTreeSet<Identity>, AppError> {
        GraphEngine::delete(session, entity, ids, true).await
    }

    pub async fn get(
        session: &mut Session,
        entity: &str,
        ids: Option<Vec<Identity>>,
        page: Page,
        projection: Option<&ProjectionSchema>,
    ) -> Result<Vec<Value>, AppError> {
        GraphEngine::get_marshalled(session, entity, ids, page, projection).await
    }

    /// Fills the identity fields a single-object payload leaves out (or sets to null)
    /// from a URI identity. Fields already given are kept.
    pub fn bind_identity(payload: &Value, identity: &Identity) -> Result<Value, AppError> {
        let Value::Object(obj) = payload else {
            return Err(AppError::Validation {
                message: "body must be a JSON object".into(),
                input: Some(payload.clone()),
            });
        };
        let mut obj: Map<String, Value> = obj.clone();
        for (field, value) in identity.fields() {
            if obj.get(field).map_or(true, Value::is_null) {
                obj.insert(field.clone(), value.clone());
            }
        }
        Ok(Value::Object(obj))
    }

    /// Identity from raw key values, normalized per declared kind.
    pub fn identity(session: &Session, entity: &str, values: &Map<String, Value>) -> Result<Identity, AppError> {
        let e = session.registry().require(entity)?;
        let mut pairs = Vec::with_capacity(e.primary_keys.len());
        for pk in &e.primary_keys {
            let v = values
                .get(pk)
                .filter(|v| !v.is_null())
                .ok_or_else(|| AppError::BadRequest(format!("missing key field '{}'", pk)))?;
            let v = e.column(pk).map(|c| normalize_value(c.kind, v)).unwrap_or_else(|| v.clone());
            pairs.push((pk.clone(), v));
        }
        Ok(Identity::from_pairs(pairs))
    }
}

fn contradicting_field<'a>(payload: &Value, identity: &'a Identity) -> Option<&'a str> {
    identity
        .fields()
        .find(|(field, value)| {
            payload
                .get(field.as_str())
                .is_some_and(|given| !crate::store::values_equal(given, value))
        })
        .map(|(field, _)| field.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bind_identity_fills_only_missing_keys() {
        let id = Identity::from_pairs([("id", json!(7))]);
        assert_eq!(
            ModelService::bind_identity(&json!({"name": "a"}), &id).unwrap(),
            json!({"id": 7, "name": "a"})
        );
        assert_eq!(
            ModelService::bind_identity(&json!({"id": null}), &id).unwrap(),
            json!({"id": 7})
        );
        assert_eq!(
            ModelService::bind_identity(&json!({"id": 8}), &id).unwrap(),
            json!({"id": 8})
        );
        assert!(ModelService::bind_identity(&json!([1]), &id).is_err());
    }

    #[test]
    fn contradicting_field_compares_normalized_values() {
        let id = Identity::from_pairs([("id", json!(7))]);
        assert_eq!(contradicting_field(&json!({"id": 7.0}), &id), None);
        assert_eq!(contradicting_field(&json!({"name": "a"}), &id), None);
        assert_eq!(contradicting_field(&json!({"id": 8}), &id), Some("id"));
    }
}
