//! Typed values from query and path strings.
//!
//! Arrays are comma separated, objects are `key:value` pairs separated by `|`. An
//! array may hold objects and an object may hold arrays, but an array of arrays or an
//! object of objects cannot be spelled and is rejected.

use crate::error::{AppError, GraphMutationError, MutationErrorKind};
use crate::model::{normalize_value, Identity};
use crate::schema::{Entity, ScalarKind};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum ParamKind {
    Scalar(ScalarKind),
    Array(Box<ParamKind>),
    Object(Vec<(String, ParamKind)>),
}

impl ParamKind {
    /// A single key column is a scalar, a composite key an object of its columns.
    pub fn identity_of(entity: &Entity) -> ParamKind {
        let kinds: Vec<(String, ParamKind)> = entity
            .primary_keys
            .iter()
            .map(|pk| {
                let kind = entity.column(pk).map(|c| c.kind).unwrap_or(ScalarKind::String);
                (pk.clone(), ParamKind::Scalar(kind))
            })
            .collect();
        match kinds.as_slice() {
            [(_, single)] => single.clone(),
            _ => ParamKind::Object(kinds),
        }
    }
}

fn nested(kind: MutationErrorKind, raw: &str) -> AppError {
    AppError::Mutation(GraphMutationError::new(kind, &Value::String(raw.to_string())))
}

/// Converts `raw` per `kind`.
pub fn build(kind: &ParamKind, raw: &str) -> Result<Value, AppError> {
    match kind {
        ParamKind::Scalar(kind) => scalar(*kind, raw),
        ParamKind::Array(item) => {
            if matches!(**item, ParamKind::Array(_)) {
                return Err(nested(MutationErrorKind::NestedArray, raw));
            }
            if raw.is_empty() {
                return Ok(Value::Array(Vec::new()));
            }
            raw.split(',')
                .map(|part| build(item, part.trim()))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        ParamKind::Object(fields) => {
            if fields.iter().any(|(_, k)| matches!(k, ParamKind::Object(_))) {
                return Err(nested(MutationErrorKind::NestedObject, raw));
            }
            let mut obj = Map::new();
            for pair in raw.split('|').filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once(':')
                    .ok_or_else(|| AppError::BadRequest(format!("expected key:value, got '{}'", pair)))?;
                let key = key.trim();
                let (_, field_kind) = fields
                    .iter()
                    .find(|(name, _)| name == key)
                    .ok_or_else(|| AppError::BadRequest(format!("unknown field '{}'", key)))?;
                obj.insert(key.to_string(), build(field_kind, value.trim())?);
            }
            Ok(Value::Object(obj))
        }
    }
}

fn scalar(kind: ScalarKind, raw: &str) -> Result<Value, AppError> {
    let invalid = || AppError::BadRequest(format!("'{}' is not a valid {}", raw, kind));
    let v = match kind {
        ScalarKind::Integer => Value::from(raw.parse::<i64>().map_err(|_| invalid())?),
        ScalarKind::Number => {
            let n: f64 = raw.parse().map_err(|_| invalid())?;
            serde_json::Number::from_f64(n).map(Value::Number).ok_or_else(invalid)?
        }
        ScalarKind::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => return Err(invalid()),
        },
        ScalarKind::Uuid => {
            uuid::Uuid::parse_str(raw).map_err(|_| invalid())?;
            Value::String(raw.to_string())
        }
        ScalarKind::Timestamp => {
            chrono::DateTime::parse_from_rfc3339(raw).map_err(|_| invalid())?;
            Value::String(raw.to_string())
        }
        ScalarKind::Json => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
        ScalarKind::String => Value::String(raw.to_string()),
    };
    Ok(normalize_value(kind, &v))
}

/// Identity from a path segment: the key value, or `col:v|col:v` for composite keys.
pub fn identity(entity: &Entity, raw: &str) -> Result<Identity, AppError> {
    identity_from_value(entity, build(&ParamKind::identity_of(entity), raw)?)
}

/// Identities from a comma separated `ids` parameter.
pub fn identities(entity: &Entity, raw: &str) -> Result<Vec<Identity>, AppError> {
    let kind = ParamKind::Array(Box::new(ParamKind::identity_of(entity)));
    match build(&kind, raw)? {
        Value::Array(items) => items.into_iter().map(|v| identity_from_value(entity, v)).collect(),
        _ => Ok(Vec::new()),
    }
}

/// Identity from either a bare key value (single key) or an object of key fields.
pub fn identity_from_value(entity: &Entity, value: Value) -> Result<Identity, AppError> {
    let obj = match (value, entity.primary_keys.as_slice()) {
        (Value::Object(obj), _) => obj,
        (v, [single]) => {
            let mut obj = Map::new();
            obj.insert(single.clone(), v);
            obj
        }
        (v, _) => return Err(AppError::BadRequest(format!("expected an object of key fields, got {}", v))),
    };
    let mut pairs = Vec::with_capacity(entity.primary_keys.len());
    for pk in &entity.primary_keys {
        let v = obj
            .get(pk)
            .filter(|v| !v.is_null())
            .ok_or_else(|| AppError::BadRequest(format!("missing key field '{}'", pk)))?;
        let kind = entity.column(pk).map(|c| c.kind).unwrap_or(ScalarKind::String);
        pairs.push((pk.clone(), normalize_value(kind, v)));
    }
    Ok(Identity::from_pairs(pairs))
}
