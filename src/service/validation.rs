//! Payload validation from column declarations, applied before the graph engine runs.

use crate::error::AppError;
use crate::schema::{ColumnConfig, Entity, Field, JoinKind, Registry, ScalarKind, ValidationRule};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

const CODES: [&str; 3] = ["_update", "_delete", "_remove"];

/// Whether the top-level objects are new rows or changes to existing ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Check {
    Insert,
    Update,
}

pub struct PayloadValidator;

impl PayloadValidator {
    /// Validates every object of `payload` and, recursively, its relationship fragments.
    /// Required columns are enforced for rows that will be inserted: top-level objects
    /// under [`Check::Insert`] and nested fragments without an operation code or identity.
    pub fn validate(registry: &Registry, entity: &Entity, payload: &Value, check: Check) -> Result<(), AppError> {
        let objects: Vec<&Map<String, Value>> = match payload {
            Value::Object(obj) => vec![obj],
            Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
            _ => return Ok(()),
        };
        let ctx = Ctx { registry, input: payload };
        for obj in objects {
            ctx.object(entity, obj, check == Check::Insert, &BTreeSet::new())?;
        }
        Ok(())
    }
}

struct Ctx<'a> {
    registry: &'a Registry,
    input: &'a Value,
}

impl Ctx<'_> {
    fn fail(&self, message: String) -> AppError {
        AppError::Validation {
            message,
            input: Some(self.input.clone()),
        }
    }

    /// `filled` holds columns a parent link will set.
    fn object(
        &self,
        entity: &Entity,
        obj: &Map<String, Value>,
        required: bool,
        filled: &BTreeSet<String>,
    ) -> Result<(), AppError> {
        let mut linked: BTreeSet<String> = filled.clone();
        for (name, value) in obj {
            if CODES.contains(&name.as_str()) {
                continue;
            }
            match entity.field(name) {
                Some(Field::Column(i)) => self.column(&entity.columns[i], value)?,
                Some(Field::Relationship(i)) => {
                    let rel = &entity.relationships[i];
                    if matches!(rel.kind, JoinKind::ManyToOne) && !value.is_null() {
                        linked.extend(rel.pairs.iter().map(|p| p.local.clone()));
                    }
                    let target = self.registry.require(&rel.target)?;
                    let child_filled: BTreeSet<String> = match rel.kind {
                        JoinKind::OneToMany => rel.pairs.iter().map(|p| p.remote.clone()).collect(),
                        _ => BTreeSet::new(),
                    };
                    let fragments: Vec<&Map<String, Value>> = match value {
                        Value::Object(o) => vec![o],
                        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
                        _ => Vec::new(),
                    };
                    for fragment in fragments {
                        self.object(target, fragment, inserts(target, fragment), &child_filled)?;
                    }
                }
                // unknown fields are reported by the engine
                None => {}
            }
        }
        if required {
            for c in &entity.columns {
                if c.nullable || c.default.is_some() || c.generated.is_some() || linked.contains(&c.name) {
                    continue;
                }
                if obj.get(&c.name).map_or(true, Value::is_null) {
                    return Err(self.fail(format!("{} is required", c.name)));
                }
            }
        }
        Ok(())
    }

    fn column(&self, column: &ColumnConfig, value: &Value) -> Result<(), AppError> {
        let col = &column.name;
        if value.is_null() {
            if !column.nullable {
                return Err(self.fail(format!("{} must not be null", col)));
            }
            return Ok(());
        }
        if !kind_matches(column.kind, value) {
            return Err(self.fail(format!("{} must be of type {}", col, column.kind)));
        }
        match &column.validation {
            Some(rule) => validate_rule(col, value, rule).map_err(|m| self.fail(m)),
            None => Ok(()),
        }
    }
}

/// A nested fragment is an insert when it carries no code and no complete identity.
fn inserts(target: &Entity, fragment: &Map<String, Value>) -> bool {
    let coded = CODES
        .iter()
        .any(|c| fragment.get(*c).is_some_and(|v| !matches!(v, Value::Null | Value::Bool(false))));
    let identified = target
        .primary_keys
        .iter()
        .all(|pk| fragment.get(pk).is_some_and(|v| !v.is_null()));
    !coded && !identified
}

fn kind_matches(kind: ScalarKind, v: &Value) -> bool {
    match kind {
        ScalarKind::Integer => {
            v.is_i64() || v.is_u64() || v.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        ScalarKind::Number => v.is_number(),
        ScalarKind::String => v.is_string(),
        ScalarKind::Boolean => v.is_boolean(),
        ScalarKind::Json => true,
        ScalarKind::Uuid => v.as_str().is_some_and(|s| uuid::Uuid::parse_str(s).is_ok()),
        ScalarKind::Timestamp => v
            .as_str()
            .is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok()),
    }
}

fn validate_rule(col: &str, v: &Value, rule: &ValidationRule) -> Result<(), String> {
    if let Some(format) = &rule.format {
        validate_format(col, v, format)?;
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length {
            if len > max as usize {
                return Err(format!("{} must be at most {} characters", col, max));
            }
        }
        if let Some(min) = rule.min_length {
            if len < min as usize {
                return Err(format!("{} must be at least {} characters", col, min));
            }
        }
        if let Some(pattern) = &rule.pattern {
            let re = Regex::new(pattern).map_err(|_| format!("invalid pattern for {}", col))?;
            if !re.is_match(s) {
                return Err(format!("{} does not match required pattern", col));
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| crate::store::values_equal(v, a)) {
            return Err(format!(
                "{} must be one of: {:?}",
                col,
                allowed.iter().take(5).collect::<Vec<_>>()
            ));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                return Err(format!("{} must be at least {}", col, min));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                return Err(format!("{} must be at most {}", col, max));
            }
        }
    }
    Ok(())
}

fn validate_format(col: &str, v: &Value, format: &str) -> Result<(), String> {
    let Some(s) = v.as_str() else { return Ok(()) };
    match format.to_lowercase().as_str() {
        "email" if !s.contains('@') || s.len() < 3 => Err(format!("{} must be a valid email", col)),
        "uuid" if uuid::Uuid::parse_str(s).is_err() => Err(format!("{} must be a valid UUID", col)),
        "date-time" if chrono::DateTime::parse_from_rfc3339(s).is_err() => {
            Err(format!("{} must be an RFC 3339 timestamp", col))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnConfig, EntityConfig, RelationshipConfig, SchemaConfig};
    use serde_json::json;

    fn registry() -> Registry {
        let mut email = ColumnConfig::new("email", ScalarKind::String);
        email.validation = Some(ValidationRule {
            format: Some("email".into()),
            max_length: Some(20),
            ..Default::default()
        });
        let parent = EntityConfig::new("parent")
            .column(ColumnConfig::new("id", ScalarKind::Integer).primary())
            .column(ColumnConfig::new("name", ScalarKind::String).not_null())
            .column(email)
            .relationship(RelationshipConfig::new("children", "child"));
        let child = EntityConfig::new("child")
            .column(ColumnConfig::new("id", ScalarKind::Integer).primary())
            .column(ColumnConfig::new("parent_id", ScalarKind::Integer).not_null().references("parent", "id"))
            .column(ColumnConfig::new("label", ScalarKind::String).not_null());
        Registry::from_config(SchemaConfig {
            entities: vec![parent, child],
            join_tables: vec![],
        })
        .unwrap()
    }

    fn check(payload: Value, check: Check) -> Result<(), AppError> {
        let r = registry();
        let parent = r.entity("parent").unwrap();
        PayloadValidator::validate(&r, parent, &payload, check)
    }

    fn message(err: AppError) -> String {
        match err {
            AppError::Validation { message, input } => {
                assert!(input.is_some());
                message
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn insert_requires_non_nullable_columns() {
        let err = check(json!({"id": 1}), Check::Insert).unwrap_err();
        assert_eq!(message(err), "name is required");
        assert!(check(json!({"id": 1}), Check::Update).is_ok());
    }

    #[test]
    fn kinds_and_rules_are_checked() {
        let err = check(json!({"id": "one", "name": "a"}), Check::Update).unwrap_err();
        assert_eq!(message(err), "id must be of type integer");
        let err = check(json!({"id": 1, "email": "nope"}), Check::Update).unwrap_err();
        assert_eq!(message(err), "email must be a valid email");
        let err = check(json!({"id": 1, "name": null}), Check::Update).unwrap_err();
        assert_eq!(message(err), "name must not be null");
    }

    #[test]
    fn nested_inserts_skip_columns_set_by_the_parent_link() {
        assert!(check(
            json!({"id": 1, "name": "p", "children": [{"id": 5, "label": "x"}]}),
            Check::Insert
        )
        .is_ok());
        let err = check(json!({"id": 1, "name": "p", "children": [{"label": 3}]}), Check::Insert).unwrap_err();
        assert_eq!(message(err), "label must be of type string");
    }
}
