//! Schema config validation: duplicates and referential integrity of foreign keys.

use crate::error::SchemaError;
use crate::schema::{ColumnConfig, EntityConfig, JoinTableConfig};
use std::collections::{HashMap, HashSet};

/// Checks a set of entity and join table configs before relationships are resolved.
pub fn validate(entities: &[EntityConfig], join_tables: &[JoinTableConfig]) -> Result<(), SchemaError> {
    let mut tables: HashMap<&str, &[ColumnConfig]> = HashMap::new();
    let mut keys = HashSet::new();

    for e in entities {
        if tables.insert(e.name.as_str(), e.columns.as_slice()).is_some() {
            return Err(SchemaError::DuplicateEntity(e.name.clone()));
        }
        let key = e.key.as_deref().unwrap_or(e.name.as_str());
        if !keys.insert(key) {
            return Err(SchemaError::DuplicateEntity(key.to_string()));
        }
        unique_fields(&e.name, e.columns.iter().map(|c| c.name.as_str()).chain(e.relationships.iter().map(|r| r.name.as_str())))?;
    }
    for j in join_tables {
        if tables.insert(j.name.as_str(), j.columns.as_slice()).is_some() {
            return Err(SchemaError::DuplicateEntity(j.name.clone()));
        }
        unique_fields(&j.name, j.columns.iter().map(|c| c.name.as_str()))?;
    }

    for (table, columns) in &tables {
        for c in columns.iter() {
            let Some(fk) = &c.foreign_key else { continue };
            let referenced = tables.get(fk.table.as_str()).ok_or_else(|| SchemaError::MissingReference {
                kind: "table",
                id: format!("{}.{} -> {}", table, c.name, fk.table),
            })?;
            if !referenced.iter().any(|rc| rc.name == fk.column) {
                return Err(SchemaError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", fk.table, fk.column),
                });
            }
        }
    }

    for e in entities {
        for op in &e.operations {
            if !matches!(op.as_str(), "get" | "post" | "put" | "patch" | "delete") {
                return Err(SchemaError::Load(format!(
                    "entity '{}' lists unknown operation '{}'",
                    e.name, op
                )));
            }
        }
    }

    Ok(())
}

fn unique_fields<'a>(entity: &str, names: impl Iterator<Item = &'a str>) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(SchemaError::DuplicateField {
                entity: entity.to_string(),
                column: name.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnConfig, RelationshipConfig, ScalarKind};

    #[test]
    fn rejects_unknown_foreign_key_table() {
        let e = EntityConfig::new("book")
            .column(ColumnConfig::new("id", ScalarKind::Integer).primary())
            .column(ColumnConfig::new("author_id", ScalarKind::Integer).references("author", "id"));
        let err = validate(&[e], &[]).unwrap_err();
        assert!(matches!(err, SchemaError::MissingReference { kind: "table", .. }));
    }

    #[test]
    fn rejects_field_declared_twice() {
        let e = EntityConfig::new("book")
            .column(ColumnConfig::new("id", ScalarKind::Integer).primary())
            .relationship(RelationshipConfig::new("id", "book"));
        assert_eq!(
            validate(&[e], &[]).unwrap_err(),
            SchemaError::DuplicateField {
                entity: "book".into(),
                column: "id".into()
            }
        );
    }

    #[test]
    fn rejects_duplicate_entity_key() {
        let mut a = EntityConfig::new("a").column(ColumnConfig::new("id", ScalarKind::Integer));
        a.key = Some("things".into());
        let mut b = EntityConfig::new("b").column(ColumnConfig::new("id", ScalarKind::Integer));
        b.key = Some("things".into());
        assert_eq!(
            validate(&[a, b], &[]).unwrap_err(),
            SchemaError::DuplicateEntity("things".into())
        );
    }
}
