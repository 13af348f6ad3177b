//! Projection schema: which fields the marshaller emits and how deep it follows relationships.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-field projection entry. `false` drops a column or relationship, an object replaces the
/// target's default projection, `true` keeps the default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Projection {
    Include(bool),
    Nested(ProjectionSchema),
}

/// An empty schema marshals every column and every declared relationship.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectionSchema(pub BTreeMap<String, Projection>);

impl ProjectionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude(mut self, field: &str) -> Self {
        self.0.insert(field.to_string(), Projection::Include(false));
        self
    }

    pub fn nest(mut self, field: &str, schema: ProjectionSchema) -> Self {
        self.0.insert(field.to_string(), Projection::Nested(schema));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn excludes(&self, field: &str) -> bool {
        matches!(self.0.get(field), Some(Projection::Include(false)))
    }

    pub fn nested(&self, field: &str) -> Option<&ProjectionSchema> {
        match self.0.get(field) {
            Some(Projection::Nested(schema)) => Some(schema),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_booleans_and_nested_objects() {
        let schema: ProjectionSchema =
            serde_json::from_str(r#"{"author": false, "tags": {"posts": false}, "notes": true}"#).unwrap();
        assert!(schema.excludes("author"));
        assert!(!schema.excludes("notes"));
        assert!(schema.nested("tags").unwrap().excludes("posts"));
        assert!(schema.nested("author").is_none());
    }
}
