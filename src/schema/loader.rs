//! Load a schema config from a JSON file or string and build the registry.

use crate::error::SchemaError;
use crate::schema::{Registry, SchemaConfig};
use std::path::Path;

pub fn parse_config(json: &str) -> Result<SchemaConfig, SchemaError> {
    serde_json::from_str(json).map_err(|e| SchemaError::Load(e.to_string()))
}

/// Reads a `SchemaConfig` JSON document and resolves it into a registry.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Registry, SchemaError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SchemaError::Load(format!("{}: {}", path.display(), e)))?;
    let config = parse_config(&raw)?;
    tracing::info!(path = %path.display(), entities = config.entities.len(), "schema config loaded");
    Registry::from_config(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{JoinKind, ScalarKind};

    const LIBRARY: &str = r#"{
        "entities": [
            {
                "name": "author",
                "key": "authors",
                "columns": [
                    {"name": "id", "type": "integer", "primary_key": true},
                    {"name": "name", "type": "string", "nullable": false}
                ],
                "relationships": [{"name": "books", "target": "book"}]
            },
            {
                "name": "book",
                "columns": [
                    {"name": "id", "type": "uuid", "primary_key": true, "generated": "uuid"},
                    {"name": "author_id", "type": "integer", "foreign_key": {"table": "author", "column": "id"}}
                ],
                "relationships": [{"name": "author", "target": "author"}],
                "todict_schema": {"author": false},
                "operations": ["get"]
            }
        ]
    }"#;

    #[test]
    fn parses_and_resolves_json_config() {
        let config = parse_config(LIBRARY).unwrap();
        assert_eq!(config.entities[0].columns[1].kind, ScalarKind::String);
        assert!(!config.entities[0].columns[1].nullable);
        let registry = Registry::from_config(config).unwrap();
        let author = registry.entity_by_key("authors").unwrap();
        assert_eq!(author.relationship("books").unwrap().kind, JoinKind::OneToMany);
        let book = registry.entity("book").unwrap();
        assert!(book.allows("get"));
        assert!(!book.allows("post"));
    }

    #[test]
    fn malformed_json_is_a_load_error() {
        assert!(matches!(parse_config("{\"entities\": 3}"), Err(SchemaError::Load(_))));
    }

    #[test]
    fn missing_file_is_a_load_error() {
        assert!(matches!(
            load_from_path("/nonexistent/modelrest-schema.json"),
            Err(SchemaError::Load(_))
        ));
    }
}
