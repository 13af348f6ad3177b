//! Raw declarative model types matching the JSON schema file.

use crate::model::ProjectionSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar kind of a column. Drives payload validation, typed parameter parsing and SQL casts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Integer,
    Number,
    String,
    Boolean,
    Json,
    Uuid,
    Timestamp,
}

impl ScalarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::Integer => "integer",
            ScalarKind::Number => "number",
            ScalarKind::String => "string",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Json => "json",
            ScalarKind::Uuid => "uuid",
            ScalarKind::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value generated by the engine when an insert omits the column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generated {
    Uuid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyConfig {
    /// Referenced table (entity name or join table name).
    pub table: String,
    pub column: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ScalarKind,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub foreign_key: Option<ForeignKeyConfig>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub generated: Option<Generated>,
    #[serde(default)]
    pub validation: Option<ValidationRule>,
}

fn default_true() -> bool {
    true
}

impl ColumnConfig {
    pub fn new(name: &str, kind: ScalarKind) -> Self {
        ColumnConfig {
            name: name.to_string(),
            kind,
            nullable: true,
            primary_key: false,
            foreign_key: None,
            default: None,
            generated: None,
            validation: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn references(mut self, table: &str, column: &str) -> Self {
        self.foreign_key = Some(ForeignKeyConfig {
            table: table.to_string(),
            column: column.to_string(),
        });
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// One `owner_column == target_column` term of a custom join condition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTermConfig {
    pub local: String,
    pub remote: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub name: String,
    pub target: String,
    /// Defaults from the join kind: scalar for many-to-one, list otherwise.
    #[serde(default)]
    pub uselist: Option<bool>,
    /// Join table name for many-to-many relationships.
    #[serde(default)]
    pub secondary: Option<String>,
    /// Foreign key column names to use when more than one path exists.
    #[serde(default)]
    pub foreign_keys: Vec<String>,
    #[serde(default)]
    pub join_condition: Vec<JoinTermConfig>,
}

impl RelationshipConfig {
    pub fn new(name: &str, target: &str) -> Self {
        RelationshipConfig {
            name: name.to_string(),
            target: target.to_string(),
            uselist: None,
            secondary: None,
            foreign_keys: Vec::new(),
            join_condition: Vec::new(),
        }
    }

    pub fn secondary(mut self, table: &str) -> Self {
        self.secondary = Some(table.to_string());
        self
    }

    pub fn uselist(mut self, uselist: bool) -> Self {
        self.uselist = Some(uselist);
        self
    }

    pub fn join_on(mut self, local: &str, remote: &str) -> Self {
        self.join_condition.push(JoinTermConfig {
            local: local.to_string(),
            remote: remote.to_string(),
        });
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Table name; unique across the registry.
    pub name: String,
    /// URL segment and cache hash key. Defaults to `name`.
    #[serde(default)]
    pub key: Option<String>,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
    #[serde(default)]
    pub todict_schema: ProjectionSchema,
    /// HTTP verbs exposed for this entity (lowercase). Empty means all.
    #[serde(default)]
    pub operations: Vec<String>,
}

impl EntityConfig {
    pub fn new(name: &str) -> Self {
        EntityConfig {
            name: name.to_string(),
            key: None,
            columns: Vec::new(),
            relationships: Vec::new(),
            todict_schema: ProjectionSchema::default(),
            operations: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnConfig) -> Self {
        self.columns.push(column);
        self
    }

    pub fn relationship(mut self, relationship: RelationshipConfig) -> Self {
        self.relationships.push(relationship);
        self
    }
}

/// Association table backing many-to-many relationships. Not exposed over HTTP.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinTableConfig {
    pub name: String,
    pub columns: Vec<ColumnConfig>,
}

/// Everything a registry is built from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
    #[serde(default)]
    pub join_tables: Vec<JoinTableConfig>,
}
