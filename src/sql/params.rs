//! Text encoding of JSON values for PostgreSQL parameters. Every placeholder is cast
//! from text to the column type in SQL, so one bind type covers every column kind.

use crate::schema::ScalarKind;
use serde_json::Value;

/// PostgreSQL type a column kind is stored as.
pub fn pg_type(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Integer => "bigint",
        ScalarKind::Number => "double precision",
        ScalarKind::String => "text",
        ScalarKind::Boolean => "boolean",
        ScalarKind::Json => "jsonb",
        ScalarKind::Uuid => "uuid",
        ScalarKind::Timestamp => "timestamptz",
    }
}

/// `None` binds SQL NULL. JSON columns always take the JSON text, other kinds take
/// strings verbatim and anything else in its JSON spelling.
pub fn text_param(kind: ScalarKind, value: &Value) -> Option<String> {
    match (kind, value) {
        (_, Value::Null) => None,
        (ScalarKind::Json, v) => Some(v.to_string()),
        (_, Value::String(s)) => Some(s.clone()),
        (_, v) => Some(v.to_string()),
    }
}
