//! Entity identity: primary key values ordered by field name, plus the canonical cache sub-key.

use crate::model::Row;
use crate::schema::ScalarKind;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Clone, Debug)]
pub struct Identity {
    fields: BTreeMap<String, Value>,
    subkey: String,
}

impl Identity {
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let fields: BTreeMap<String, Value> = pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let subkey = Value::Array(fields.values().cloned().collect()).to_string();
        Identity { fields, subkey }
    }

    /// Identity of a row, or `None` when any key column is absent or null.
    pub fn from_row(primary_keys: &[String], row: &Row) -> Option<Self> {
        let mut pairs = Vec::with_capacity(primary_keys.len());
        for pk in primary_keys {
            match row.get(pk) {
                Some(v) if !v.is_null() => pairs.push((pk.clone(), v.clone())),
                _ => return None,
            }
        }
        Some(Self::from_pairs(pairs))
    }

    /// First key column a row lacks.
    pub fn missing_field<'a>(primary_keys: &'a [String], row: &Row) -> Option<&'a str> {
        primary_keys
            .iter()
            .find(|pk| row.get(pk.as_str()).map(Value::is_null).unwrap_or(true))
            .map(String::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Cache sub-key: JSON array of the values in field-name order.
    pub fn subkey(&self) -> &str {
        &self.subkey
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.subkey.hash(state);
    }
}

impl Ord for Identity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.subkey
            .cmp(&other.subkey)
            .then_with(|| self.fields.keys().cmp(other.fields.keys()))
    }
}

impl PartialOrd for Identity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// Brings a value into the canonical form for its column kind so identities built from
/// payloads, URIs and store rows compare equal.
pub fn normalize_value(kind: ScalarKind, value: &Value) -> Value {
    match (kind, value) {
        (ScalarKind::Integer, Value::Number(n)) if n.as_i64().is_none() && n.as_u64().is_none() => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| Value::from(f as i64))
            .unwrap_or_else(|| value.clone()),
        (ScalarKind::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s)
            .map(|u| Value::String(u.to_string()))
            .unwrap_or_else(|_| value.clone()),
        (ScalarKind::Timestamp, Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| Value::String(dt.with_timezone(&chrono::Utc).to_rfc3339()))
            .unwrap_or_else(|_| value.clone()),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn subkey_orders_values_by_field_name() {
        let a = Identity::from_pairs([("z", json!(1)), ("a", json!("x"))]);
        let b = Identity::from_pairs([("a", json!("x")), ("z", json!(1))]);
        assert_eq!(a.subkey(), r#"["x",1]"#);
        assert_eq!(a, b);
        assert_eq!(a.subkey(), b.subkey());
    }

    #[test]
    fn from_row_requires_every_key() {
        let pks = vec!["id".to_string(), "version".to_string()];
        assert!(Identity::from_row(&pks, &row(json!({"id": 1}))).is_none());
        assert!(Identity::from_row(&pks, &row(json!({"id": 1, "version": null}))).is_none());
        let id = Identity::from_row(&pks, &row(json!({"id": 1, "version": 2, "name": "n"}))).unwrap();
        assert_eq!(id.to_value(), json!({"id": 1, "version": 2}));
        assert_eq!(Identity::missing_field(&pks, &row(json!({"id": 1}))), Some("version"));
    }

    #[test]
    fn normalizes_uuid_and_timestamp_spellings() {
        let upper = json!("67E55044-10B1-426F-9247-BB680E5FE0C8");
        assert_eq!(
            normalize_value(ScalarKind::Uuid, &upper),
            json!("67e55044-10b1-426f-9247-bb680e5fe0c8")
        );
        let a = normalize_value(ScalarKind::Timestamp, &json!("2024-01-01T10:00:00+02:00"));
        let b = normalize_value(ScalarKind::Timestamp, &json!("2024-01-01T08:00:00Z"));
        assert_eq!(a, b);
        assert_eq!(normalize_value(ScalarKind::Integer, &json!(3.0)), json!(3));
    }
}
