//! Store-neutral query and write descriptions.

use crate::model::{Identity, Row};
use serde_json::Value;
use std::cmp::Ordering;

/// Conjunction/disjunction of column equalities.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Predicate::Eq(column.into(), value)
    }

    /// Equality for a single key, AND of equalities for a composite key.
    pub fn for_identity(identity: &Identity) -> Self {
        let mut terms: Vec<Predicate> = identity
            .fields()
            .map(|(k, v)| Predicate::Eq(k.clone(), v.clone()))
            .collect();
        if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::And(terms)
        }
    }

    /// OR over several identities; `None` when there are none.
    pub fn for_identities<'a>(identities: impl IntoIterator<Item = &'a Identity>) -> Option<Self> {
        let mut terms: Vec<Predicate> = identities.into_iter().map(Predicate::for_identity).collect();
        match terms.len() {
            0 => None,
            1 => Some(terms.remove(0)),
            _ => Some(Predicate::Or(terms)),
        }
    }

    /// Equality of `columns[i]` with `values[i]` for every pair.
    pub fn for_columns(columns: &[String], values: &[Value]) -> Self {
        let mut terms: Vec<Predicate> = columns
            .iter()
            .zip(values)
            .map(|(c, v)| Predicate::Eq(c.clone(), v.clone()))
            .collect();
        if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::And(terms)
        }
    }

    /// `Eq` against null matches absent and null columns.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::Eq(column, value) => {
                let actual = row.get(column).unwrap_or(&Value::Null);
                values_equal(actual, value)
            }
            Predicate::And(terms) => terms.iter().all(|t| t.matches(row)),
            Predicate::Or(terms) => terms.iter().any(|t| t.matches(row)),
        }
    }

    pub fn columns(&self) -> Vec<&str> {
        match self {
            Predicate::Eq(column, _) => vec![column.as_str()],
            Predicate::And(terms) | Predicate::Or(terms) => terms.iter().flat_map(|t| t.columns()).collect(),
        }
    }
}

/// Numbers compare by value regardless of integer/float representation.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Total order used for `order_by`: null < bool < number < string < other.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ if rank(a) == rank(b) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub table: String,
    pub filter: Option<Predicate>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Query {
            table: table.into(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn order_by(mut self, columns: &[String]) -> Self {
        self.order_by = columns.to_vec();
        self
    }

    pub fn page(mut self, limit: Option<u64>, offset: Option<u64>) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Write {
    Insert { table: String, row: Row },
    Update { table: String, filter: Predicate, values: Row },
    Delete { table: String, filter: Predicate },
}

impl Write {
    pub fn table(&self) -> &str {
        match self {
            Write::Insert { table, .. } | Write::Update { table, .. } | Write::Delete { table, .. } => table,
        }
    }
}
