//! In-memory store. Each transaction works on a private copy and replays its write log
//! onto the shared tables on commit.

use crate::error::StoreError;
use crate::model::{Identity, Row};
use crate::schema::Registry;
use crate::store::{compare_values, Query, Store, StoreFactory, Write};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type Tables = BTreeMap<String, Vec<Row>>;

#[derive(Clone, Debug, Default)]
pub struct MemoryDatabase {
    tables: Arc<RwLock<Tables>>,
    primary_keys: Arc<HashMap<String, Vec<String>>>,
}

impl MemoryDatabase {
    /// Creates an empty table for every entity and join table of the registry.
    pub fn new(registry: &Registry) -> Self {
        let mut tables = Tables::new();
        let mut primary_keys = HashMap::new();
        for t in registry.tables() {
            tables.insert(t.name.to_string(), Vec::new());
            primary_keys.insert(t.name.to_string(), t.primary_keys.to_vec());
        }
        MemoryDatabase {
            tables: Arc::new(RwLock::new(tables)),
            primary_keys: Arc::new(primary_keys),
        }
    }

    /// Committed rows of a table, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl StoreFactory for MemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn Store>, StoreError> {
        Ok(Box::new(MemoryStore {
            db: self.clone(),
            working: None,
            log: Vec::new(),
        }))
    }
}

pub struct MemoryStore {
    db: MemoryDatabase,
    working: Option<Tables>,
    log: Vec<Write>,
}

impl MemoryStore {
    fn working(&mut self) -> &mut Tables {
        let db = &self.db;
        self.working.get_or_insert_with(|| db.tables.read().clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn query(&mut self, query: &Query) -> Result<Vec<Row>, StoreError> {
        tracing::debug!(table = %query.table, filter = ?query.filter, "memory query");
        let rows = self
            .working()
            .get(&query.table)
            .ok_or_else(|| StoreError::UnknownTable(query.table.clone()))?;
        let mut out: Vec<Row> = rows
            .iter()
            .filter(|r| query.filter.as_ref().map(|p| p.matches(r)).unwrap_or(true))
            .cloned()
            .collect();
        if !query.order_by.is_empty() {
            out.sort_by(|a, b| {
                query
                    .order_by
                    .iter()
                    .map(|c| {
                        compare_values(
                            a.get(c).unwrap_or(&serde_json::Value::Null),
                            b.get(c).unwrap_or(&serde_json::Value::Null),
                        )
                    })
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }

    async fn add(&mut self, writes: Vec<Write>) -> Result<(), StoreError> {
        let primary_keys = self.db.primary_keys.clone();
        let tables = self.working();
        for w in &writes {
            tracing::debug!(write = ?w, "memory write");
            apply(tables, &primary_keys, w)?;
        }
        self.log.extend(writes);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let log = std::mem::take(&mut self.log);
        self.working = None;
        if log.is_empty() {
            return Ok(());
        }
        let mut shared = self.db.tables.write();
        let mut next = shared.clone();
        for w in &log {
            apply(&mut next, &self.db.primary_keys, w)?;
        }
        *shared = next;
        tracing::debug!(writes = log.len(), "memory commit");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.log.clear();
        self.working = None;
        Ok(())
    }
}

fn apply(tables: &mut Tables, primary_keys: &HashMap<String, Vec<String>>, write: &Write) -> Result<(), StoreError> {
    let table = write.table();
    let pks = primary_keys.get(table).map(Vec::as_slice).unwrap_or(&[]);
    let rows = tables
        .get_mut(table)
        .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
    match write {
        Write::Insert { row, .. } => {
            if let Some(id) = Identity::from_row(pks, row) {
                if rows.iter().any(|r| Identity::from_row(pks, r).as_ref() == Some(&id)) {
                    return Err(StoreError::Conflict(format!("{} {} already exists", table, id)));
                }
            }
            rows.push(row.clone());
        }
        Write::Update { filter, values, .. } => {
            let changes_key = values.keys().any(|k| pks.contains(k));
            for i in 0..rows.len() {
                if !filter.matches(&rows[i]) {
                    continue;
                }
                let mut updated = rows[i].clone();
                for (k, v) in values {
                    updated.insert(k.clone(), v.clone());
                }
                if changes_key {
                    let id = Identity::from_row(pks, &updated);
                    let taken = rows
                        .iter()
                        .enumerate()
                        .any(|(j, r)| j != i && id.is_some() && Identity::from_row(pks, r) == id);
                    if taken {
                        return Err(StoreError::Conflict(format!(
                            "{} {} already exists",
                            table,
                            id.map(|k| k.to_string()).unwrap_or_default()
                        )));
                    }
                }
                rows[i] = updated;
            }
        }
        Write::Delete { filter, .. } => rows.retain(|r| !filter.matches(r)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnConfig, EntityConfig, ScalarKind, SchemaConfig};
    use crate::store::Predicate;
    use serde_json::json;

    fn db() -> MemoryDatabase {
        let registry = Registry::from_config(SchemaConfig {
            entities: vec![EntityConfig::new("item")
                .column(ColumnConfig::new("id", ScalarKind::Integer).primary())
                .column(ColumnConfig::new("name", ScalarKind::String))],
            join_tables: Vec::new(),
        })
        .unwrap();
        MemoryDatabase::new(&registry)
    }

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn insert(id: i64) -> Write {
        Write::Insert {
            table: "item".into(),
            row: row(json!({"id": id, "name": format!("n{}", id)})),
        }
    }

    #[tokio::test]
    async fn writes_are_private_until_commit() {
        let db = db();
        let mut tx = db.begin().await.unwrap();
        tx.add(vec![insert(1), insert(2)]).await.unwrap();
        assert_eq!(tx.query(&Query::table("item")).await.unwrap().len(), 2);
        assert!(db.rows("item").is_empty());
        tx.commit().await.unwrap();
        assert_eq!(db.rows("item").len(), 2);
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let db = db();
        let mut tx = db.begin().await.unwrap();
        tx.add(vec![insert(1)]).await.unwrap();
        tx.rollback().await.unwrap();
        tx.commit().await.unwrap();
        assert!(db.rows("item").is_empty());
    }

    #[tokio::test]
    async fn duplicate_key_conflicts() {
        let db = db();
        let mut tx = db.begin().await.unwrap();
        let err = tx.add(vec![insert(1), insert(1)]).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn query_filters_orders_and_pages() {
        let db = db();
        let mut tx = db.begin().await.unwrap();
        tx.add(vec![insert(3), insert(1), insert(2)]).await.unwrap();
        let q = Query::table("item").order_by(&["id".to_string()]).page(Some(2), Some(1));
        let ids: Vec<_> = tx.query(&q).await.unwrap().iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(2), json!(3)]);

        tx.add(vec![Write::Update {
            table: "item".into(),
            filter: Predicate::eq("id", json!(1)),
            values: row(json!({"name": "renamed"})),
        }])
        .await
        .unwrap();
        let found = tx
            .query(&Query::table("item").filter(Predicate::eq("name", json!("renamed"))))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], json!(1));
    }
}
