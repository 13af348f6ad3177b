//! PostgreSQL store over sqlx. One lazily opened transaction per session.

use crate::error::StoreError;
use crate::model::{normalize_value, Row};
use crate::schema::{Registry, Table};
use crate::sql::{self, QueryBuf};
use crate::store::{Query, Store, StoreFactory, Write};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Transaction};
use std::sync::Arc;

#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
    registry: Arc<Registry>,
    schema: String,
}

impl PgDatabase {
    pub fn new(pool: PgPool, registry: Arc<Registry>, schema: impl Into<String>) -> Self {
        PgDatabase {
            pool,
            registry,
            schema: schema.into(),
        }
    }

    pub async fn connect(url: &str, registry: Arc<Registry>, schema: impl Into<String>) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        tracing::info!("connected to PostgreSQL");
        Ok(Self::new(pool, registry, schema))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StoreFactory for PgDatabase {
    async fn begin(&self) -> Result<Box<dyn Store>, StoreError> {
        Ok(Box::new(PgStore {
            db: self.clone(),
            tx: None,
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }
}

pub struct PgStore {
    db: PgDatabase,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStore {
    fn table(&self, name: &str) -> Result<Table<'_>, StoreError> {
        self.db
            .registry
            .table(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    async fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        if self.tx.is_none() {
            self.tx = Some(self.db.pool.begin().await?);
        }
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::Other("transaction not open".into()))
    }

    async fn execute(&mut self, q: QueryBuf) -> Result<u64, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let tx = self.tx().await?;
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        let done = query.execute(&mut **tx).await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn query(&mut self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let (q, kinds) = {
            let table = self.table(&query.table)?;
            let kinds: Vec<_> = table.columns.iter().map(|c| (c.name.clone(), c.kind)).collect();
            (sql::select(&table, &self.db.schema, query)?, kinds)
        };
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let tx = self.tx().await?;
        let mut sqlx_query = sqlx::query(&q.sql);
        for p in &q.params {
            sqlx_query = sqlx_query.bind(p.clone());
        }
        let rows = sqlx_query.fetch_all(&mut **tx).await?;
        rows.iter().map(|r| row_to_map(r, &kinds)).collect()
    }

    async fn add(&mut self, writes: Vec<Write>) -> Result<(), StoreError> {
        for w in &writes {
            let q = {
                let table = self.table(w.table())?;
                match w {
                    Write::Insert { row, .. } => sql::insert(&table, &self.db.schema, row)?,
                    Write::Update { filter, values, .. } => {
                        if values.is_empty() {
                            continue;
                        }
                        sql::update(&table, &self.db.schema, filter, values)?
                    }
                    Write::Delete { filter, .. } => sql::delete(&table, &self.db.schema, filter)?,
                }
            };
            self.execute(q).await.map_err(unique_violation_as_conflict)?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
            tracing::debug!("transaction committed");
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
            tracing::debug!("transaction rolled back");
        }
        Ok(())
    }
}

fn unique_violation_as_conflict(err: StoreError) -> StoreError {
    match err {
        StoreError::Db(sqlx::Error::Database(db)) if db.is_unique_violation() => StoreError::Conflict(db.message().to_string()),
        other => other,
    }
}

/// Decodes a row selected as `to_jsonb(col)` per column into canonical values.
fn row_to_map(row: &PgRow, kinds: &[(String, crate::schema::ScalarKind)]) -> Result<Row, StoreError> {
    use sqlx::Row as _;
    let mut map = Row::new();
    for (name, kind) in kinds {
        let v: Option<Value> = row.try_get(name.as_str())?;
        let v = v.map(|v| normalize_value(*kind, &v)).unwrap_or(Value::Null);
        map.insert(name.clone(), v);
    }
    Ok(map)
}
