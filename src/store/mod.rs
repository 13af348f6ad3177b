//! Relational storage behind the session: trait, predicates and the shipped stores.

pub mod filter;
pub mod memory;
pub mod postgres;

pub use filter::*;
pub use memory::{MemoryDatabase, MemoryStore};
pub use postgres::{PgDatabase, PgStore};

use crate::error::StoreError;
use crate::model::Row;
use async_trait::async_trait;

/// One open store transaction. Writes become visible to other transactions on `commit`.
#[async_trait]
pub trait Store: Send {
    async fn query(&mut self, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Applies a batch of writes in order.
    async fn add(&mut self, writes: Vec<Write>) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Opens one store transaction per session.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Store>, StoreError>;

    /// Readiness check.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
