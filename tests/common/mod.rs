#![allow(dead_code)]

use modelrest::cache::Cache;
use modelrest::schema::{ColumnConfig, EntityConfig, JoinTableConfig, RelationshipConfig, ScalarKind};
use modelrest::{
    GraphEngine, Identity, Marshaller, MemoryDatabase, Page, Registry, SchemaConfig, Session, StoreFactory,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn id_column() -> ColumnConfig {
    ColumnConfig::new("id", ScalarKind::Integer).primary()
}

pub fn int_column(name: &str) -> ColumnConfig {
    ColumnConfig::new(name, ScalarKind::Integer)
}

pub fn text_column(name: &str) -> ColumnConfig {
    ColumnConfig::new(name, ScalarKind::String)
}

pub fn fk(name: &str, table: &str) -> ColumnConfig {
    int_column(name).references(table, "id")
}

pub fn registry(entities: Vec<EntityConfig>, join_tables: Vec<JoinTableConfig>) -> Arc<Registry> {
    Arc::new(Registry::from_config(SchemaConfig { entities, join_tables }).unwrap())
}

/// `model3 -> model2 -> model1`, every link many-to-one.
pub fn chain() -> Arc<Registry> {
    registry(
        vec![
            EntityConfig::new("model1").column(id_column()).column(text_column("test")),
            EntityConfig::new("model2")
                .column(id_column())
                .column(fk("model1_id", "model1"))
                .column(text_column("test"))
                .relationship(RelationshipConfig::new("model1", "model1")),
            model3(),
        ],
        vec![],
    )
}

/// `model2.model1` is a list through the `mtm` join table.
pub fn many_to_many() -> Arc<Registry> {
    registry(
        vec![
            EntityConfig::new("model1").column(id_column()).column(text_column("test")),
            EntityConfig::new("model2")
                .column(id_column())
                .relationship(RelationshipConfig::new("model1", "model1").secondary("mtm")),
            model3(),
        ],
        vec![JoinTableConfig {
            name: "mtm".into(),
            columns: vec![fk("model1_id", "model1"), fk("model2_id", "model2")],
        }],
    )
}

/// `model1.model2` is a one-to-many list over `model2.model1_id`.
pub fn one_to_many() -> Arc<Registry> {
    registry(
        vec![
            EntityConfig::new("model1")
                .column(id_column())
                .relationship(RelationshipConfig::new("model2", "model2")),
            EntityConfig::new("model2")
                .column(id_column())
                .column(fk("model1_id", "model1"))
                .column(text_column("test")),
            model3(),
        ],
        vec![],
    )
}

fn model3() -> EntityConfig {
    EntityConfig::new("model3")
        .column(id_column())
        .column(fk("model1_id", "model1"))
        .column(fk("model2_id", "model2"))
        .relationship(RelationshipConfig::new("model1", "model1"))
        .relationship(RelationshipConfig::new("model2", "model2"))
}

pub fn ident(id: i64) -> Identity {
    Identity::from_pairs([("id", json!(id))])
}

pub struct Fixture {
    pub registry: Arc<Registry>,
    pub db: MemoryDatabase,
    pub cache: Option<Arc<dyn Cache>>,
}

impl Fixture {
    pub fn new(registry: Arc<Registry>) -> Self {
        let db = MemoryDatabase::new(&registry);
        Fixture { registry, db, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn session(&self) -> Session {
        let store = self.db.begin().await.unwrap();
        Session::new(self.registry.clone(), store).with_cache(self.cache.clone())
    }

    /// Inserts and commits, answering with the marshalled roots.
    pub async fn insert(&self, entity: &str, payload: Value) -> Vec<Value> {
        let mut session = self.session().await;
        let ids = GraphEngine::insert(&mut session, entity, &payload, true).await.unwrap();
        Marshaller::marshal_many(&mut session, &ids, None).await.unwrap()
    }

    pub async fn update(&self, entity: &str, payload: Value) -> Result<Vec<Value>, modelrest::AppError> {
        let mut session = self.session().await;
        let ids = GraphEngine::update(&mut session, entity, &payload, None, true).await?;
        Marshaller::marshal_many(&mut session, &ids, None).await
    }

    /// Committed state of one row as a dict.
    pub async fn fetch(&self, entity: &str, id: i64) -> Option<Value> {
        let mut session = self.session().await;
        GraphEngine::get_marshalled(&mut session, entity, Some(vec![ident(id)]), Page::default(), None)
            .await
            .unwrap()
            .pop()
    }
}
