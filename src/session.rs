//! Unit of work over one store transaction.
//!
//! The session owns every instance it has loaded or created in an arena addressed by
//! [`InstanceId`], keeps an identity map so one row maps to one instance, loads
//! relationships lazily, and turns pending changes into one batch of store writes per
//! flush. Queries against the store flush pending changes first.

use crate::cache::{invalidation::Invalidation, Cache};
use crate::error::{AppError, SchemaError};
use crate::model::{Identity, Row};
use crate::schema::{ColumnPair, Entity, JoinKind, Registry, Relationship, SecondaryJoin};
use crate::store::{Predicate, Query, Store, Write};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceState {
    /// Created in this session, not yet written.
    New,
    Persistent,
    /// Marked for deletion on the next flush.
    Deleted,
    /// Deleted and flushed, or discarded by a rollback.
    Detached,
}

#[derive(Clone, Debug)]
pub struct Instance {
    pub entity: String,
    pub values: Row,
    pub state: InstanceState,
    /// Identity the row has in the store.
    persisted: Option<Identity>,
    dirty: BTreeSet<String>,
    links: HashMap<String, Vec<InstanceId>>,
    old_key: Option<Identity>,
}

impl Instance {
    /// Identity held before the first primary-key-changing update, if any.
    pub fn old_key(&self) -> Option<&Identity> {
        self.old_key.as_ref()
    }
}

pub struct Session {
    registry: Arc<Registry>,
    store: Box<dyn Store>,
    cache: Option<Arc<dyn Cache>>,
    instances: Vec<Instance>,
    identity_map: HashMap<(String, Identity), InstanceId>,
    join_inserts: Vec<(String, Row)>,
    join_deletes: Vec<(String, Row)>,
    touched: BTreeSet<InstanceId>,
    invalidation: Invalidation,
}

impl Session {
    pub fn new(registry: Arc<Registry>, store: Box<dyn Store>) -> Self {
        Session {
            registry,
            store,
            cache: None,
            instances: Vec::new(),
            identity_map: HashMap::new(),
            join_inserts: Vec::new(),
            join_deletes: Vec::new(),
            touched: BTreeSet::new(),
            invalidation: Invalidation::default(),
        }
    }

    pub fn with_cache(mut self, cache: Option<Arc<dyn Cache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    pub fn instance(&self, id: InstanceId) -> &Instance {
        &self.instances[id.0]
    }

    pub fn values(&self, id: InstanceId) -> &Row {
        &self.instances[id.0].values
    }

    pub fn entity_of(&self, id: InstanceId) -> &Entity {
        let name = &self.instances[id.0].entity;
        self.registry
            .entity(name)
            .unwrap_or_else(|| unreachable!("instance of unregistered entity {}", name))
    }

    /// Identity from the current column values.
    pub fn identity(&self, id: InstanceId) -> Option<Identity> {
        let inst = &self.instances[id.0];
        let entity = self.registry.entity(&inst.entity)?;
        Identity::from_row(&entity.primary_keys, &inst.values)
    }

    pub fn identities(&self, ids: &[InstanceId]) -> Vec<Identity> {
        ids.iter().filter_map(|id| self.identity(*id)).collect()
    }

    /// Cache hash key and sub-key of an instance.
    pub fn cache_key(&self, id: InstanceId) -> Option<(String, String)> {
        let identity = self.identity(id)?;
        Some((self.entity_of(id).key.clone(), identity.subkey().to_string()))
    }

    /// Relationship members if already loaded.
    pub fn loaded(&self, id: InstanceId, name: &str) -> Option<&[InstanceId]> {
        self.instances[id.0].links.get(name).map(Vec::as_slice)
    }

    pub fn is_alive(&self, id: InstanceId) -> bool {
        matches!(
            self.instances[id.0].state,
            InstanceState::New | InstanceState::Persistent
        )
    }

    /// Adds a new instance. Every relationship starts loaded and empty.
    pub fn create(&mut self, entity: &str, values: Row) -> Result<InstanceId, AppError> {
        let e = self.registry.require(entity)?;
        let links = e.relationships.iter().map(|r| (r.name.clone(), Vec::new())).collect();
        let identity = Identity::from_row(&e.primary_keys, &values);
        let id = InstanceId(self.instances.len());
        self.instances.push(Instance {
            entity: entity.to_string(),
            values,
            state: InstanceState::New,
            persisted: None,
            dirty: BTreeSet::new(),
            links,
            old_key: None,
        });
        if let Some(identity) = identity {
            self.identity_map.insert((entity.to_string(), identity), id);
        }
        Ok(id)
    }

    /// Assigns column values. A primary key change re-keys the identity map and keeps
    /// the identity held before the first change as `old_key`.
    pub fn set_values(&mut self, id: InstanceId, values: Row) {
        if values.is_empty() {
            return;
        }
        let before = self.identity(id);
        let inst = &mut self.instances[id.0];
        for (k, v) in values {
            if inst.values.get(&k) != Some(&v) {
                inst.dirty.insert(k.clone());
                inst.values.insert(k, v);
            }
        }
        let after = self.identity(id);
        if before != after {
            let entity = self.instances[id.0].entity.clone();
            if let Some(b) = &before {
                if self.identity_map.get(&(entity.clone(), b.clone())) == Some(&id) {
                    self.identity_map.remove(&(entity.clone(), b.clone()));
                }
            }
            if let Some(a) = &after {
                self.identity_map.insert((entity, a.clone()), id);
            }
            let inst = &mut self.instances[id.0];
            if inst.old_key.is_none() && inst.persisted.is_some() && inst.persisted != after {
                inst.old_key = inst.persisted.clone();
            }
        }
    }

    pub fn touch(&mut self, id: InstanceId) {
        self.touched.insert(id);
    }

    pub fn touched(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.touched.iter().copied()
    }

    pub fn invalidation_mut(&mut self) -> &mut Invalidation {
        &mut self.invalidation
    }

    /// Marks an instance for deletion. A new instance is simply discarded.
    pub fn delete(&mut self, id: InstanceId) {
        let inst = &mut self.instances[id.0];
        match inst.state {
            InstanceState::New => {
                inst.state = InstanceState::Detached;
                if let Some(identity) = self.identity(id) {
                    let entity = self.instances[id.0].entity.clone();
                    self.identity_map.remove(&(entity, identity));
                }
            }
            InstanceState::Persistent => inst.state = InstanceState::Deleted,
            InstanceState::Deleted | InstanceState::Detached => {}
        }
    }

    fn materialize(&mut self, entity: &str, row: Row) -> Result<InstanceId, AppError> {
        let e = self.registry.require(entity)?;
        let identity = Identity::from_row(&e.primary_keys, &row);
        if let Some(identity) = &identity {
            if let Some(id) = self.identity_map.get(&(entity.to_string(), identity.clone())) {
                return Ok(*id);
            }
        }
        let id = InstanceId(self.instances.len());
        self.instances.push(Instance {
            entity: entity.to_string(),
            values: row,
            state: InstanceState::Persistent,
            persisted: identity.clone(),
            dirty: BTreeSet::new(),
            links: HashMap::new(),
            old_key: None,
        });
        if let Some(identity) = identity {
            self.identity_map.insert((entity.to_string(), identity), id);
        }
        Ok(id)
    }

    /// Raw store rows (entity or join table) after flushing pending changes.
    pub async fn query_rows(&mut self, query: &Query) -> Result<Vec<Row>, AppError> {
        self.flush().await?;
        Ok(self.store.query(query).await?)
    }

    /// Entity instances for a query, reusing instances already in the identity map.
    pub async fn query(&mut self, entity: &str, query: &Query) -> Result<Vec<InstanceId>, AppError> {
        let rows = self.query_rows(query).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id = self.materialize(entity, row)?;
            if self.is_alive(id) {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Looks identities up, first in the identity map, then in one batched store query.
    /// The result is positional: `None` where nothing matched.
    pub async fn find(&mut self, entity: &str, identities: &[Identity]) -> Result<Vec<Option<InstanceId>>, AppError> {
        let mut found: Vec<Option<InstanceId>> = identities
            .iter()
            .map(|i| {
                self.identity_map
                    .get(&(entity.to_string(), i.clone()))
                    .copied()
                    .filter(|id| self.is_alive(*id))
            })
            .collect();
        let missing: Vec<&Identity> = identities
            .iter()
            .zip(&found)
            .filter(|(_, f)| f.is_none())
            .map(|(i, _)| i)
            .collect();
        if let Some(filter) = Predicate::for_identities(missing) {
            let primary_keys = self.registry.require(entity)?.primary_keys.clone();
            let loaded = self.query(entity, &Query::table(entity).filter(filter)).await?;
            let by_identity: HashMap<Identity, InstanceId> = loaded
                .into_iter()
                .filter_map(|id| Identity::from_row(&primary_keys, self.values(id)).map(|i| (i, id)))
                .collect();
            for (slot, identity) in found.iter_mut().zip(identities) {
                if slot.is_none() {
                    *slot = by_identity.get(identity).copied();
                }
            }
        }
        Ok(found)
    }

    fn relationship(&self, id: InstanceId, name: &str) -> Result<Relationship, AppError> {
        let entity = self.entity_of(id);
        entity.relationship(name).cloned().ok_or_else(|| {
            AppError::Schema(SchemaError::UnknownRelationship {
                owner: entity.name.clone(),
                name: name.to_string(),
            })
        })
    }

    /// Current members of a relationship, loading them from the store on first access.
    pub async fn related(&mut self, id: InstanceId, name: &str) -> Result<Vec<InstanceId>, AppError> {
        if let Some(loaded) = self.instances[id.0].links.get(name) {
            return Ok(loaded.clone());
        }
        let rel = self.relationship(id, name)?;
        let loaded = match &rel.kind {
            JoinKind::ManyToOne | JoinKind::OneToMany => {
                let values = self.column_values(id, rel.read_pairs.iter().map(|p| &p.local));
                match values {
                    Some(values) => {
                        let remotes: Vec<String> = rel.read_pairs.iter().map(|p| p.remote.clone()).collect();
                        let order = self.registry.require(&rel.target)?.primary_keys.clone();
                        let q = Query::table(&rel.target)
                            .filter(Predicate::for_columns(&remotes, &values))
                            .order_by(&order);
                        self.query(&rel.target, &q).await?
                    }
                    None => Vec::new(),
                }
            }
            JoinKind::Secondary(join) => self.load_secondary(id, join, &rel.target, false).await?,
        };
        let loaded = if rel.uselist { loaded } else { loaded.into_iter().take(1).collect() };
        self.instances[id.0].links.insert(name.to_string(), loaded.clone());
        Ok(loaded)
    }

    /// Owners of `rel` whose relationship reaches `id`.
    pub async fn referrers(&mut self, id: InstanceId, rel: &Relationship) -> Result<Vec<InstanceId>, AppError> {
        match &rel.kind {
            JoinKind::ManyToOne | JoinKind::OneToMany => {
                let Some(values) = self.column_values(id, rel.read_pairs.iter().map(|p| &p.remote)) else {
                    return Ok(Vec::new());
                };
                let locals: Vec<String> = rel.read_pairs.iter().map(|p| p.local.clone()).collect();
                let q = Query::table(&rel.owner).filter(Predicate::for_columns(&locals, &values));
                self.query(&rel.owner, &q).await
            }
            JoinKind::Secondary(join) => self.load_secondary(id, join, &rel.owner, true).await,
        }
    }

    /// Walks a join table from `id` to the other side. `reverse` starts from the target side.
    async fn load_secondary(
        &mut self,
        id: InstanceId,
        join: &SecondaryJoin,
        other: &str,
        reverse: bool,
    ) -> Result<Vec<InstanceId>, AppError> {
        let (from, to): (&[ColumnPair], &[ColumnPair]) = if reverse {
            (join.target_pairs.as_slice(), join.owner_pairs.as_slice())
        } else {
            (join.owner_pairs.as_slice(), join.target_pairs.as_slice())
        };
        let Some(values) = self.column_values(id, from.iter().map(|p| &p.local)) else {
            return Ok(Vec::new());
        };
        let join_cols: Vec<String> = from.iter().map(|p| p.remote.clone()).collect();
        let rows = self
            .query_rows(&Query::table(&join.table).filter(Predicate::for_columns(&join_cols, &values)))
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let other_cols: Vec<String> = to.iter().map(|p| p.local.clone()).collect();
        let keys: Vec<Vec<Value>> = rows
            .iter()
            .map(|r| to.iter().map(|p| r.get(&p.remote).cloned().unwrap_or(Value::Null)).collect())
            .collect();
        let filter = Predicate::Or(keys.iter().map(|k| Predicate::for_columns(&other_cols, k)).collect());
        let found = self.query(other, &Query::table(other).filter(filter)).await?;
        let mut ordered = Vec::with_capacity(found.len());
        for key in &keys {
            for f in &found {
                let matches = other_cols
                    .iter()
                    .zip(key)
                    .all(|(c, v)| crate::store::values_equal(self.values(*f).get(c).unwrap_or(&Value::Null), v));
                if matches && !ordered.contains(f) {
                    ordered.push(*f);
                }
            }
        }
        Ok(ordered)
    }

    /// Values of the given columns, `None` when any of them is null.
    fn column_values<'a>(&self, id: InstanceId, columns: impl Iterator<Item = &'a String>) -> Option<Vec<Value>> {
        let values = &self.instances[id.0].values;
        columns
            .map(|c| values.get(c).filter(|v| !v.is_null()).cloned())
            .collect()
    }

    fn copy_columns(&self, from: InstanceId, pairs: &[ColumnPair], from_remote: bool) -> Row {
        let values = &self.instances[from.0].values;
        pairs
            .iter()
            .map(|p| {
                let (src, dst) = if from_remote { (&p.remote, &p.local) } else { (&p.local, &p.remote) };
                (dst.clone(), values.get(src).cloned().unwrap_or(Value::Null))
            })
            .collect()
    }

    fn null_columns<'a>(columns: impl Iterator<Item = &'a String>) -> Row {
        columns.map(|c| (c.clone(), Value::Null)).collect()
    }

    fn join_row(&self, owner: InstanceId, target: InstanceId, join: &SecondaryJoin) -> Row {
        let mut row = self.copy_columns(owner, &join.owner_pairs, false);
        row.extend(self.copy_columns(target, &join.target_pairs, false));
        row
    }

    pub async fn is_linked(&mut self, owner: InstanceId, name: &str, target: InstanceId) -> Result<bool, AppError> {
        Ok(self.related(owner, name).await?.contains(&target))
    }

    /// Adds `target` to a list relationship, or assigns it to a scalar one, and writes
    /// the foreign key columns (or join row) that express the link.
    pub async fn link(&mut self, owner: InstanceId, name: &str, target: InstanceId) -> Result<(), AppError> {
        let rel = self.relationship(owner, name)?;
        if rel.uselist {
            let current = self.related(owner, name).await?;
            if current.contains(&target) {
                return Ok(());
            }
        } else if matches!(rel.kind, JoinKind::OneToMany) {
            let current = self.related(owner, name).await?;
            if current.first() == Some(&target) {
                return Ok(());
            }
            for previous in current {
                self.set_values(previous, Self::null_columns(rel.pairs.iter().map(|p| &p.remote)));
                self.touch(previous);
            }
        }
        match &rel.kind {
            JoinKind::ManyToOne => {
                let fk = self.copy_columns(target, &rel.pairs, true);
                self.set_values(owner, fk);
            }
            JoinKind::OneToMany => {
                let fk = self.copy_columns(owner, &rel.pairs, false);
                self.set_values(target, fk);
            }
            JoinKind::Secondary(join) => {
                let row = self.join_row(owner, target, join);
                let pending = self
                    .join_deletes
                    .iter()
                    .position(|(t, r)| t == &join.table && r == &row);
                match pending {
                    Some(i) => {
                        self.join_deletes.remove(i);
                    }
                    None => self.join_inserts.push((join.table.clone(), row)),
                }
            }
        }
        let links = self.instances[owner.0].links.entry(name.to_string()).or_default();
        if rel.uselist {
            links.push(target);
        } else {
            *links = vec![target];
        }
        Ok(())
    }

    /// Removes `target` from the relationship. Returns false when it was not linked.
    pub async fn unlink(&mut self, owner: InstanceId, name: &str, target: InstanceId) -> Result<bool, AppError> {
        if !self.is_linked(owner, name, target).await? {
            return Ok(false);
        }
        let rel = self.relationship(owner, name)?;
        match &rel.kind {
            JoinKind::ManyToOne => {
                self.set_values(owner, Self::null_columns(rel.pairs.iter().map(|p| &p.local)));
            }
            JoinKind::OneToMany => {
                self.set_values(target, Self::null_columns(rel.pairs.iter().map(|p| &p.remote)));
            }
            JoinKind::Secondary(join) => {
                let row = self.join_row(owner, target, join);
                let pending = self
                    .join_inserts
                    .iter()
                    .position(|(t, r)| t == &join.table && r == &row);
                match pending {
                    Some(i) => {
                        self.join_inserts.remove(i);
                    }
                    None => self.join_deletes.push((join.table.clone(), row)),
                }
            }
        }
        if let Some(links) = self.instances[owner.0].links.get_mut(name) {
            links.retain(|t| *t != target);
        }
        Ok(true)
    }

    /// Clears a scalar relationship.
    pub async fn unlink_all(&mut self, owner: InstanceId, name: &str) -> Result<(), AppError> {
        for target in self.related(owner, name).await? {
            self.unlink(owner, name, target).await?;
        }
        Ok(())
    }

    /// New instances in foreign key dependency order; ties keep creation order and
    /// members of a cycle follow in creation order.
    fn dependency_order(&self, ids: &[InstanceId]) -> Vec<InstanceId> {
        let mut by_reference: HashMap<(String, String, String), Vec<InstanceId>> = HashMap::new();
        for id in ids {
            let inst = &self.instances[id.0];
            for (col, v) in &inst.values {
                if !v.is_null() {
                    by_reference
                        .entry((inst.entity.clone(), col.clone(), v.to_string()))
                        .or_default()
                        .push(*id);
                }
            }
        }
        let mut indegree: BTreeMap<InstanceId, usize> = ids.iter().map(|id| (*id, 0)).collect();
        let mut edges: HashMap<InstanceId, Vec<InstanceId>> = HashMap::new();
        for id in ids {
            let inst = &self.instances[id.0];
            let entity = self.entity_of(*id);
            for c in &entity.columns {
                let (Some(fk), Some(v)) = (&c.foreign_key, inst.values.get(&c.name)) else { continue };
                if v.is_null() {
                    continue;
                }
                let Some(parents) = by_reference.get(&(fk.table.clone(), fk.column.clone(), v.to_string())) else {
                    continue;
                };
                for parent in parents.iter().filter(|p| *p != id) {
                    edges.entry(*parent).or_default().push(*id);
                    *indegree.entry(*id).or_default() += 1;
                }
            }
        }
        let mut ready: VecDeque<InstanceId> = indegree.iter().filter(|(_, d)| **d == 0).map(|(id, _)| *id).collect();
        let mut ordered = Vec::with_capacity(ids.len());
        while let Some(id) = ready.pop_front() {
            ordered.push(id);
            let mut unlocked = Vec::new();
            for child in edges.get(&id).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(child) {
                    *d -= 1;
                    if *d == 0 {
                        unlocked.push(*child);
                    }
                }
            }
            unlocked.sort();
            for child in unlocked {
                let pos = ready.iter().position(|r| *r > child).unwrap_or(ready.len());
                ready.insert(pos, child);
            }
        }
        for id in ids {
            if !ordered.contains(id) {
                ordered.push(*id);
            }
        }
        ordered
    }

    /// Join rows referencing a deleted instance, for every many-to-many relationship it takes part in.
    fn cascade_join_deletes(&self, id: InstanceId) -> Vec<Write> {
        let entity = self.entity_of(id);
        let mut writes = Vec::new();
        let mut sides: Vec<(&SecondaryJoin, bool)> = Vec::new();
        for r in &entity.relationships {
            if let JoinKind::Secondary(join) = &r.kind {
                sides.push((join, false));
                if r.target == entity.name {
                    sides.push((join, true));
                }
            }
        }
        for r in self.registry.backrefs_of(&entity.name) {
            if let JoinKind::Secondary(join) = &r.kind {
                sides.push((join, true));
            }
        }
        let values = &self.instances[id.0].values;
        for (join, target_side) in sides {
            let pairs = if target_side { &join.target_pairs } else { &join.owner_pairs };
            let cols: Vec<String> = pairs.iter().map(|p| p.remote.clone()).collect();
            let vals: Vec<Value> = pairs
                .iter()
                .map(|p| values.get(&p.local).cloned().unwrap_or(Value::Null))
                .collect();
            writes.push(Write::Delete {
                table: join.table.clone(),
                filter: Predicate::for_columns(&cols, &vals),
            });
        }
        writes
    }

    /// Writes every pending change with one batched `add`.
    pub async fn flush(&mut self) -> Result<(), AppError> {
        let mut writes = Vec::new();
        for (table, row) in std::mem::take(&mut self.join_deletes) {
            let cols: Vec<String> = row.keys().cloned().collect();
            let vals: Vec<Value> = row.values().cloned().collect();
            writes.push(Write::Delete {
                table,
                filter: Predicate::for_columns(&cols, &vals),
            });
        }

        let new: Vec<InstanceId> = (0..self.instances.len())
            .map(InstanceId)
            .filter(|id| self.instances[id.0].state == InstanceState::New)
            .collect();
        for id in self.dependency_order(&new) {
            let inst = &self.instances[id.0];
            writes.push(Write::Insert {
                table: inst.entity.clone(),
                row: inst.values.clone(),
            });
        }

        let mut updated = Vec::new();
        for (i, inst) in self.instances.iter().enumerate() {
            if inst.state != InstanceState::Persistent || inst.dirty.is_empty() {
                continue;
            }
            let Some(persisted) = &inst.persisted else { continue };
            let values: Row = inst
                .dirty
                .iter()
                .map(|k| (k.clone(), inst.values.get(k).cloned().unwrap_or(Value::Null)))
                .collect();
            writes.push(Write::Update {
                table: inst.entity.clone(),
                filter: Predicate::for_identity(persisted),
                values,
            });
            updated.push(InstanceId(i));
        }

        for (table, row) in std::mem::take(&mut self.join_inserts) {
            writes.push(Write::Insert { table, row });
        }

        let deleted: Vec<InstanceId> = (0..self.instances.len())
            .map(InstanceId)
            .filter(|id| self.instances[id.0].state == InstanceState::Deleted)
            .collect();
        for id in &deleted {
            writes.extend(self.cascade_join_deletes(*id));
        }
        for id in self.dependency_order(&deleted).into_iter().rev() {
            let inst = &self.instances[id.0];
            if let Some(persisted) = &inst.persisted {
                writes.push(Write::Delete {
                    table: inst.entity.clone(),
                    filter: Predicate::for_identity(persisted),
                });
            }
        }

        if writes.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            writes = writes.len(),
            inserts = new.len(),
            updates = updated.len(),
            deletes = deleted.len(),
            "flush"
        );
        self.store.add(writes).await?;

        for id in new.iter().chain(&updated) {
            let identity = self.identity(*id);
            let inst = &mut self.instances[id.0];
            inst.state = InstanceState::Persistent;
            inst.persisted = identity;
            inst.dirty.clear();
        }
        for id in deleted {
            let identity = self.instances[id.0].persisted.clone();
            let entity = self.instances[id.0].entity.clone();
            self.instances[id.0].state = InstanceState::Detached;
            if let Some(identity) = identity {
                if self.identity_map.get(&(entity.clone(), identity.clone())) == Some(&id) {
                    self.identity_map.remove(&(entity, identity));
                }
            }
        }
        for inst in &mut self.instances {
            inst.links.clear();
        }
        Ok(())
    }

    /// Flushes, commits the store transaction and then evicts the cache keys of every
    /// touched instance and its neighbours.
    pub async fn commit(&mut self) -> Result<(), AppError> {
        self.flush().await?;
        if self.cache.is_some() {
            crate::cache::invalidation::capture_after(self).await?;
        }
        self.store.commit().await?;
        self.touched.clear();
        let invalidation = std::mem::take(&mut self.invalidation);
        if let Some(cache) = &self.cache {
            invalidation.apply(cache.as_ref()).await?;
        }
        Ok(())
    }

    /// Discards every pending change and all instances.
    pub async fn rollback(&mut self) -> Result<(), AppError> {
        self.store.rollback().await?;
        for inst in &mut self.instances {
            inst.state = InstanceState::Detached;
            inst.links.clear();
        }
        self.identity_map.clear();
        self.join_inserts.clear();
        self.join_deletes.clear();
        self.touched.clear();
        self.invalidation = Invalidation::default();
        tracing::debug!("session rolled back");
        Ok(())
    }
}
