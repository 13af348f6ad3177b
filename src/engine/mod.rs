//! Graph mutation engine: insert, update, delete and fetch entity graphs from nested
//! JSON payloads inside one session.
//!
//! Every operation takes the session explicitly. When an operation fails the session
//! is rolled back so nothing it staged reaches the store.

mod fragment;

use crate::cache::{self, invalidation::capture_before};
use crate::error::{AppError, GraphMutationError, MutationErrorKind};
use crate::marshal::Marshaller;
use crate::model::{Identity, ProjectionSchema};
use crate::session::{InstanceId, Session};
use crate::store::{Predicate, Query};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Optional limit/offset of a fetch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Page {
    pub fn new(limit: Option<u64>, offset: Option<u64>) -> Self {
        Page { limit, offset }
    }

    fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let offset = self.offset.unwrap_or(0) as usize;
        let rest = items.iter().skip(offset).cloned();
        match self.limit {
            Some(limit) => rest.take(limit as usize).collect(),
            None => rest.collect(),
        }
    }
}

pub struct GraphEngine;

/// Splits a payload into its objects: a single object or a list of objects.
fn objects(payload: &Value) -> Result<Vec<Map<String, Value>>, AppError> {
    let invalid = || {
        AppError::Mutation(GraphMutationError::new(
            MutationErrorKind::InvalidPayload("expected an object or a list of objects".into()),
            payload,
        ))
    };
    match payload {
        Value::Object(obj) => Ok(vec![obj.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_object().cloned().ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

impl GraphEngine {
    /// Inserts every object of `payload` with its nested graph.
    pub async fn insert(
        session: &mut Session,
        entity: &str,
        payload: &Value,
        commit: bool,
    ) -> Result<Vec<InstanceId>, AppError> {
        let result = Self::insert_inner(session, entity, payload, commit).await;
        Self::finish(session, result).await
    }

    async fn insert_inner(
        session: &mut Session,
        entity: &str,
        payload: &Value,
        commit: bool,
    ) -> Result<Vec<InstanceId>, AppError> {
        session.registry().require(entity)?;
        let mut ids = Vec::new();
        for obj in objects(payload)? {
            ids.push(fragment::insert_object(session, entity, obj, payload).await?);
        }
        session.flush().await?;
        if commit {
            session.commit().await?;
        }
        tracing::debug!(entity = %entity, count = ids.len(), "inserted");
        Ok(ids)
    }

    /// Updates existing instances. `ids` replaces the identities embedded in the
    /// payload and must pair up with its objects. Only the instances found are
    /// returned; an empty result means nothing matched.
    pub async fn update(
        session: &mut Session,
        entity: &str,
        payload: &Value,
        ids: Option<Vec<Identity>>,
        commit: bool,
    ) -> Result<Vec<InstanceId>, AppError> {
        let result = Self::update_inner(session, entity, payload, ids, commit).await;
        Self::finish(session, result).await
    }

    async fn update_inner(
        session: &mut Session,
        entity: &str,
        payload: &Value,
        ids: Option<Vec<Identity>>,
        commit: bool,
    ) -> Result<Vec<InstanceId>, AppError> {
        let registry = session.registry().clone();
        let e = registry.require(entity)?;
        let mut objs = objects(payload)?;
        for obj in objs.iter_mut() {
            fragment::reject_code(obj, payload)?;
        }
        let identities = match ids {
            Some(ids) => {
                if ids.len() != objs.len() {
                    return Err(AppError::Mutation(GraphMutationError::new(
                        MutationErrorKind::InvalidPayload(format!(
                            "{} identities given for {} objects",
                            ids.len(),
                            objs.len()
                        )),
                        payload,
                    )));
                }
                ids
            }
            None => objs
                .iter()
                .map(|obj| {
                    fragment::payload_identity(e, obj).map_err(|field| {
                        AppError::Mutation(GraphMutationError::new(
                            MutationErrorKind::MissingIdentity {
                                op: "update",
                                field,
                                fragment: Value::Object(obj.clone()),
                            },
                            payload,
                        ))
                    })
                })
                .collect::<Result<_, _>>()?,
        };
        let found = session.find(entity, &identities).await?;
        let mut out = Vec::new();
        for (obj, id) in objs.into_iter().zip(found) {
            let Some(id) = id else { continue };
            capture_before(session, id).await?;
            fragment::apply_update(session, e, id, obj, payload).await?;
            session.touch(id);
            out.push(id);
        }
        session.flush().await?;
        if commit {
            session.commit().await?;
        }
        tracing::debug!(entity = %entity, requested = identities.len(), updated = out.len(), "updated");
        Ok(out)
    }

    /// Deletes every instance matching `ids`, returning the identities deleted.
    pub async fn delete(
        session: &mut Session,
        entity: &str,
        ids: Vec<Identity>,
        commit: bool,
    ) -> Result<BTreeSet<Identity>, AppError> {
        let result = Self::delete_inner(session, entity, ids, commit).await;
        Self::finish(session, result).await
    }

    async fn delete_inner(
        session: &mut Session,
        entity: &str,
        ids: Vec<Identity>,
        commit: bool,
    ) -> Result<BTreeSet<Identity>, AppError> {
        session.registry().require(entity)?;
        let Some(filter) = Predicate::for_identities(&ids) else {
            return Ok(BTreeSet::new());
        };
        let found = session.query(entity, &Query::table(entity).filter(filter)).await?;
        let mut deleted = BTreeSet::new();
        for id in found {
            if let Some(identity) = session.identity(id) {
                deleted.insert(identity);
            }
            capture_before(session, id).await?;
            session.delete(id);
            session.touch(id);
        }
        session.flush().await?;
        if commit {
            session.commit().await?;
        }
        tracing::debug!(entity = %entity, count = deleted.len(), "deleted");
        Ok(deleted)
    }

    /// Without ids: a scan ordered by primary key. With ids: the matches in request
    /// order, duplicates dropped, the page slicing the id list.
    pub async fn get(
        session: &mut Session,
        entity: &str,
        ids: Option<Vec<Identity>>,
        page: Page,
    ) -> Result<Vec<InstanceId>, AppError> {
        let result = Self::get_inner(session, entity, ids, page).await;
        Self::finish(session, result).await
    }

    async fn get_inner(
        session: &mut Session,
        entity: &str,
        ids: Option<Vec<Identity>>,
        page: Page,
    ) -> Result<Vec<InstanceId>, AppError> {
        let primary_keys = session.registry().require(entity)?.primary_keys.clone();
        match ids {
            None => {
                let q = Query::table(entity).order_by(&primary_keys).page(page.limit, page.offset);
                session.query(entity, &q).await
            }
            Some(ids) => {
                let ids = page.slice(&dedupe(ids));
                let found = session.find(entity, &ids).await?;
                Ok(found.into_iter().flatten().collect())
            }
        }
    }

    /// Marshalled dicts for [`GraphEngine::get`]. Id lookups with the default
    /// projection read through the cache when one is configured.
    pub async fn get_marshalled(
        session: &mut Session,
        entity: &str,
        ids: Option<Vec<Identity>>,
        page: Page,
        projection: Option<&ProjectionSchema>,
    ) -> Result<Vec<Value>, AppError> {
        let result = Self::get_marshalled_inner(session, entity, ids, page, projection).await;
        Self::finish(session, result).await
    }

    async fn get_marshalled_inner(
        session: &mut Session,
        entity: &str,
        ids: Option<Vec<Identity>>,
        page: Page,
        projection: Option<&ProjectionSchema>,
    ) -> Result<Vec<Value>, AppError> {
        let cache = session.cache().cloned();
        let (ids, cache) = match (ids, cache, projection) {
            (Some(ids), Some(cache), None) => (ids, cache),
            (ids, _, projection) => {
                let found = Self::get_inner(session, entity, ids, page).await?;
                return Marshaller::marshal_many(session, &found, projection).await;
            }
        };
        let key = session.registry().require(entity)?.key.clone();
        let ids = page.slice(&dedupe(ids));
        let subkeys: Vec<String> = ids.iter().map(|i| i.subkey().to_string()).collect();
        let cached = cache.get_many(&key, &subkeys).await?;

        let mut answers: Vec<Option<Value>> = Vec::with_capacity(ids.len());
        let mut misses = Vec::new();
        for (i, hit) in cached.into_iter().enumerate() {
            match hit {
                Some(bytes) => answers.push(Some(cache::decode(&bytes)?)),
                None => {
                    answers.push(None);
                    misses.push(i);
                }
            }
        }
        tracing::debug!(key = %key, hits = ids.len() - misses.len(), misses = misses.len(), "cache lookup");

        if !misses.is_empty() {
            let wanted: Vec<Identity> = misses.iter().map(|i| ids[*i].clone()).collect();
            let found = session.find(entity, &wanted).await?;
            let mut entries = Vec::new();
            for (slot, id) in misses.into_iter().zip(found) {
                let Some(id) = id else { continue };
                let dict = Marshaller::marshal(session, id, None).await?;
                entries.push((subkeys[slot].clone(), cache::encode(&dict)?));
                answers[slot] = Some(dict);
            }
            if !entries.is_empty() {
                cache.set_many(&key, entries).await?;
            }
        }
        Ok(answers.into_iter().flatten().collect())
    }

    async fn finish<T>(session: &mut Session, result: Result<T, AppError>) -> Result<T, AppError> {
        if result.is_err() {
            if let Err(e) = session.rollback().await {
                tracing::warn!(error = %e, "rollback after failed operation");
            }
        }
        result
    }
}

fn dedupe(ids: Vec<Identity>) -> Vec<Identity> {
    let mut seen = BTreeSet::new();
    ids.into_iter().filter(|i| seen.insert(i.clone())).collect()
}
