//! Collects the cache keys a unit of work makes stale and evicts them after commit.

use crate::cache::Cache;
use crate::error::{AppError, CacheError};
use crate::related::related_of;
use crate::session::{InstanceId, Session};
use std::collections::{BTreeMap, BTreeSet};

/// Pending evictions grouped by entity key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Invalidation {
    keys: BTreeMap<String, BTreeSet<String>>,
}

impl Invalidation {
    pub fn record(&mut self, key: &str, subkey: &str) {
        self.keys.entry(key.to_string()).or_default().insert(subkey.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.keys
    }

    /// One `evict` call per entity key.
    pub async fn apply(self, cache: &dyn Cache) -> Result<(), CacheError> {
        for (key, subkeys) in self.keys {
            let subkeys: Vec<String> = subkeys.into_iter().collect();
            tracing::debug!(key = %key, count = subkeys.len(), "cache evict");
            cache.evict(&key, &subkeys).await?;
        }
        Ok(())
    }
}

fn record_instance(session: &mut Session, id: InstanceId) {
    if let Some((key, subkey)) = session.cache_key(id) {
        session.invalidation_mut().record(&key, &subkey);
    }
    let old = session
        .instance(id)
        .old_key()
        .map(|old| (session.entity_of(id).key.clone(), old.subkey().to_string()));
    if let Some((key, subkey)) = old {
        session.invalidation_mut().record(&key, &subkey);
    }
}

async fn record_neighbours(session: &mut Session, id: InstanceId) -> Result<(), AppError> {
    for n in related_of(session, id).await? {
        if let Some((key, subkey)) = session.cache_key(n) {
            session.invalidation_mut().record(&key, &subkey);
        }
    }
    Ok(())
}

/// Records an instance and its current neighbours before it is updated or deleted.
pub async fn capture_before(session: &mut Session, id: InstanceId) -> Result<(), AppError> {
    if session.cache().is_none() {
        return Ok(());
    }
    record_instance(session, id);
    record_neighbours(session, id).await
}

/// Records every touched instance with its neighbours as they stand after the flush.
pub async fn capture_after(session: &mut Session) -> Result<(), AppError> {
    let touched: Vec<InstanceId> = session.touched().collect();
    for id in touched {
        record_instance(session, id);
        if session.is_alive(id) {
            record_neighbours(session, id).await?;
        }
    }
    Ok(())
}
