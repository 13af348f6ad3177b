//! One-hop neighbours of an instance, forward and reverse.

use crate::error::AppError;
use crate::session::{InstanceId, Session};
use std::collections::BTreeSet;

/// Union of the instance's own relationships and of every relationship of another type
/// that points at it, through foreign keys, join tables or custom join conditions.
pub async fn related_of(session: &mut Session, id: InstanceId) -> Result<BTreeSet<InstanceId>, AppError> {
    let registry = session.registry().clone();
    let entity = registry.require(&session.instance(id).entity)?;
    let mut out = BTreeSet::new();
    for rel in &entity.relationships {
        out.extend(session.related(id, &rel.name).await?);
    }
    for rel in registry.backrefs_of(&entity.name) {
        out.extend(session.referrers(id, rel).await?);
    }
    out.retain(|n| *n != id && session.is_alive(*n));
    Ok(out)
}
