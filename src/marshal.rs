//! Instance to nested JSON, following a projection schema.

use crate::error::AppError;
use crate::model::ProjectionSchema;
use crate::session::{InstanceId, Session};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub struct Marshaller;

impl Marshaller {
    /// Loads what the projection reaches, then renders it.
    pub async fn marshal(
        session: &mut Session,
        id: InstanceId,
        projection: Option<&ProjectionSchema>,
    ) -> Result<Value, AppError> {
        session.flush().await?;
        let mut path = Vec::new();
        load(session, id, projection.cloned(), &mut path).await?;
        Ok(Self::to_dict(session, id, projection))
    }

    pub async fn marshal_many(
        session: &mut Session,
        ids: &[InstanceId],
        projection: Option<&ProjectionSchema>,
    ) -> Result<Vec<Value>, AppError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(Self::marshal(session, *id, projection).await?);
        }
        Ok(out)
    }

    /// Renders already loaded state. `None` uses the type's `todict_schema`. A column or
    /// relationship is emitted unless the projection sets it to `false`.
    pub fn to_dict(session: &Session, id: InstanceId, projection: Option<&ProjectionSchema>) -> Value {
        let mut path = Vec::new();
        dict(session, id, projection, &mut path)
    }
}

fn load<'a>(
    session: &'a mut Session,
    id: InstanceId,
    projection: Option<ProjectionSchema>,
    path: &'a mut Vec<InstanceId>,
) -> BoxFuture<'a, Result<(), AppError>> {
    Box::pin(async move {
        let registry = session.registry().clone();
        let entity = registry.require(&session.instance(id).entity)?;
        let schema = projection.unwrap_or_else(|| entity.todict_schema.clone());
        path.push(id);
        for rel in &entity.relationships {
            if schema.excludes(&rel.name) {
                continue;
            }
            let nested = schema.nested(&rel.name).cloned();
            for target in session.related(id, &rel.name).await? {
                if path.contains(&target) {
                    continue;
                }
                load(session, target, nested.clone(), path).await?;
            }
        }
        path.pop();
        Ok(())
    })
}

fn dict(session: &Session, id: InstanceId, projection: Option<&ProjectionSchema>, path: &mut Vec<InstanceId>) -> Value {
    let entity = session.entity_of(id);
    let values = session.values(id);
    let schema = projection.unwrap_or(&entity.todict_schema);
    let mut map = Map::new();
    for c in &entity.columns {
        if schema.excludes(&c.name) {
            continue;
        }
        map.insert(c.name.clone(), values.get(&c.name).cloned().unwrap_or(Value::Null));
    }
    // already on the path: columns only
    if path.contains(&id) {
        return Value::Object(map);
    }
    path.push(id);
    for rel in &entity.relationships {
        if schema.excludes(&rel.name) {
            continue;
        }
        let nested = schema.nested(&rel.name);
        let targets = session.loaded(id, &rel.name).unwrap_or(&[]);
        let value = if rel.uselist {
            Value::Array(targets.iter().map(|t| dict(session, *t, nested, path)).collect())
        } else {
            targets
                .first()
                .map(|t| dict(session, *t, nested, path))
                .unwrap_or(Value::Null)
        };
        map.insert(rel.name.clone(), value);
    }
    path.pop();
    Value::Object(map)
}
