//! Recursive resolution of one payload object and its relationship fragments.

use crate::cache::invalidation::capture_before;
use crate::error::{AppError, GraphMutationError, MutationErrorKind};
use crate::model::{normalize_value, Identity, Row};
use crate::schema::{Entity, Field, Generated, Relationship};
use crate::session::{InstanceId, Session};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a fragment that names an identity nobody has is treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Insert context: the fragment is inserted.
    Create,
    /// Update context: the fragment must refer to an existing instance.
    Strict,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Code {
    Update,
    Delete,
    Remove,
}

impl Code {
    fn name(self) -> &'static str {
        match self {
            Code::Update => "update",
            Code::Delete => "delete",
            Code::Remove => "remove",
        }
    }
}

const CODES: [(&str, Code); 3] = [("_update", Code::Update), ("_delete", Code::Delete), ("_remove", Code::Remove)];

/// What to do with a resolved related instance once the owner exists.
#[derive(Clone, Copy, Debug)]
enum Attach {
    Link(InstanceId),
    Delete(InstanceId),
    Remove(InstanceId),
    /// `null` on a scalar relationship.
    Clear,
}

fn mutation(kind: MutationErrorKind, input: &Value) -> AppError {
    AppError::Mutation(GraphMutationError::new(kind, input))
}

fn invalid(message: String, input: &Value) -> AppError {
    mutation(MutationErrorKind::InvalidPayload(message), input)
}

/// Two or more code keys are ambiguous whatever they hold. A single code counts when its
/// key holds anything but `false` or `null`.
fn take_code(fragment: &mut Map<String, Value>, input: &Value) -> Result<Option<Code>, AppError> {
    let original = Value::Object(fragment.clone());
    let mut present = Vec::new();
    for (key, code) in CODES {
        if let Some(v) = fragment.remove(key) {
            present.push((code, v));
        }
    }
    if present.len() > 1 {
        return Err(mutation(
            MutationErrorKind::AmbiguousOperation {
                ops: present.iter().map(|(c, _)| c.name()).collect(),
                fragment: original,
            },
            input,
        ));
    }
    Ok(present
        .pop()
        .filter(|(_, v)| !matches!(v, Value::Null | Value::Bool(false)))
        .map(|(code, _)| code))
}

/// Operation codes are only meaningful on nested fragments.
pub(crate) fn reject_code(obj: &mut Map<String, Value>, input: &Value) -> Result<(), AppError> {
    match take_code(obj, input)? {
        Some(code) => Err(invalid(format!("'_{}' is only allowed on nested objects", code.name()), input)),
        None => Ok(()),
    }
}

/// Identity from the key fields of a payload object, or the first missing key field.
pub(crate) fn payload_identity(entity: &Entity, obj: &Map<String, Value>) -> Result<Identity, String> {
    let mut pairs = Vec::with_capacity(entity.primary_keys.len());
    for pk in &entity.primary_keys {
        match obj.get(pk) {
            Some(v) if !v.is_null() => {
                let v = entity.column(pk).map(|c| normalize_value(c.kind, v)).unwrap_or_else(|| v.clone());
                pairs.push((pk.clone(), v));
            }
            _ => return Err(pk.clone()),
        }
    }
    Ok(Identity::from_pairs(pairs))
}

struct Split {
    columns: Row,
    relationships: Vec<(Relationship, Value)>,
}

fn split(entity: &Entity, obj: Map<String, Value>, input: &Value) -> Result<Split, AppError> {
    let mut columns = Row::new();
    let mut relationships = Vec::new();
    for (k, v) in obj {
        match entity.field(&k) {
            Some(Field::Column(i)) => {
                let kind = entity.columns[i].kind;
                columns.insert(k, normalize_value(kind, &v));
            }
            Some(Field::Relationship(i)) => relationships.push((entity.relationships[i].clone(), v)),
            None => {
                return Err(mutation(
                    MutationErrorKind::InvalidField {
                        entity: entity.name.clone(),
                        field: k,
                    },
                    input,
                ))
            }
        }
    }
    Ok(Split { columns, relationships })
}

fn fill_defaults(entity: &Entity, values: &mut Row) {
    for c in &entity.columns {
        if values.contains_key(&c.name) {
            continue;
        }
        if let Some(default) = &c.default {
            values.insert(c.name.clone(), default.clone());
        } else if c.generated == Some(Generated::Uuid) {
            values.insert(c.name.clone(), Value::String(uuid::Uuid::new_v4().to_string()));
        }
    }
}

async fn require_existing(
    session: &mut Session,
    target: &Entity,
    code: Code,
    fragment: &Map<String, Value>,
    original: &Value,
    input: &Value,
) -> Result<InstanceId, AppError> {
    let identity = payload_identity(target, fragment).map_err(|field| {
        mutation(
            MutationErrorKind::MissingIdentity {
                op: code.name(),
                field,
                fragment: original.clone(),
            },
            input,
        )
    })?;
    let found = session.find(&target.name, std::slice::from_ref(&identity)).await?;
    found.into_iter().next().flatten().ok_or_else(|| {
        mutation(
            MutationErrorKind::NotFound {
                op: code.name(),
                entity: target.name.clone(),
                identity: identity.to_string(),
                fragment: original.clone(),
            },
            input,
        )
    })
}

/// Resolves the fragments given for one relationship into attach actions.
fn resolve<'a>(
    session: &'a mut Session,
    rel: &'a Relationship,
    value: Value,
    mode: Mode,
    input: &'a Value,
) -> BoxFuture<'a, Result<Vec<Attach>, AppError>> {
    Box::pin(async move {
        let fragments = match (rel.uselist, value) {
            (false, Value::Null) => return Ok(vec![Attach::Clear]),
            (true, Value::Array(items)) => items,
            (_, Value::Object(obj)) => vec![Value::Object(obj)],
            (uselist, _) => {
                return Err(invalid(
                    format!(
                        "relationship '{}' expects {}",
                        rel.name,
                        if uselist { "a list of objects" } else { "an object or null" }
                    ),
                    input,
                ))
            }
        };
        let registry = session.registry().clone();
        let target = registry.require(&rel.target)?;
        let mut actions = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let Value::Object(mut fragment) = fragment else {
                return Err(invalid(format!("items of '{}' must be objects", rel.name), input));
            };
            let original = Value::Object(fragment.clone());
            let code = take_code(&mut fragment, input)?;
            match code {
                Some(Code::Update) => {
                    let id = require_existing(session, target, Code::Update, &fragment, &original, input).await?;
                    capture_before(session, id).await?;
                    apply_update(session, target, id, fragment, input).await?;
                    session.touch(id);
                    actions.push(Attach::Link(id));
                }
                Some(Code::Delete) => {
                    let id = require_existing(session, target, Code::Delete, &fragment, &original, input).await?;
                    capture_before(session, id).await?;
                    actions.push(Attach::Delete(id));
                }
                Some(Code::Remove) => {
                    let id = require_existing(session, target, Code::Remove, &fragment, &original, input).await?;
                    actions.push(Attach::Remove(id));
                }
                None => {
                    let existing = match payload_identity(target, &fragment) {
                        Ok(identity) => {
                            let found = session.find(&target.name, std::slice::from_ref(&identity)).await?;
                            match found.into_iter().next().flatten() {
                                Some(id) => Some(id),
                                None if mode == Mode::Strict => {
                                    return Err(mutation(
                                        MutationErrorKind::NotFound {
                                            op: "get",
                                            entity: target.name.clone(),
                                            identity: identity.to_string(),
                                            fragment: original,
                                        },
                                        input,
                                    ))
                                }
                                None => None,
                            }
                        }
                        Err(_) => None,
                    };
                    let id = match existing {
                        Some(id) => {
                            if fragment.len() > target.primary_keys.len() {
                                tracing::debug!(entity = %target.name, "fields besides the identity ignored on get");
                            }
                            id
                        }
                        None => insert_object(session, &target.name, fragment, input).await?,
                    };
                    actions.push(Attach::Link(id));
                }
            }
        }
        Ok(actions)
    })
}

async fn attach(
    session: &mut Session,
    owner: InstanceId,
    plans: Vec<(Relationship, Vec<Attach>)>,
    input: &Value,
) -> Result<(), AppError> {
    for (rel, actions) in plans {
        for action in actions {
            match action {
                Attach::Link(target) => {
                    session.link(owner, &rel.name, target).await?;
                    session.touch(target);
                }
                Attach::Clear => session.unlink_all(owner, &rel.name).await?,
                Attach::Delete(target) => {
                    session.unlink(owner, &rel.name, target).await?;
                    session.delete(target);
                    session.touch(target);
                }
                Attach::Remove(target) => {
                    if !session.unlink(owner, &rel.name, target).await? {
                        let entity = session.entity_of(target);
                        let values = session
                            .identity(target)
                            .map(|i| i.fields().map(|(_, v)| v.to_string()).collect::<Vec<_>>().join(", "))
                            .unwrap_or_default();
                        return Err(mutation(
                            MutationErrorKind::NotLinked {
                                entity: entity.name.clone(),
                                columns: entity.primary_keys.join(", "),
                                values,
                            },
                            input,
                        ));
                    }
                    session.touch(target);
                }
            }
        }
    }
    Ok(())
}

async fn resolve_all(
    session: &mut Session,
    relationships: Vec<(Relationship, Value)>,
    mode: Mode,
    input: &Value,
) -> Result<Vec<(Relationship, Vec<Attach>)>, AppError> {
    let mut plans = Vec::with_capacity(relationships.len());
    for (rel, value) in relationships {
        let actions = resolve(session, &rel, value, mode, input).await?;
        plans.push((rel, actions));
    }
    Ok(plans)
}

/// Inserts one object: nested fragments first, then the instance, then its links.
pub(crate) fn insert_object<'a>(
    session: &'a mut Session,
    entity: &'a str,
    obj: Map<String, Value>,
    input: &'a Value,
) -> BoxFuture<'a, Result<InstanceId, AppError>> {
    Box::pin(async move {
        let registry = session.registry().clone();
        let e = registry.require(entity)?;
        let mut obj = obj;
        reject_code(&mut obj, input)?;
        let Split { mut columns, relationships } = split(e, obj, input)?;
        let plans = resolve_all(session, relationships, Mode::Create, input).await?;
        fill_defaults(e, &mut columns);
        let id = session.create(entity, columns)?;
        session.touch(id);
        attach(session, id, plans, input).await?;
        Ok(id)
    })
}

/// Applies an update to an existing instance: nested fragments, then columns, then links.
pub(crate) fn apply_update<'a>(
    session: &'a mut Session,
    entity: &'a Entity,
    id: InstanceId,
    obj: Map<String, Value>,
    input: &'a Value,
) -> BoxFuture<'a, Result<(), AppError>> {
    Box::pin(async move {
        let Split { columns, relationships } = split(entity, obj, input)?;
        let plans = resolve_all(session, relationships, Mode::Strict, input).await?;
        session.set_values(id, columns);
        attach(session, id, plans, input).await
    })
}
