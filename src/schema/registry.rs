//! Resolved entity registry: primary keys, field table, relationship join paths and back-references.

use crate::error::SchemaError;
use crate::model::ProjectionSchema;
use crate::schema::{validator, ColumnConfig, EntityConfig, JoinTableConfig, RelationshipConfig, SchemaConfig};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// `local` is a column of the relationship owner (or of the first table in a join step),
/// `remote` a column of the target (or the second table).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ColumnPair {
    pub local: String,
    pub remote: String,
}

impl ColumnPair {
    fn new(local: &str, remote: &str) -> Self {
        ColumnPair {
            local: local.to_string(),
            remote: remote.to_string(),
        }
    }
}

/// Join table path of a many-to-many relationship.
#[derive(Clone, Debug, PartialEq)]
pub struct SecondaryJoin {
    pub table: String,
    /// owner column -> join table column
    pub owner_pairs: Vec<ColumnPair>,
    /// target column -> join table column
    pub target_pairs: Vec<ColumnPair>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum JoinKind {
    /// Owner holds the foreign key columns.
    ManyToOne,
    /// Target holds the foreign key columns.
    OneToMany,
    Secondary(SecondaryJoin),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Relationship {
    pub owner: String,
    pub name: String,
    pub target: String,
    pub uselist: bool,
    pub kind: JoinKind,
    /// Foreign key pairs, `target.remote == owner.local`. Empty for `Secondary`.
    pub pairs: Vec<ColumnPair>,
    /// Pairs used when loading the relationship; the custom join condition when declared.
    pub read_pairs: Vec<ColumnPair>,
}

/// Back-reference handle: relationship `name` declared on `owner`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationshipRef {
    pub owner: String,
    pub name: String,
}

/// What a payload key names on an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Column(usize),
    Relationship(usize),
}

#[derive(Clone, Debug)]
pub struct Entity {
    pub name: String,
    pub key: String,
    /// Sorted by column name.
    pub primary_keys: Vec<String>,
    pub columns: Vec<ColumnConfig>,
    pub relationships: Vec<Relationship>,
    pub todict_schema: ProjectionSchema,
    pub operations: Vec<String>,
    fields: HashMap<String, Field>,
}

impl Entity {
    pub fn field(&self, name: &str) -> Option<Field> {
        self.fields.get(name).copied()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnConfig> {
        match self.field(name)? {
            Field::Column(i) => self.columns.get(i),
            Field::Relationship(_) => None,
        }
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        match self.field(name)? {
            Field::Relationship(i) => self.relationships.get(i),
            Field::Column(_) => None,
        }
    }

    /// Whether the HTTP verb (lowercase) is exposed. An empty list exposes everything.
    pub fn allows(&self, method: &str) -> bool {
        self.operations.is_empty() || self.operations.iter().any(|o| o == method)
    }
}

#[derive(Clone, Debug)]
pub struct JoinTable {
    pub name: String,
    pub columns: Vec<ColumnConfig>,
    pub primary_keys: Vec<String>,
}

/// Storage view of an entity table or a join table.
#[derive(Clone, Copy, Debug)]
pub struct Table<'a> {
    pub name: &'a str,
    pub columns: &'a [ColumnConfig],
    pub primary_keys: &'a [String],
}

#[derive(Clone, Debug, Default)]
pub struct Registry {
    configs: Vec<EntityConfig>,
    join_configs: Vec<JoinTableConfig>,
    entities: BTreeMap<String, Entity>,
    keys: HashMap<String, String>,
    join_tables: BTreeMap<String, JoinTable>,
    backrefs: BTreeMap<String, BTreeSet<RelationshipRef>>,
}

impl Registry {
    pub fn from_config(config: SchemaConfig) -> Result<Registry, SchemaError> {
        Self::build(config.entities, config.join_tables)
    }

    /// Registers one more type and re-resolves every relationship.
    pub fn register_type(&mut self, config: EntityConfig) -> Result<(), SchemaError> {
        let mut entities = self.configs.clone();
        entities.push(config);
        *self = Self::build(entities, self.join_configs.clone())?;
        Ok(())
    }

    /// New registry with the given types and join tables added.
    pub fn extend(
        &self,
        entities: Vec<EntityConfig>,
        join_tables: Vec<JoinTableConfig>,
    ) -> Result<Registry, SchemaError> {
        let mut all_entities = self.configs.clone();
        all_entities.extend(entities);
        let mut all_joins = self.join_configs.clone();
        all_joins.extend(join_tables);
        Self::build(all_entities, all_joins)
    }

    fn build(entities: Vec<EntityConfig>, join_tables: Vec<JoinTableConfig>) -> Result<Registry, SchemaError> {
        validator::validate(&entities, &join_tables)?;

        let names: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        for e in &entities {
            for r in &e.relationships {
                if !names.contains(r.target.as_str()) {
                    return Err(SchemaError::UnresolvedTarget {
                        owner: e.name.clone(),
                        name: r.name.clone(),
                        target: r.target.clone(),
                    });
                }
            }
        }

        let by_name: HashMap<&str, &EntityConfig> = entities.iter().map(|e| (e.name.as_str(), e)).collect();
        let join_by_name: HashMap<&str, &JoinTableConfig> =
            join_tables.iter().map(|j| (j.name.as_str(), j)).collect();

        let mut resolved = BTreeMap::new();
        let mut keys = HashMap::new();
        for e in &entities {
            let primary_keys = primary_keys_of(e)?;
            let mut relationships = Vec::with_capacity(e.relationships.len());
            for r in &e.relationships {
                relationships.push(resolve_relationship(e, r, &by_name, &join_by_name)?);
            }
            let mut fields = HashMap::new();
            for (i, c) in e.columns.iter().enumerate() {
                fields.insert(c.name.clone(), Field::Column(i));
            }
            for (i, r) in e.relationships.iter().enumerate() {
                fields.insert(r.name.clone(), Field::Relationship(i));
            }
            let key = e.key.clone().unwrap_or_else(|| e.name.clone());
            keys.insert(key.clone(), e.name.clone());
            // key columns never hold null
            let mut columns = e.columns.clone();
            for c in columns.iter_mut().filter(|c| primary_keys.contains(&c.name)) {
                c.nullable = false;
            }
            resolved.insert(
                e.name.clone(),
                Entity {
                    name: e.name.clone(),
                    key,
                    primary_keys,
                    columns,
                    relationships,
                    todict_schema: e.todict_schema.clone(),
                    operations: e.operations.clone(),
                    fields,
                },
            );
        }

        let join_resolved = join_tables
            .iter()
            .map(|j| {
                let mut primary_keys: Vec<String> =
                    j.columns.iter().filter(|c| c.primary_key).map(|c| c.name.clone()).collect();
                if primary_keys.is_empty() {
                    primary_keys = j.columns.iter().map(|c| c.name.clone()).collect();
                }
                primary_keys.sort();
                (
                    j.name.clone(),
                    JoinTable {
                        name: j.name.clone(),
                        columns: j.columns.clone(),
                        primary_keys,
                    },
                )
            })
            .collect();

        let mut registry = Registry {
            configs: entities,
            join_configs: join_tables,
            entities: resolved,
            keys,
            join_tables: join_resolved,
            backrefs: BTreeMap::new(),
        };
        registry.rebuild_backrefs();
        tracing::debug!(
            entities = registry.entities.len(),
            join_tables = registry.join_tables.len(),
            "registry built"
        );
        Ok(registry)
    }

    /// Recomputes back-references from the declared relationships. Idempotent.
    pub fn rebuild_backrefs(&mut self) {
        let mut backrefs: BTreeMap<String, BTreeSet<RelationshipRef>> =
            self.entities.keys().map(|k| (k.clone(), BTreeSet::new())).collect();
        for e in self.entities.values() {
            for r in &e.relationships {
                if r.target == e.name {
                    continue;
                }
                backrefs.entry(r.target.clone()).or_default().insert(RelationshipRef {
                    owner: e.name.clone(),
                    name: r.name.clone(),
                });
            }
        }
        self.backrefs = backrefs;
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    pub fn entity_by_key(&self, key: &str) -> Option<&Entity> {
        self.keys.get(key).and_then(|name| self.entities.get(name))
    }

    /// Looks up an entity or fails with `UnknownEntity`.
    pub fn require(&self, name: &str) -> Result<&Entity, SchemaError> {
        self.entity(name).ok_or_else(|| SchemaError::UnknownEntity(name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn relationships_of(&self, name: &str) -> &[Relationship] {
        self.entity(name).map(|e| e.relationships.as_slice()).unwrap_or(&[])
    }

    pub fn columns_of(&self, name: &str) -> &[ColumnConfig] {
        self.entity(name).map(|e| e.columns.as_slice()).unwrap_or(&[])
    }

    pub fn relationship(&self, owner: &str, name: &str) -> Option<&Relationship> {
        self.entity(owner)?.relationship(name)
    }

    pub fn backref_handles(&self, name: &str) -> Option<&BTreeSet<RelationshipRef>> {
        self.backrefs.get(name)
    }

    /// Relationships of other types that point at `name`, in handle order.
    pub fn backrefs_of(&self, name: &str) -> Vec<&Relationship> {
        self.backrefs
            .get(name)
            .map(|set| set.iter().filter_map(|r| self.relationship(&r.owner, &r.name)).collect())
            .unwrap_or_default()
    }

    pub fn table(&self, name: &str) -> Option<Table<'_>> {
        if let Some(e) = self.entities.get(name) {
            return Some(Table {
                name: &e.name,
                columns: &e.columns,
                primary_keys: &e.primary_keys,
            });
        }
        self.join_tables.get(name).map(|j| Table {
            name: &j.name,
            columns: &j.columns,
            primary_keys: &j.primary_keys,
        })
    }

    pub fn tables(&self) -> impl Iterator<Item = Table<'_>> {
        self.entities
            .keys()
            .chain(self.join_tables.keys())
            .filter_map(|name| self.table(name))
    }
}

fn primary_keys_of(e: &EntityConfig) -> Result<Vec<String>, SchemaError> {
    let mut keys: Vec<String> = e
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.clone())
        .collect();
    if keys.is_empty() && e.columns.iter().any(|c| c.name == "id") {
        keys.push("id".to_string());
    }
    if keys.is_empty() {
        return Err(SchemaError::MissingPrimaryKey(e.name.clone()));
    }
    keys.sort();
    Ok(keys)
}

fn references(column: &ColumnConfig, table: &str) -> bool {
    column.foreign_key.as_ref().map(|fk| fk.table == table).unwrap_or(false)
}

fn referenced_column(column: &ColumnConfig) -> &str {
    column.foreign_key.as_ref().map(|fk| fk.column.as_str()).unwrap_or("")
}

/// Two foreign keys onto the same referenced column mean two candidate paths.
fn single_path(columns: &[&ColumnConfig]) -> bool {
    let mut seen = HashSet::new();
    columns.iter().all(|c| seen.insert(referenced_column(c)))
}

fn resolve_relationship(
    owner: &EntityConfig,
    rel: &RelationshipConfig,
    entities: &HashMap<&str, &EntityConfig>,
    join_tables: &HashMap<&str, &JoinTableConfig>,
) -> Result<Relationship, SchemaError> {
    let invalid = |message: &str| SchemaError::InvalidRelationship {
        owner: owner.name.clone(),
        name: rel.name.clone(),
        message: message.to_string(),
    };
    let no_path = || SchemaError::NoJoinPath {
        owner: owner.name.clone(),
        name: rel.name.clone(),
        target: rel.target.clone(),
    };
    let ambiguous = || SchemaError::AmbiguousJoin {
        owner: owner.name.clone(),
        name: rel.name.clone(),
        target: rel.target.clone(),
    };
    let target = entities.get(rel.target.as_str()).ok_or_else(|| SchemaError::UnresolvedTarget {
        owner: owner.name.clone(),
        name: rel.name.clone(),
        target: rel.target.clone(),
    })?;
    let keep = |c: &&ColumnConfig| rel.foreign_keys.is_empty() || rel.foreign_keys.contains(&c.name);

    if let Some(secondary) = &rel.secondary {
        if !rel.join_condition.is_empty() {
            return Err(invalid("join_condition is not supported with a secondary table"));
        }
        if rel.uselist == Some(false) {
            return Err(invalid("a relationship through a secondary table always holds a list"));
        }
        let join = join_tables.get(secondary.as_str()).ok_or_else(|| SchemaError::MissingReference {
            kind: "join table",
            id: secondary.clone(),
        })?;
        let (owner_side, target_side): (Vec<&ColumnConfig>, Vec<&ColumnConfig>) = if owner.name == rel.target {
            if rel.foreign_keys.is_empty() {
                return Err(ambiguous());
            }
            join.columns
                .iter()
                .filter(|c| references(c, &owner.name))
                .partition(|c| rel.foreign_keys.contains(&c.name))
        } else {
            (
                join.columns.iter().filter(|c| references(c, &owner.name)).filter(keep).collect(),
                join.columns.iter().filter(|c| references(c, &rel.target)).filter(keep).collect(),
            )
        };
        if owner_side.is_empty() || target_side.is_empty() {
            return Err(no_path());
        }
        if !single_path(&owner_side) || !single_path(&target_side) {
            return Err(ambiguous());
        }
        let to_pairs = |cols: &[&ColumnConfig]| {
            cols.iter()
                .map(|c| ColumnPair::new(referenced_column(c), &c.name))
                .collect::<Vec<_>>()
        };
        return Ok(Relationship {
            owner: owner.name.clone(),
            name: rel.name.clone(),
            target: rel.target.clone(),
            uselist: true,
            kind: JoinKind::Secondary(SecondaryJoin {
                table: secondary.clone(),
                owner_pairs: to_pairs(&owner_side),
                target_pairs: to_pairs(&target_side),
            }),
            pairs: Vec::new(),
            read_pairs: Vec::new(),
        });
    }

    let forward: Vec<&ColumnConfig> = owner
        .columns
        .iter()
        .filter(|c| references(c, &rel.target))
        .filter(keep)
        .collect();
    let reverse: Vec<&ColumnConfig> = target
        .columns
        .iter()
        .filter(|c| references(c, &owner.name))
        .filter(keep)
        .collect();
    // A self-referential foreign key reads as one-to-many only when a list is asked for.
    let prefer_reverse = if owner.name == rel.target {
        rel.uselist == Some(true)
    } else {
        forward.is_empty()
    };

    let (kind, pairs, uselist) = if !prefer_reverse && !forward.is_empty() {
        if rel.uselist == Some(true) {
            return Err(invalid("a many-to-one relationship can't hold a list"));
        }
        if !single_path(&forward) {
            return Err(ambiguous());
        }
        let pairs = forward
            .iter()
            .map(|c| ColumnPair::new(&c.name, referenced_column(c)))
            .collect::<Vec<_>>();
        (JoinKind::ManyToOne, pairs, false)
    } else if !reverse.is_empty() {
        if !single_path(&reverse) {
            return Err(ambiguous());
        }
        let pairs = reverse
            .iter()
            .map(|c| ColumnPair::new(referenced_column(c), &c.name))
            .collect::<Vec<_>>();
        (JoinKind::OneToMany, pairs, rel.uselist.unwrap_or(true))
    } else {
        return Err(no_path());
    };

    let mut read_pairs = Vec::with_capacity(rel.join_condition.len());
    for term in &rel.join_condition {
        if !owner.columns.iter().any(|c| c.name == term.local) {
            return Err(SchemaError::MissingReference {
                kind: "column",
                id: format!("{}.{}", owner.name, term.local),
            });
        }
        if !target.columns.iter().any(|c| c.name == term.remote) {
            return Err(SchemaError::MissingReference {
                kind: "column",
                id: format!("{}.{}", target.name, term.remote),
            });
        }
        read_pairs.push(ColumnPair::new(&term.local, &term.remote));
    }
    if read_pairs.is_empty() {
        read_pairs = pairs.clone();
    }

    Ok(Relationship {
        owner: owner.name.clone(),
        name: rel.name.clone(),
        target: rel.target.clone(),
        uselist,
        kind,
        pairs,
        read_pairs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnConfig, ScalarKind};

    fn parent() -> EntityConfig {
        EntityConfig::new("parent").column(ColumnConfig::new("id", ScalarKind::Integer).primary())
    }

    fn child() -> EntityConfig {
        EntityConfig::new("child")
            .column(ColumnConfig::new("id", ScalarKind::Integer).primary())
            .column(ColumnConfig::new("parent_id", ScalarKind::Integer).references("parent", "id"))
            .relationship(RelationshipConfig::new("parent", "parent"))
    }

    fn registry(entities: Vec<EntityConfig>) -> Result<Registry, SchemaError> {
        Registry::from_config(SchemaConfig {
            entities,
            join_tables: Vec::new(),
        })
    }

    #[test]
    fn infers_many_to_one_from_owner_foreign_key() {
        let reg = registry(vec![parent(), child()]).unwrap();
        let rel = reg.relationship("child", "parent").unwrap();
        assert_eq!(rel.kind, JoinKind::ManyToOne);
        assert!(!rel.uselist);
        assert_eq!(rel.pairs, vec![ColumnPair::new("parent_id", "id")]);
    }

    #[test]
    fn infers_one_to_many_from_target_foreign_key() {
        let p = parent().relationship(RelationshipConfig::new("children", "child"));
        let reg = registry(vec![p, child()]).unwrap();
        let rel = reg.relationship("parent", "children").unwrap();
        assert_eq!(rel.kind, JoinKind::OneToMany);
        assert!(rel.uselist);
        assert_eq!(rel.pairs, vec![ColumnPair::new("id", "parent_id")]);
    }

    #[test]
    fn primary_key_falls_back_to_id_column() {
        let e = EntityConfig::new("plain").column(ColumnConfig::new("id", ScalarKind::Integer));
        let reg = registry(vec![e]).unwrap();
        assert_eq!(reg.entity("plain").unwrap().primary_keys, vec!["id".to_string()]);
    }

    #[test]
    fn composite_primary_keys_are_sorted() {
        let e = EntityConfig::new("pair")
            .column(ColumnConfig::new("z", ScalarKind::Integer).primary())
            .column(ColumnConfig::new("a", ScalarKind::String).primary());
        let reg = registry(vec![e]).unwrap();
        assert_eq!(reg.entity("pair").unwrap().primary_keys, vec!["a", "z"]);
    }

    #[test]
    fn missing_primary_key_fails() {
        let e = EntityConfig::new("nokey").column(ColumnConfig::new("name", ScalarKind::String));
        assert_eq!(
            registry(vec![e]).unwrap_err(),
            SchemaError::MissingPrimaryKey("nokey".into())
        );
    }

    #[test]
    fn two_foreign_keys_to_same_target_are_ambiguous() {
        let c = EntityConfig::new("doc")
            .column(ColumnConfig::new("id", ScalarKind::Integer).primary())
            .column(ColumnConfig::new("author_id", ScalarKind::Integer).references("parent", "id"))
            .column(ColumnConfig::new("editor_id", ScalarKind::Integer).references("parent", "id"))
            .relationship(RelationshipConfig::new("author", "parent"));
        assert!(matches!(
            registry(vec![parent(), c.clone()]).unwrap_err(),
            SchemaError::AmbiguousJoin { .. }
        ));

        let mut rel = RelationshipConfig::new("author", "parent");
        rel.foreign_keys = vec!["author_id".into()];
        let mut c = c;
        c.relationships = vec![rel];
        let reg = registry(vec![parent(), c]).unwrap();
        assert_eq!(
            reg.relationship("doc", "author").unwrap().pairs,
            vec![ColumnPair::new("author_id", "id")]
        );
    }

    #[test]
    fn relationship_without_foreign_key_has_no_path() {
        let p = parent().relationship(RelationshipConfig::new("other", "loner"));
        let loner = EntityConfig::new("loner").column(ColumnConfig::new("id", ScalarKind::Integer).primary());
        assert!(matches!(
            registry(vec![p, loner]).unwrap_err(),
            SchemaError::NoJoinPath { .. }
        ));
    }

    #[test]
    fn register_type_rejects_unknown_target() {
        let mut reg = registry(vec![parent()]).unwrap();
        let err = reg
            .register_type(
                EntityConfig::new("orphan")
                    .column(ColumnConfig::new("id", ScalarKind::Integer).primary())
                    .relationship(RelationshipConfig::new("ghost", "ghost")),
            )
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnresolvedTarget { .. }));
        assert!(reg.entity("orphan").is_none());
        assert!(reg.entity("parent").is_some());
    }

    #[test]
    fn register_type_adds_backrefs_to_existing_types() {
        let mut reg = registry(vec![parent()]).unwrap();
        assert!(reg.backrefs_of("parent").is_empty());
        reg.register_type(child()).unwrap();
        let backrefs = reg.backrefs_of("parent");
        assert_eq!(backrefs.len(), 1);
        assert_eq!(backrefs[0].owner, "child");
    }

    #[test]
    fn backref_build_is_idempotent() {
        let mut reg = registry(vec![parent(), child()]).unwrap();
        let before = reg.backref_handles("parent").cloned();
        reg.rebuild_backrefs();
        reg.rebuild_backrefs();
        assert_eq!(reg.backref_handles("parent").cloned(), before);
        assert_eq!(before.map(|s| s.len()), Some(1));
    }

    #[test]
    fn self_reference_is_not_a_backref() {
        let node = EntityConfig::new("node")
            .column(ColumnConfig::new("id", ScalarKind::Integer).primary())
            .column(ColumnConfig::new("parent_id", ScalarKind::Integer).references("node", "id"))
            .relationship(RelationshipConfig::new("parent", "node"))
            .relationship(RelationshipConfig::new("children", "node").uselist(true));
        let reg = registry(vec![node]).unwrap();
        assert!(reg.backrefs_of("node").is_empty());
        assert_eq!(reg.relationship("node", "parent").unwrap().kind, JoinKind::ManyToOne);
        assert_eq!(reg.relationship("node", "children").unwrap().kind, JoinKind::OneToMany);
    }

    #[test]
    fn extend_keeps_original_untouched() {
        let reg = registry(vec![parent()]).unwrap();
        let bigger = reg.extend(vec![child()], Vec::new()).unwrap();
        assert!(reg.entity("child").is_none());
        assert!(bigger.entity("child").is_some());
        assert!(bigger.entity_by_key("child").is_some());
    }
}
