//! OpenAPI document of one entity, served at `GET /{key}/_schema`, and the `Link`
//! header pointing every entity response at it.

use crate::schema::{ColumnConfig, Entity, Registry, ScalarKind};
use crate::state::AppState;
use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use utoipa::openapi::path::{HttpMethod, OperationBuilder, PathItemBuilder};
use utoipa::openapi::response::ResponseBuilder;
use utoipa::openapi::schema::{
    Array, KnownFormat, ObjectBuilder, Ref, Schema, SchemaFormat, SchemaType, Type,
};
use utoipa::openapi::{ComponentsBuilder, InfoBuilder, OpenApi, OpenApiBuilder, PathsBuilder, RefOr};

fn column_schema(column: &ColumnConfig) -> RefOr<Schema> {
    let (ty, format) = match column.kind {
        ScalarKind::Integer => (Some(Type::Integer), Some(KnownFormat::Int64)),
        ScalarKind::Number => (Some(Type::Number), Some(KnownFormat::Double)),
        ScalarKind::String => (Some(Type::String), None),
        ScalarKind::Boolean => (Some(Type::Boolean), None),
        ScalarKind::Json => (None, None),
        ScalarKind::Uuid => (Some(Type::String), Some(KnownFormat::Uuid)),
        ScalarKind::Timestamp => (Some(Type::String), Some(KnownFormat::DateTime)),
    };
    let schema_type = match ty {
        None => SchemaType::AnyValue,
        Some(ty) if column.nullable => SchemaType::Array(vec![ty, Type::Null]),
        Some(ty) => SchemaType::Type(ty),
    };
    let mut builder = ObjectBuilder::new()
        .schema_type(schema_type)
        .format(format.map(SchemaFormat::KnownFormat));
    if let Some(default) = &column.default {
        builder = builder.default(Some(default.clone()));
    }
    if let Some(rule) = &column.validation {
        builder = builder
            .max_length(rule.max_length.map(|n| n as usize))
            .min_length(rule.min_length.map(|n| n as usize))
            .pattern(rule.pattern.clone());
        if let Some(allowed) = &rule.allowed {
            builder = builder.enum_values(Some(allowed.clone()));
        }
    }
    RefOr::T(Schema::Object(builder.build()))
}

fn entity_schema(entity: &Entity) -> RefOr<Schema> {
    let mut builder = ObjectBuilder::new().schema_type(SchemaType::Type(Type::Object));
    for c in &entity.columns {
        builder = builder.property(c.name.clone(), column_schema(c));
        if !c.nullable && c.default.is_none() && c.generated.is_none() {
            builder = builder.required(c.name.clone());
        }
    }
    for r in &entity.relationships {
        let target: RefOr<Schema> = Ref::from_schema_name(r.target.clone()).into();
        let schema = if r.uselist {
            RefOr::T(Schema::Array(Array::new(target)))
        } else {
            target
        };
        builder = builder.property(r.name.clone(), schema);
    }
    RefOr::T(Schema::Object(builder.build()))
}

fn operation(summary: String, status: &str, description: &str) -> utoipa::openapi::path::Operation {
    OperationBuilder::new()
        .summary(Some(summary))
        .response(status, RefOr::T(ResponseBuilder::new().description(description).build()))
        .build()
}

/// The entity's schema plus every schema it reaches through relationships, and the
/// verbs it exposes on its collection and item paths.
pub fn entity_document(registry: &Registry, entity: &Entity, prefix: &str) -> OpenApi {
    let mut components = ComponentsBuilder::new();
    let mut seen = vec![entity.name.clone()];
    let mut queue = vec![entity];
    while let Some(e) = queue.pop() {
        components = components.schema(e.name.clone(), entity_schema(e));
        for r in &e.relationships {
            if seen.contains(&r.target) {
                continue;
            }
            seen.push(r.target.clone());
            if let Some(t) = registry.entity(&r.target) {
                queue.push(t);
            }
        }
    }

    let name = &entity.name;
    let mut collection = PathItemBuilder::new();
    let mut item = PathItemBuilder::new();
    let verbs = [
        (HttpMethod::Get, "get", "200", format!("List or fetch {name} by ids")),
        (HttpMethod::Post, "post", "201", format!("Insert {name} graphs")),
        (HttpMethod::Put, "put", "200", format!("Update {name} graphs")),
        (HttpMethod::Patch, "patch", "200", format!("Patch {name} graphs")),
        (HttpMethod::Delete, "delete", "200", format!("Delete {name} by ids")),
    ];
    for (method, verb, status, summary) in verbs {
        if !entity.allows(verb) {
            continue;
        }
        collection = collection.operation(method.clone(), operation(summary.clone(), status, "OK"));
        let item_status = if verb == "delete" { "204" } else { status };
        item = item.operation(method, operation(summary, item_status, "OK"));
    }
    let base = format!("{}/{}", prefix.trim_end_matches('/'), entity.key);
    let paths = PathsBuilder::new()
        .path(base.clone(), collection.build())
        .path(format!("{}/{{id}}", base), item.build());

    OpenApiBuilder::new()
        .info(InfoBuilder::new().title(name.clone()).version(env!("CARGO_PKG_VERSION")).build())
        .paths(paths.build())
        .components(Some(components.build()))
        .build()
}

/// `Link` value naming the schema document of `key`.
pub fn schema_link_value(prefix: &str, key: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("<{}/{}/_schema>; rel=\"schema\"", prefix.trim_end_matches('/'), key)).ok()
}

/// Adds the schema link to responses of registered entities for verbs they allow.
pub async fn schema_link(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    let verb = request.method().as_str().to_lowercase();
    let link = params
        .get("key")
        .and_then(|key| state.registry.entity_by_key(key))
        .filter(|entity| entity.allows(&verb))
        .and_then(|entity| schema_link_value(&state.settings.api_prefix, &entity.key));
    let mut response = next.run(request).await;
    if let Some(link) = link {
        response.headers_mut().append(header::LINK, link);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityConfig, RelationshipConfig, SchemaConfig};

    #[test]
    fn document_lists_schemas_and_allowed_verbs() {
        let mut parent = EntityConfig::new("parent")
            .column(ColumnConfig::new("id", ScalarKind::Integer).primary())
            .relationship(RelationshipConfig::new("children", "child"));
        parent.operations = vec!["get".into(), "post".into()];
        let child = EntityConfig::new("child")
            .column(ColumnConfig::new("id", ScalarKind::Integer).primary())
            .column(ColumnConfig::new("parent_id", ScalarKind::Integer).references("parent", "id"));
        let registry = Registry::from_config(SchemaConfig {
            entities: vec![parent, child],
            join_tables: vec![],
        })
        .unwrap();
        let doc = entity_document(&registry, registry.entity("parent").unwrap(), "/api");
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["components"]["schemas"]["parent"].is_object());
        assert!(json["components"]["schemas"]["child"].is_object());
        assert_eq!(json["components"]["schemas"]["parent"]["required"], serde_json::json!(["id"]));
        let collection = &json["paths"]["/api/parent"];
        assert!(collection["get"].is_object());
        assert!(collection["post"].is_object());
        assert!(collection["delete"].is_null());
    }

    #[test]
    fn schema_link_joins_prefix_and_key() {
        assert_eq!(schema_link_value("/api/", "items").unwrap(), "</api/items/_schema>; rel=\"schema\"");
        assert_eq!(schema_link_value("", "items").unwrap(), "</items/_schema>; rel=\"schema\"");
    }
}
