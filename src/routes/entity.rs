//! Entity routes. Handlers resolve the entity from the `key` path segment.

use crate::auth::require_authorization;
use crate::handlers::entity::{
    create, create_at, list, patch, patch_at, read, remove, remove_at, replace, replace_at,
};
use crate::handlers::schema_doc::schema_link;
use crate::state::AppState;
use axum::{middleware, routing::get, Router};

pub fn entity_routes(state: AppState) -> Router {
    Router::new()
        .route("/:key", get(list).post(create).put(replace).patch(patch).delete(remove))
        .route(
            "/:key/:id",
            get(read).post(create_at).put(replace_at).patch(patch_at).delete(remove_at),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), schema_link))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_authorization))
        .with_state(state)
}
