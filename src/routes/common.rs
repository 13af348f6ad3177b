//! Service routes outside the entity namespace: liveness, readiness and build info.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct Status {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entities: Option<usize>,
}

/// Readiness pings the store; the registry size is reported either way.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Status>) {
    let entities = Some(state.registry.entities().count());
    match state.stores.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(Status {
                status: "ok",
                store: Some("ok"),
                entities,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "store not ready");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Status {
                    status: "degraded",
                    store: Some("unavailable"),
                    entities,
                }),
            )
        }
    }
}

/// GET /health, GET /ready, GET /version.
pub fn common_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/health",
            get(|| async {
                Json(Status {
                    status: "ok",
                    store: None,
                    entities: None,
                })
            }),
        )
        .route("/ready", get(ready))
        .route(
            "/version",
            get(|| async {
                Json(serde_json::json!({"name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION")}))
            }),
        )
        .with_state(state)
}
