//! modelrest: REST endpoints, nested graph mutations and a read-through cache derived
//! from declarative entity models.

pub mod auth;
pub mod cache;
pub mod engine;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod marshal;
pub mod model;
pub mod related;
pub mod response;
pub mod routes;
pub mod schema;
pub mod service;
pub mod session;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;

pub use auth::{AuthRequest, Authorizer};
pub use cache::{Cache, MemoryCache};
pub use engine::{GraphEngine, Page};
pub use error::{AppError, CacheError, GraphMutationError, MutationErrorKind, SchemaError, SettingsError, StoreError};
pub use marshal::Marshaller;
pub use model::{Identity, ProjectionSchema, Row};
pub use related::related_of;
pub use routes::{common_routes, entity_routes};
pub use schema::{load_from_path, Registry, SchemaConfig};
pub use service::ModelService;
pub use session::{InstanceId, Session};
pub use settings::{CacheMode, Settings};
pub use state::AppState;
pub use store::{MemoryDatabase, PgDatabase, Store, StoreFactory};

use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

/// Common routes at the root and entity routes under the configured API prefix, with
/// the request body limit applied to both.
pub fn router(state: AppState) -> Router {
    let prefix = state.settings.api_prefix.trim_end_matches('/').to_string();
    let body_limit = state.settings.body_limit;
    let api = entity_routes(state.clone());
    let app = Router::new().merge(common_routes(state));
    let app = if prefix.is_empty() {
        app.merge(api)
    } else {
        app.nest(&prefix, api)
    };
    app.layer(RequestBodyLimitLayer::new(body_limit))
}
