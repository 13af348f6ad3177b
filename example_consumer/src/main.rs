//! Example server: loads the entity schema from `MODELREST_SCHEMA_PATH`, stores rows in
//! PostgreSQL when `DATABASE_URL` is set (in memory otherwise) and serves the REST API.
//!
//! Run from repo root: `MODELREST_SCHEMA_PATH=example_consumer/schema/blog.json cargo run -p example-consumer`

use modelrest::{
    load_from_path, router, AppState, CacheMode, MemoryCache, MemoryDatabase, PgDatabase, Settings, StoreFactory,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("modelrest=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let schema_path = settings
        .schema_path
        .clone()
        .unwrap_or_else(|| "example_consumer/schema/blog.json".into());
    let registry = Arc::new(load_from_path(&schema_path)?);

    let stores: Arc<dyn StoreFactory> = match &settings.database_url {
        Some(url) => Arc::new(PgDatabase::connect(url, registry.clone(), settings.pg_schema.clone()).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, rows are kept in memory");
            Arc::new(MemoryDatabase::new(&registry))
        }
    };
    let mut state = AppState::new(registry, stores);
    if settings.cache == CacheMode::Memory {
        state = state.with_cache(Arc::new(MemoryCache::new()));
    }
    let bind = settings.bind.clone();
    let app = router(state.with_settings(settings));

    let listener = TcpListener::bind(&bind).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
