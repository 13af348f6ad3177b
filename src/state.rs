//! Shared application state for all routes.

use crate::auth::Authorizer;
use crate::cache::Cache;
use crate::error::AppError;
use crate::schema::Registry;
use crate::session::Session;
use crate::settings::Settings;
use crate::store::StoreFactory;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub stores: Arc<dyn StoreFactory>,
    pub cache: Option<Arc<dyn Cache>>,
    pub authorizer: Option<Arc<dyn Authorizer>>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, stores: Arc<dyn StoreFactory>) -> Self {
        AppState {
            registry,
            stores,
            cache: None,
            authorizer: None,
            settings: Arc::new(Settings::default()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    /// A fresh session over a new store transaction. One per request.
    pub async fn session(&self) -> Result<Session, AppError> {
        let store = self.stores.begin().await?;
        Ok(Session::new(self.registry.clone(), store).with_cache(self.cache.clone()))
    }
}
