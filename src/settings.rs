//! Runtime settings from the environment (after `.env` is loaded).

use crate::error::SettingsError;
use std::path::PathBuf;

const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheMode {
    Memory,
    Off,
}

#[derive(Clone, Debug)]
pub struct Settings {
    /// PostgreSQL store when set, in-memory store otherwise.
    pub database_url: Option<String>,
    pub schema_path: Option<PathBuf>,
    pub pg_schema: String,
    pub api_prefix: String,
    pub body_limit: usize,
    pub cache: CacheMode,
    pub bind: String,
    pub realm: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: None,
            schema_path: None,
            pg_schema: "public".into(),
            api_prefix: "/".into(),
            body_limit: DEFAULT_BODY_LIMIT,
            cache: CacheMode::Off,
            bind: "127.0.0.1:3000".into(),
            realm: "modelrest".into(),
        }
    }
}

impl Settings {
    /// Reads `DATABASE_URL` and the `MODELREST_*` variables, loading `.env` first.
    pub fn from_env() -> Result<Self, SettingsError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let mut s = Settings::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        s.database_url = var("DATABASE_URL");
        s.schema_path = var("MODELREST_SCHEMA_PATH").map(PathBuf::from);
        if let Some(v) = var("MODELREST_PG_SCHEMA") {
            s.pg_schema = v;
        }
        if let Some(v) = var("MODELREST_API_PREFIX") {
            s.api_prefix = if v.starts_with('/') { v } else { format!("/{}", v) };
        }
        if let Some(v) = var("MODELREST_BODY_LIMIT") {
            s.body_limit = v.parse().map_err(|_| SettingsError::Invalid {
                name: "MODELREST_BODY_LIMIT",
                value: v.clone(),
            })?;
        }
        if let Some(v) = var("MODELREST_CACHE") {
            s.cache = match v.to_lowercase().as_str() {
                "memory" => CacheMode::Memory,
                "off" => CacheMode::Off,
                _ => {
                    return Err(SettingsError::Invalid {
                        name: "MODELREST_CACHE",
                        value: v,
                    })
                }
            };
        }
        if let Some(v) = var("MODELREST_BIND") {
            s.bind = v;
        }
        if let Some(v) = var("MODELREST_REALM") {
            s.realm = v;
        }
        Ok(s)
    }
}
