//! HTTP handlers for entity verbs and the per-entity OpenAPI document.

pub mod entity;
pub mod params;
pub mod schema_doc;
pub use entity::*;
