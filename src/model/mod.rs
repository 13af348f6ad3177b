//! Value-level model types shared by the engine, marshaller and cache.

pub mod identity;
pub mod projection;

pub use identity::*;
pub use projection::*;

/// Column values of one row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;
