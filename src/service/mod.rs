//! ModelService: dict-level graph operations with payload validation.

mod model;
pub mod validation;
pub use model::ModelService;
pub use validation::{Check, PayloadValidator};
