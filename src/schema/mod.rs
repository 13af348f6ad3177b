//! Entity schema registry: declarative configs, validation and relationship resolution.

pub mod types;
pub mod loader;
pub mod validator;
pub mod registry;

pub use types::*;
pub use loader::*;
pub use registry::*;
