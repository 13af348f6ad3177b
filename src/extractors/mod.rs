//! Request extractors.

mod credentials;
pub use credentials::{Credentials, AUTHORIZATION_PREFIX};
