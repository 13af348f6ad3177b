//! Extract credentials from the `Authorization` header.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

/// Scheme prefix stripped from the header value when present.
pub const AUTHORIZATION_PREFIX: &str = "Basic ";

/// Credentials from the `Authorization` header, `None` when the header is missing or blank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for Credentials
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim())
            .map(|s| s.strip_prefix(AUTHORIZATION_PREFIX).unwrap_or(s).trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(Credentials(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Credentials {
        let mut builder = Request::builder().uri("/x");
        if let Some(h) = header {
            builder = builder.header(AUTHORIZATION, h);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Credentials::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn basic_prefix_is_optional() {
        assert_eq!(extract(Some("Basic abc")).await, Credentials(Some("abc".into())));
        assert_eq!(extract(Some("abc")).await, Credentials(Some("abc".into())));
        assert_eq!(extract(Some("  ")).await, Credentials(None));
        assert_eq!(extract(None).await, Credentials(None));
    }
}
