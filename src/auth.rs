//! Authorization hook applied to every entity route.

use crate::error::AppError;
use crate::extractors::Credentials;
use crate::state::AppState;
use async_trait::async_trait;
use axum::{
    extract::{MatchedPath, Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};

/// What is being accessed.
#[derive(Clone, Debug)]
pub struct AuthRequest<'a> {
    /// Route template, e.g. `/:key/:id`.
    pub route: &'a str,
    pub path: &'a str,
    pub method: &'a Method,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// `None` rejects the credentials, `Some(false)` asks the client to refresh them.
    async fn authorize(&self, credentials: &str, request: &AuthRequest<'_>) -> Option<bool>;
}

fn rejected(state: &AppState, message: &str, forbidden: bool) -> AppError {
    AppError::Unauthorized {
        message: message.to_string(),
        realm: state.settings.realm.clone(),
        forbidden,
    }
}

/// Middleware consulting the configured [`Authorizer`]; a no-op without one.
pub async fn require_authorization(
    State(state): State<AppState>,
    matched: Option<MatchedPath>,
    Credentials(credentials): Credentials,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(authorizer) = state.authorizer.clone() else {
        return Ok(next.run(request).await);
    };
    let Some(credentials) = credentials else {
        return Err(rejected(&state, "Authorization header is required", false));
    };
    let path = request.uri().path().to_string();
    let route = matched.as_ref().map(|m| m.as_str()).unwrap_or(path.as_str()).to_string();
    let verdict = authorizer
        .authorize(
            &credentials,
            &AuthRequest {
                route: &route,
                path: &path,
                method: request.method(),
            },
        )
        .await;
    match verdict {
        Some(true) => Ok(next.run(request).await),
        Some(false) => {
            tracing::debug!(route = %route, "authorization expired");
            Err(rejected(&state, "Please refresh your authorization", true))
        }
        None => {
            tracing::debug!(route = %route, "authorization rejected");
            Err(rejected(&state, "Invalid authorization", false))
        }
    }
}
