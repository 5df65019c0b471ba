//! Token-based authentication for sockets and the HTTP boundary.
//!
//! Token issuance lives elsewhere. This module only extracts a token from the
//! `Authorization: Bearer` header or a `?token=` query parameter (browsers
//! cannot set headers on a WebSocket handshake) and asks a [`TokenValidator`]
//! who it belongs to.
//!
//! ```rust,no_run
//! # use async_trait::async_trait;
//! # use axum::{routing::get, Router};
//! # use axum_chat_presence::auth::{Auth, AuthError, TokenValidator};
//! # use axum_chat_presence::models::{Actor, Role};
//! #[derive(Clone)]
//! struct Keys;
//!
//! #[async_trait]
//! impl TokenValidator for Keys {
//!     async fn validate_token(&self, token: &str) -> Result<Actor, AuthError> {
//!         match token {
//!             "secret-token" => Ok(Actor::new(1, "ana", Role::Admin)),
//!             _ => Err(AuthError::new("unknown token")),
//!         }
//!     }
//! }
//!
//! async fn whoami(Auth(actor): Auth) -> String {
//!     actor.display_name
//! }
//!
//! let app: Router = Router::new().route("/me", get(whoami)).with_state(Keys);
//! ```

use crate::models::Actor;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query},
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

/// Why a token was rejected.
#[derive(Debug, thiserror::Error)]
#[error("invalid token: {reason}")]
pub struct AuthError {
    reason: String,
}

impl AuthError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Resolves a token to the user it was issued for.
///
/// Implement it on the router state (or delegate to it from the state).
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate_token(&self, token: &str) -> Result<Actor, AuthError>;
}

/// Requires an authenticated actor; rejects the request with `401` otherwise.
#[derive(Debug, Clone)]
pub struct Auth(pub Actor);

/// An actor if the request carries a token, `None` if it carries none.
/// A token that is present but invalid is still rejected with `401`.
#[derive(Debug, Clone)]
pub struct MaybeAuth(pub Option<Actor>);

#[derive(Deserialize)]
struct TokenQuery {
    token: String,
}

async fn resolve<S>(parts: &mut Parts, state: &S) -> Result<Option<Actor>, Response>
where
    S: TokenValidator + Send + Sync,
{
    let token = match bearer_token(&parts.headers) {
        Some(t) => Some(t),
        None => match Query::<TokenQuery>::from_request_parts(parts, state).await {
            Ok(Query(q)) => Some(q.token),
            Err(_) => None,
        },
    };

    let Some(token) = token else {
        return Ok(None);
    };

    match state.validate_token(&token).await {
        Ok(actor) => Ok(Some(actor)),
        Err(e) => {
            debug!("Rejected token: {}", e);
            Err(StatusCode::UNAUTHORIZED.into_response())
        }
    }
}

impl<S> FromRequestParts<S> for Auth
where
    S: TokenValidator + Send + Sync + 'static,
{
    type Rejection = Response;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, <Self as FromRequestParts<S>>::Rejection>> + Send {
        Box::pin(async move {
            match resolve(parts, state).await? {
                Some(actor) => Ok(Auth(actor)),
                None => Err(StatusCode::UNAUTHORIZED.into_response()),
            }
        })
    }
}

impl<S> FromRequestParts<S> for MaybeAuth
where
    S: TokenValidator + Send + Sync + 'static,
{
    type Rejection = Response;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, <Self as FromRequestParts<S>>::Rejection>> + Send {
        Box::pin(async move { resolve(parts, state).await.map(MaybeAuth) })
    }
}

/// Extracts a bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_owned())
        .filter(|token| !token.is_empty())
}
