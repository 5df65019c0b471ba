//! HTTP boundary: the socket endpoint plus the few routes whose outcome the
//! real-time core has to announce.

use crate::attachments::AttachmentTarget;
use crate::auth::{Auth, AuthError, MaybeAuth, TokenValidator};
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::events::RosterEntry;
use crate::models::{Actor, MessageId};
use crate::ws::{service::ChatHub, upgrade::upgrade_handler};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
    routing::{delete, get},
};
use serde_json::{Value, json};
use std::sync::Arc;

/// Router state: the hub plus whatever resolves tokens.
#[derive(Clone)]
pub struct HttpState {
    pub hub: Arc<ChatHub>,
    pub validator: Arc<dyn TokenValidator>,
    pub config: Arc<ChatConfig>,
}

#[async_trait]
impl TokenValidator for HttpState {
    async fn validate_token(&self, token: &str) -> Result<Actor, AuthError> {
        self.validator.validate_token(token).await
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/ws", get(ws_route))
        .route("/api/presence", get(presence_route))
        .route("/api/messages", delete(clear_group_route))
        .route(
            "/api/messages/{id}/attachments/{index}",
            delete(remove_group_attachment_route),
        )
        .route(
            "/api/private-messages/{id}/attachments/{index}",
            delete(remove_private_attachment_route),
        )
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

async fn ws_route(
    ws: WebSocketUpgrade,
    State(state): State<HttpState>,
    MaybeAuth(actor): MaybeAuth,
) -> Response {
    upgrade_handler(ws, state.hub.clone(), actor, state.config.require_auth)
}

async fn presence_route(State(state): State<HttpState>) -> Json<Vec<RosterEntry>> {
    Json(state.hub.roster().await)
}

async fn clear_group_route(
    State(state): State<HttpState>,
    Auth(actor): Auth,
) -> Result<Json<Value>, ChatError> {
    let removed = state.hub.clear_group_chat(&actor).await?;
    Ok(Json(json!({ "removed": removed })))
}

async fn remove_group_attachment_route(
    State(state): State<HttpState>,
    Auth(actor): Auth,
    Path((id, index)): Path<(MessageId, usize)>,
) -> Result<Json<Value>, ChatError> {
    let attachments = state
        .hub
        .remove_attachment(&actor, AttachmentTarget::Group(id), index)
        .await?;
    Ok(Json(json!({ "attachments": attachments })))
}

async fn remove_private_attachment_route(
    State(state): State<HttpState>,
    Auth(actor): Auth,
    Path((id, index)): Path<(MessageId, usize)>,
) -> Result<Json<Value>, ChatError> {
    let attachments = state
        .hub
        .remove_attachment(&actor, AttachmentTarget::Private(id), index)
        .await?;
    Ok(Json(json!({ "attachments": attachments })))
}
