//! Hands upgraded sockets over to the [`ChatHub`].

use crate::error::ChatError;
use crate::models::Actor;
use crate::ws::service::ChatHub;
use axum::{
    extract::ws::WebSocketUpgrade,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Upgrades the request and lets the hub own the socket from then on.
///
/// `actor` is the identity proven by the handshake token, if any. When
/// `require_auth` is set, anonymous handshakes are refused with `401`.
///
/// ```rust,no_run
/// # use axum::{extract::{State, WebSocketUpgrade}, routing::get, Router};
/// # use std::sync::Arc;
/// # use axum_chat_presence::{store::MemoryMessageStore, ws::{service::ChatHub, upgrade::upgrade_handler}};
/// let hub = ChatHub::in_memory(Arc::new(MemoryMessageStore::new()));
/// let app: Router = Router::new()
///     .route(
///         "/ws",
///         get(|ws: WebSocketUpgrade, State(hub): State<Arc<ChatHub>>| async move {
///             upgrade_handler(ws, hub, None, false)
///         }),
///     )
///     .with_state(hub);
/// ```
#[instrument(skip_all, fields(user_id = ?actor.as_ref().map(|a| a.id)))]
pub fn upgrade_handler(
    ws: WebSocketUpgrade,
    hub: Arc<ChatHub>,
    actor: Option<Actor>,
    require_auth: bool,
) -> Response {
    if require_auth && actor.is_none() {
        warn!("WebSocket connection rejected: no token");
        return ChatError::Unauthorized.into_response();
    }

    ws.on_upgrade(move |socket| async move {
        hub.handle_connection(socket, actor).await;
    })
}
