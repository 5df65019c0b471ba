use async_trait::async_trait;
use axum_chat_presence::{
    auth::{AuthError, TokenValidator},
    config::ChatConfig,
    http::{HttpState, router},
    models::{Actor, Role},
    store::MemoryMessageStore,
    ws::service::ChatHub,
};
use std::sync::Arc;
use tracing::info;

/// Accepts tokens of the form `<user id>:<display name>[:<role>]`.
///
/// Stands in for the real token issuer; do not deploy it.
struct DemoTokens;

#[async_trait]
impl TokenValidator for DemoTokens {
    async fn validate_token(&self, token: &str) -> Result<Actor, AuthError> {
        let mut parts = token.splitn(3, ':');
        let id = parts
            .next()
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| AuthError::new("missing numeric user id"))?;
        let name = parts
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AuthError::new("missing display name"))?;
        let role = match parts.next() {
            Some(role) => Role::parse(role).ok_or_else(|| AuthError::new("unknown role"))?,
            None => Role::Member,
        };
        Ok(Actor::new(id, name, role))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = ChatConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .init();

    let hub = ChatHub::in_memory(Arc::new(MemoryMessageStore::new()));
    let state = HttpState {
        hub,
        validator: Arc::new(DemoTokens),
        config: Arc::new(config.clone()),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);
    info!("Connect with: websocat 'ws://{}/ws?token=1:ana:admin'", config.bind_addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
