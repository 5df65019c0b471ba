//! Runtime configuration read from environment variables.

use std::net::SocketAddr;

const BIND_ADDR: &str = "CHAT_BIND_ADDR";
const REQUIRE_AUTH: &str = "CHAT_REQUIRE_AUTH";
const LOG_FILTER: &str = "CHAT_LOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid socket address {value:?}")]
    BindAddr { var: &'static str, value: String },

    #[error("{var}: expected a boolean, got {value:?}")]
    Bool { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Address the HTTP/WebSocket server listens on.
    pub bind_addr: SocketAddr,
    /// Refuse socket handshakes that carry no token.
    pub require_auth: bool,
    /// `tracing_subscriber::EnvFilter` directives.
    pub log_filter: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            require_auth: false,
            log_filter: "axum_chat_presence=info".to_string(),
        }
    }
}

impl ChatConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(BIND_ADDR) {
            config.bind_addr = value.trim().parse().map_err(|_| ConfigError::BindAddr {
                var: BIND_ADDR,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(REQUIRE_AUTH) {
            config.require_auth = parse_bool(&value).ok_or(ConfigError::Bool {
                var: REQUIRE_AUTH,
                value,
            })?;
        }
        if let Some(value) = lookup(LOG_FILTER) {
            config.log_filter = value;
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
