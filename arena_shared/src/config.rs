//! Configuration system.
//!
//! Configuration is environment-only: there are no CLI flags (§6.1). Each
//! field has a default so a bare `ServerConfig::from_env()` is always valid.

use std::fmt;

/// Which transport the supervisor should bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    WebSocket,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::WebSocket => write!(f, "websocket"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" => Ok(Protocol::WebSocket),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown PROTOCOL '{other}' (expected websocket|udp)")),
        }
    }
}

/// Root server configuration, read once at boot.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listening port, both transports bind `0.0.0.0:<port>`.
    pub port: u16,
    /// Which listener the supervisor starts.
    pub protocol: Protocol,
    /// Persistence target. The leading `sqlite:` scheme is stripped before
    /// being handed to sqlx; `:memory:` is reserved for tests.
    pub database_url: String,
    /// Logging verbosity, consumed as a `tracing_subscriber::EnvFilter`
    /// directive when `RUST_LOG` is not already set.
    pub log_level: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl ServerConfig {
    /// Reads configuration from the process environment, falling back to
    /// the documented defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let port = env_or("PORT", "8080").parse().unwrap_or(8080);
        let protocol = env_or("PROTOCOL", "websocket")
            .parse()
            .unwrap_or(Protocol::WebSocket);
        let database_url = env_or("DATABASE_URL", "sqlite:game.db");
        let log_level = env_or("LOG_LEVEL", "info");

        Self {
            port,
            protocol,
            database_url,
            log_level,
        }
    }

    /// Database path with the `sqlite:` scheme stripped, per §4.6.
    pub fn sqlite_path(&self) -> &str {
        self.database_url
            .strip_prefix("sqlite:")
            .unwrap_or(&self.database_url)
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            protocol: Protocol::WebSocket,
            database_url: "sqlite:game.db".to_string(),
            log_level: "info".to_string(),
        }
    }
}
