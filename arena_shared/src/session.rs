//! Durable record of a connection interval (§3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionProtocol {
    WebSocket,
    Udp,
}

impl SessionProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionProtocol::WebSocket => "websocket",
            SessionProtocol::Udp => "udp",
        }
    }
}

impl std::fmt::Display for SessionProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
