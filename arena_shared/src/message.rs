//! Tagged message envelope shared by both transports (§4.1).
//!
//! The wire shape is `{ "type": "<Tag>", "data": { ...fields } }`. Serde's
//! adjacently-tagged representation produces exactly that envelope without
//! a hand-rolled tag/payload split.

use serde::{Deserialize, Serialize};

use crate::player::{Player, PlayerId};

/// Known `PlayerAction` action names (§4.1).
pub mod action {
    pub const ATTACK: &str = "attack";
    pub const PICKUP: &str = "pickup";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    PlayerJoin {
        player_id: PlayerId,
        name: String,
    },
    PlayerLeave {
        player_id: PlayerId,
    },
    PlayerMove {
        player_id: PlayerId,
        x: f32,
        y: f32,
    },
    PlayerAction {
        player_id: PlayerId,
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    GameState {
        players: Vec<Player>,
        /// Seconds since epoch.
        timestamp: i64,
    },
    Chat {
        player_id: PlayerId,
        message: String,
    },
    Error {
        message: String,
    },
    Heartbeat {
        player_id: PlayerId,
        sequence: u32,
    },
    Ack {
        sequence: u32,
    },
}

impl Message {
    /// The envelope's carried player id, where the tag has one (§4.5:
    /// "The envelope's inner player_id MUST match id").
    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            Message::PlayerJoin { player_id, .. }
            | Message::PlayerLeave { player_id }
            | Message::PlayerMove { player_id, .. }
            | Message::PlayerAction { player_id, .. }
            | Message::Chat { player_id, .. }
            | Message::Heartbeat { player_id, .. } => Some(*player_id),
            Message::GameState { .. } | Message::Error { .. } | Message::Ack { .. } => None,
        }
    }
}
