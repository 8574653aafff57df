//! The live game entity.
//!
//! A `Player` is mutated only by its owning connection (§3); the roster
//! just stores the current snapshot. Health is clamped at the action
//! boundary that produces it, never silently at read time, so a caller
//! that forgets to clamp will see the out-of-range value in tests.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_HEALTH: f32 = 100.0;
pub const PICKUP_SCORE: u32 = 10;

/// 128-bit identifier, unique across the live roster (§3 invariant).
pub type PlayerId = Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub health: f32,
    pub score: u32,
}

impl Player {
    /// Creates a freshly admitted player at the origin with full health.
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        let name = name.into();
        let name = if name.is_empty() {
            default_name(id)
        } else {
            name
        };
        Self {
            id,
            name,
            x: 0.0,
            y: 0.0,
            health: DEFAULT_HEALTH,
            score: 0,
        }
    }

    /// Clamps health into `[0, 100]`, per the §3 invariant.
    pub fn clamp_health(&mut self) {
        self.health = self.health.clamp(0.0, 100.0);
    }
}

/// Derives "Player_XXXXXXXX" from the first 8 hex digits of the id, used by
/// both transports when no display name is supplied on admission (§4.3,
/// §4.4).
pub fn default_name(id: PlayerId) -> String {
    let hex = id.simple().to_string();
    format!("Player_{}", &hex[..8])
}
