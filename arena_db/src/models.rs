//! Row types returned by the read paths (§4.2, §6.4).
//!
//! These are kept separate from `arena_shared::player::Player`: the
//! in-memory type has no SQL awareness and the gateway translates between
//! the two at the write boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct PlayerRow {
    pub id: String,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub health: f64,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct SessionRow {
    pub id: i64,
    pub player_id: String,
    pub session_start: DateTime<Utc>,
    pub session_end: Option<DateTime<Utc>>,
    pub protocol: String,
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct EventRow {
    pub id: i64,
    pub player_id: String,
    pub session_id: Option<i64>,
    pub event_type: String,
    pub event_data: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct ChatRow {
    pub id: i64,
    pub player_id: String,
    pub session_id: Option<i64>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct HighScoreRow {
    pub id: i64,
    pub player_id: String,
    pub score: i64,
    pub achieved_at: DateTime<Utc>,
    pub game_duration: Option<i64>,
}
