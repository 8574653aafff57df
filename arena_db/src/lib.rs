//! `arena_db`
//!
//! The persistence gateway (§4.2): a SQLite-backed store for players,
//! sessions, events, chat, and high scores, plus the row types the read
//! paths return. Every write method here is fire-and-forget-safe — callers
//! in the realtime path wrap the returned future with [`spawn_log`] so a
//! database hiccup never stalls a connection or datagram handler.

pub mod gateway;
pub mod models;
pub mod pool;

pub use gateway::{spawn_log, PersistenceGateway};
