//! `arena_server`
//!
//! The realtime server runtime (spec §2): two alternative transport
//! listeners bridging into one shared game state, a persistence side
//! channel that never blocks the realtime path, and the supervisor that
//! boots exactly one of the listeners per process.
//!
//! - [`game_state`] — the stream-transport roster, dispatch table, and
//!   broadcast policy (§4.5).
//! - [`stream_listener`] — axum WebSocket upgrade, per-connection
//!   reader/writer tasks (§4.3).
//! - [`datagram`] — the UDP listener, client table, and reliability engine
//!   (§4.4).
//! - [`supervisor`] — config, bootstrap, transport selection, graceful
//!   shutdown (§4.6).

pub mod datagram;
pub mod game_state;
pub mod stream_listener;
pub mod supervisor;

pub use game_state::GameState;
pub use supervisor::run;
