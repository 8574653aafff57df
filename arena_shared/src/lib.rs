//! `arena_shared`
//!
//! Types shared by the persistence gateway and the realtime server:
//! - Tagged message envelope and wire codecs for both transports.
//! - The in-memory `Player` entity and its invariants.
//! - Session protocol tag.
//! - Environment-driven configuration.
//!
//! Design goals carried over from the engine this workspace grew out of:
//! clear separation of concerns, no `unsafe`, serde-first wire types.

pub mod codec;
pub mod config;
pub mod message;
pub mod player;
pub mod session;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::codec::*;
    pub use crate::config::*;
    pub use crate::message::*;
    pub use crate::player::*;
    pub use crate::session::*;
}
