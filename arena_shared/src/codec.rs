//! Wire codecs for the two transports (§4.1, §6.2, §6.3).
//!
//! The stream transport is one JSON object per text frame, no outer
//! wrapper — callers serialize a [`Message`] directly. The datagram
//! transport wraps every message in a [`Packet`] carrying sequence,
//! timestamp, and reliability bit.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Recommended MTU-safe buffer size for a single inbound datagram (§4.4).
pub const DATAGRAM_RECV_BUFFER: usize = 1500;
/// Soft cap on encoded datagram size; callers SHOULD drop oversized sends
/// with an `Error` message rather than fragment (§6.2).
pub const MAX_DATAGRAM_SIZE: usize = 1500;

/// One datagram-transport packet (§6.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub sequence: u32,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    pub message: Message,
    pub reliable: bool,
}

impl Packet {
    pub fn new(sequence: u32, message: Message, reliable: bool) -> Self {
        Self {
            sequence,
            timestamp: chrono::Utc::now().timestamp_millis(),
            message,
            reliable,
        }
    }
}

/// Encodes a single stream-transport frame (one JSON object, no wrapper).
pub fn encode_stream_message(msg: &Message) -> anyhow::Result<String> {
    serde_json::to_string(msg).context("serialize stream message")
}

/// Decodes a single stream-transport frame.
pub fn decode_stream_message(text: &str) -> anyhow::Result<Message> {
    serde_json::from_str(text).context("deserialize stream message")
}

/// Encodes a datagram packet to UTF-8 JSON bytes.
pub fn encode_packet(packet: &Packet) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec(packet).context("serialize packet")
}

/// Decodes a datagram packet from UTF-8 JSON bytes.
pub fn decode_packet(bytes: &[u8]) -> anyhow::Result<Packet> {
    serde_json::from_slice(bytes).context("deserialize packet")
}
