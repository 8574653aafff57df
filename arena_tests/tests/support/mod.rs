//! Minimal hand-rolled test clients for the stream and datagram transports.
//!
//! Deliberately not a reusable client library (per the Non-goal against
//! shipping one) — just enough of RFC 6455 framing and the datagram
//! [`Packet`] wrapper to drive the scenarios in the integration tests
//! alongside this module.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use arena_db::pool::{create_pool, run_migrations};
use arena_db::PersistenceGateway;
use arena_shared::codec::{decode_packet, decode_stream_message, encode_packet, encode_stream_message, Packet, DATAGRAM_RECV_BUFFER};
use arena_shared::message::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Boots a stream listener against an in-memory database on an OS-assigned
/// port and returns its address plus a handle to the same persistence
/// gateway it writes through.
pub async fn spawn_stream_server() -> Result<(SocketAddr, Arc<PersistenceGateway>)> {
    let pool = create_pool(":memory:").await.context("create pool")?;
    run_migrations(&pool).await.context("run migrations")?;
    let gateway = Arc::new(PersistenceGateway::new(pool));
    let game_state = Arc::new(arena_server::GameState::new(gateway.clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.context("bind")?;
    let addr = listener.local_addr()?;
    tokio::spawn(arena_server::stream_listener::serve_on(listener, game_state, gateway.clone()));
    Ok((addr, gateway))
}

/// Boots a datagram listener against an in-memory database on an
/// OS-assigned port.
pub async fn spawn_datagram_server() -> Result<(SocketAddr, Arc<PersistenceGateway>)> {
    let pool = create_pool(":memory:").await.context("create pool")?;
    run_migrations(&pool).await.context("run migrations")?;
    let gateway = Arc::new(PersistenceGateway::new(pool));

    let socket = UdpSocket::bind("127.0.0.1:0").await.context("bind")?;
    let addr = socket.local_addr()?;
    tokio::spawn(arena_server::datagram::serve_on(socket, gateway.clone()));
    Ok((addr, gateway))
}

const HANDSHAKE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
/// Fixed client-to-server masking key. RFC 6455 requires client frames to
/// be masked; it does not require the mask to be unpredictable, so a
/// constant key keeps this harness simple.
const MASK_KEY: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

/// A raw WebSocket client speaking just enough RFC 6455 to drive the
/// stream-transport scenarios (§4.3, §8).
pub struct WsClient {
    stream: TcpStream,
}

impl WsClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let mut stream = TcpStream::connect(addr).await.context("connect")?;
        let request = format!(
            "GET /ws HTTP/1.1\r\n\
             Host: {addr}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {HANDSHAKE_KEY}\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await?;

        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        while !response.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await.context("read handshake response")?;
            response.push(byte[0]);
        }
        let response = String::from_utf8_lossy(&response);
        if !response.starts_with("HTTP/1.1 101") {
            bail!("handshake did not upgrade: {response}");
        }

        Ok(Self { stream })
    }

    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        let text = encode_stream_message(msg)?;
        self.stream.write_all(&encode_text_frame(text.as_bytes())).await?;
        Ok(())
    }

    /// Reads frames until a text frame decodes into a [`Message`],
    /// silently skipping control frames.
    pub async fn recv(&mut self) -> Result<Message> {
        loop {
            let (opcode, payload) = read_frame(&mut self.stream).await?;
            match opcode {
                0x1 => return decode_stream_message(&String::from_utf8(payload)?),
                0x8 => bail!("server closed the connection"),
                _ => continue,
            }
        }
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}

fn encode_text_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 14);
    frame.push(0x81); // FIN | text opcode
    let len = payload.len();
    if len <= 125 {
        frame.push(0x80 | len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(&MASK_KEY);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK_KEY[i % 4]));
    frame
}

/// Reads one frame from an axum server, which never masks its frames.
async fn read_frame(stream: &mut TcpStream) -> Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    let opcode = header[0] & 0x0F;
    let masked = header[1] & 0x80 != 0;
    let mut len = (header[1] & 0x7F) as u64;
    if len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext).await?;
        len = u16::from_be_bytes(ext) as u64;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext).await?;
        len = u64::from_be_bytes(ext);
    }
    let mask_key = if masked {
        let mut key = [0u8; 4];
        stream.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    if let Some(key) = mask_key {
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= key[i % 4];
        }
    }
    Ok((opcode, payload))
}

/// A raw datagram client speaking the [`Packet`] wire format (§4.1, §6.2).
pub struct UdpClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
}

impl UdpClient {
    pub async fn connect(server_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await.context("bind")?;
        Ok(Self { socket, server_addr })
    }

    pub async fn send(&mut self, sequence: u32, msg: Message, reliable: bool) -> Result<()> {
        let packet = Packet::new(sequence, msg, reliable);
        let bytes = encode_packet(&packet)?;
        self.socket.send_to(&bytes, self.server_addr).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Packet> {
        let mut buf = vec![0u8; DATAGRAM_RECV_BUFFER];
        let (n, _) = self.socket.recv_from(&mut buf).await?;
        decode_packet(&buf[..n])
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}
