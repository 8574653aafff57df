//! Datagram (UDP) transport listener and reliability engine (§4.4).
//!
//! The receive loop shape (drain loop dispatching decoded messages) is
//! grounded on the teacher's `engine_server::server::recv_commands`
//! (`try_recv_from` in a loop); the structured "client table behind one
//! lock, per-client state behind a nested lock" layout generalizes the
//! teacher's single `HashMap<ClientId, ClientState>` to this spec's
//! endpoint-keyed table plus reverse index (§3, §5: "table lock → per-client
//! lock, never the reverse").

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use arena_db::gateway::event_type;
use arena_db::PersistenceGateway;
use arena_shared::codec::{
    decode_packet, encode_packet, encode_stream_message, Packet, DATAGRAM_RECV_BUFFER, MAX_DATAGRAM_SIZE,
};
use arena_shared::message::{action, Message};
use arena_shared::player::{default_name, Player, PlayerId, PICKUP_SCORE};
use arena_shared::session::SessionProtocol;
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// How often the retransmission sweeper runs (§4.4).
const RETRANSMIT_SWEEP_INTERVAL: Duration = Duration::from_millis(50);
/// A pending reliable packet is re-sent once it has waited this long
/// without an ack (§4.4).
const RETRANSMIT_AFTER: Duration = Duration::from_millis(100);
/// How often the timeout sweeper runs (§4.4).
const EVICTION_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
/// Clients idle longer than this are evicted (§4.4).
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
/// How often the server emits an unreliable heartbeat to every client
/// (§4.4).
const SERVER_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Only every Nth `PlayerMove` is logged as a `player_events` row (§4.4,
/// §8 scenario 5).
const MOVE_LOG_EVERY: u32 = 10;

/// A reliable packet awaiting acknowledgement (§3).
struct PendingPacket {
    bytes: Vec<u8>,
    last_send: Instant,
}

/// Per-endpoint state (§3). Guarded by its own lock nested inside the
/// client table's lock.
struct DatagramClient {
    player: Player,
    addr: SocketAddr,
    last_seen: Instant,
    /// Monotonically increasing; allocated to our own reliable sends to
    /// this client. 0 is reserved for unreliable/ack traffic.
    next_sequence: u32,
    pending: HashMap<u32, PendingPacket>,
    session_id: Option<i64>,
}

impl DatagramClient {
    fn allocate_sequence(&mut self) -> u32 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        if self.next_sequence == 0 {
            self.next_sequence = 1;
        }
        seq
    }
}

/// Client table keyed by stringified remote endpoint, with a player-id
/// reverse index (§4.4 "Client table").
#[derive(Default)]
struct ClientTable {
    by_endpoint: HashMap<String, Arc<Mutex<DatagramClient>>>,
    by_player: HashMap<PlayerId, String>,
}

pub struct DatagramServer {
    socket: UdpSocket,
    table: RwLock<ClientTable>,
    gateway: Arc<PersistenceGateway>,
}

/// Binds the datagram socket, starts the background timers, and runs the
/// receive loop until it errors or the process is asked to shut down (the
/// caller races this future against a shutdown signal).
pub async fn serve(addr: SocketAddr, gateway: Arc<PersistenceGateway>) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(addr).await.context("bind datagram socket")?;
    info!(%addr, "datagram listener bound");
    serve_on(socket, gateway).await
}

/// Runs the receive loop and background timers on an already-bound socket.
/// Split out from [`serve`] so tests can bind an ephemeral port
/// (`127.0.0.1:0`) and discover the actual address first.
pub async fn serve_on(socket: UdpSocket, gateway: Arc<PersistenceGateway>) -> anyhow::Result<()> {
    let server = Arc::new(DatagramServer {
        socket,
        table: RwLock::new(ClientTable::default()),
        gateway,
    });

    let heartbeat = tokio::spawn(server.clone().heartbeat_loop());
    let eviction = tokio::spawn(server.clone().eviction_loop());
    let retransmit = tokio::spawn(server.clone().retransmit_loop());

    let result = server.receive_loop().await;

    heartbeat.abort();
    eviction.abort();
    retransmit.abort();
    result
}

impl DatagramServer {
    async fn receive_loop(self: Arc<Self>) -> anyhow::Result<()> {
        let mut buf = vec![0u8; DATAGRAM_RECV_BUFFER];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await.context("datagram recv")?;
            let packet = match decode_packet(&buf[..n]) {
                Ok(packet) => packet,
                Err(error) => {
                    debug!(%from, %error, "failed to decode datagram packet, dropping");
                    continue;
                }
            };
            let this = self.clone();
            tokio::spawn(async move { this.dispatch(from, packet).await });
        }
    }

    async fn dispatch(&self, from: SocketAddr, packet: Packet) {
        match packet.message {
            Message::Heartbeat { player_id, sequence } => {
                self.handle_heartbeat(from, player_id, sequence).await
            }
            Message::Ack { sequence } => self.handle_ack(from, sequence).await,
            Message::PlayerMove { player_id, x, y } => {
                self.handle_move(from, player_id, x, y, packet.sequence).await
            }
            Message::PlayerAction { player_id, action: action_name, data } => {
                self.handle_action(from, player_id, action_name, data, packet.sequence).await
            }
            Message::Chat { player_id, message } => {
                self.handle_chat(from, player_id, message, packet.sequence).await
            }
            other => debug!(?other, %from, "ignoring datagram message tag not in the dispatch table"),
        }
    }

    async fn handle_heartbeat(&self, from: SocketAddr, player_id: PlayerId, sequence: u32) {
        let key = from.to_string();
        let existing = { self.table.read().await.by_endpoint.get(&key).cloned() };
        match existing {
            Some(client_arc) => {
                let matches = {
                    let mut client = client_arc.lock().await;
                    if client.player.id != player_id {
                        false
                    } else {
                        client.last_seen = Instant::now();
                        true
                    }
                };
                if !matches {
                    debug!(%from, %player_id, "heartbeat identity mismatch, dropping");
                    return;
                }
            }
            None => self.admit_client(from, key.clone(), player_id).await,
        }
        self.send_ack(&key, sequence).await;
    }

    /// First heartbeat from an unknown endpoint admits a new client
    /// (§4.4 "Admission").
    async fn admit_client(&self, from: SocketAddr, key: String, player_id: PlayerId) {
        let player = Player::new(player_id, default_name(player_id));
        let session_id = match self
            .gateway
            .create_session(player_id, SessionProtocol::Udp, Some(&from.ip().to_string()))
            .await
        {
            Ok(id) => Some(id),
            Err(error) => {
                warn!(%player_id, %error, "failed to create session for datagram client");
                None
            }
        };

        let client_arc = Arc::new(Mutex::new(DatagramClient {
            player: player.clone(),
            addr: from,
            last_seen: Instant::now(),
            next_sequence: 1,
            pending: HashMap::new(),
            session_id,
        }));

        {
            let mut table = self.table.write().await;
            table.by_endpoint.insert(key.clone(), client_arc.clone());
            table.by_player.insert(player_id, key.clone());
        }

        let gw = self.gateway.clone();
        let persisted = player.clone();
        arena_db::spawn_log("upsert_player", async move { gw.upsert_player(&persisted).await });
        let gw = self.gateway.clone();
        arena_db::spawn_log("log_event(join)", async move {
            gw.log_event(player_id, session_id, event_type::JOIN, None).await
        });

        self.broadcast_reliable(&Message::PlayerJoin { player_id, name: player.name.clone() }, Some(&key))
            .await;

        let snapshot = self.snapshot().await;
        self.send_reliable_locked(&client_arc, &snapshot).await;

        info!(%player_id, %from, "datagram client admitted");
    }

    async fn handle_ack(&self, from: SocketAddr, sequence: u32) {
        let key = from.to_string();
        let Some(client_arc) = self.table.read().await.by_endpoint.get(&key).cloned() else {
            return;
        };
        client_arc.lock().await.pending.remove(&sequence);
    }

    async fn handle_move(&self, from: SocketAddr, player_id: PlayerId, x: f32, y: f32, sequence: u32) {
        let key = from.to_string();
        let Some(client_arc) = self.table.read().await.by_endpoint.get(&key).cloned() else {
            debug!(%from, "PlayerMove from unregistered endpoint, dropping");
            return;
        };
        let session_id = {
            let mut client = client_arc.lock().await;
            if client.player.id != player_id {
                return;
            }
            client.player.x = x;
            client.player.y = y;
            client.last_seen = Instant::now();
            client.session_id
        };

        let gw = self.gateway.clone();
        arena_db::spawn_log("update_position", async move { gw.update_position(player_id, x, y).await });

        if sequence % MOVE_LOG_EVERY == 0 {
            let gw = self.gateway.clone();
            let body = encode_stream_message(&Message::PlayerMove { player_id, x, y }).ok();
            arena_db::spawn_log("log_event(move)", async move {
                gw.log_event(player_id, session_id, event_type::MOVE, body.as_deref()).await
            });
        }

        self.send_ack(&key, sequence).await;
        self.broadcast_unreliable(&Message::PlayerMove { player_id, x, y }, Some(&key)).await;
    }

    async fn handle_action(
        &self,
        from: SocketAddr,
        player_id: PlayerId,
        action_name: String,
        data: Option<Value>,
        sequence: u32,
    ) {
        let key = from.to_string();
        let Some(client_arc) = self.table.read().await.by_endpoint.get(&key).cloned() else {
            return;
        };
        let session_id = {
            let mut client = client_arc.lock().await;
            if client.player.id != player_id {
                return;
            }
            client.last_seen = Instant::now();
            client.session_id
        };

        match action_name.as_str() {
            action::ATTACK => {
                let gw = self.gateway.clone();
                arena_db::spawn_log("log_event(attack)", async move {
                    gw.log_event(player_id, session_id, event_type::ATTACK, None).await
                });
            }
            action::PICKUP => {
                let new_score = {
                    let mut client = client_arc.lock().await;
                    client.player.score += PICKUP_SCORE;
                    client.player.score
                };
                let gw = self.gateway.clone();
                arena_db::spawn_log("update_score", async move { gw.update_score(player_id, new_score).await });
                let gw = self.gateway.clone();
                arena_db::spawn_log("log_event(pickup)", async move {
                    gw.log_event(player_id, session_id, event_type::PICKUP, None).await
                });
            }
            other => debug!(action = other, ?data, %player_id, "unrecognized PlayerAction, ignoring"),
        }

        self.send_ack(&key, sequence).await;
    }

    async fn handle_chat(&self, from: SocketAddr, player_id: PlayerId, message: String, sequence: u32) {
        let key = from.to_string();
        let Some(client_arc) = self.table.read().await.by_endpoint.get(&key).cloned() else {
            return;
        };
        let session_id = {
            let mut client = client_arc.lock().await;
            if client.player.id != player_id {
                return;
            }
            client.last_seen = Instant::now();
            client.session_id
        };

        let gw = self.gateway.clone();
        let text = message.clone();
        arena_db::spawn_log("save_chat", async move { gw.save_chat(player_id, session_id, &text).await });
        let gw = self.gateway.clone();
        let body = encode_stream_message(&Message::Chat { player_id, message: message.clone() }).ok();
        arena_db::spawn_log("log_event(chat)", async move {
            gw.log_event(player_id, session_id, event_type::CHAT, body.as_deref()).await
        });

        self.send_ack(&key, sequence).await;
        // Unlike the stream transport's Chat handler, the datagram handler
        // excludes the sender (§9 Ambiguities: preserved, not resolved away).
        self.broadcast_reliable(&Message::Chat { player_id, message }, Some(&key)).await;
    }

    async fn snapshot(&self) -> Message {
        let table = self.table.read().await;
        let mut players = Vec::with_capacity(table.by_endpoint.len());
        for client_arc in table.by_endpoint.values() {
            players.push(client_arc.lock().await.player.clone());
        }
        Message::GameState { players, timestamp: chrono::Utc::now().timestamp() }
    }

    async fn send_ack(&self, key: &str, sequence: u32) {
        let Some(client_arc) = self.table.read().await.by_endpoint.get(key).cloned() else {
            return;
        };
        self.send_unreliable_locked(&client_arc, &Message::Ack { sequence }).await;
    }

    /// Allocates this client's next sequence, wraps `msg` as a reliable
    /// packet, records it as pending, and sends it once (§4.4 "Reliable
    /// broadcast"). A `GameState` snapshot (or any other payload) that
    /// would exceed the MTU cap is replaced by an `Error` envelope at the
    /// same sequence rather than sent oversized or fragmented (§6.2, §7).
    async fn send_reliable_locked(&self, client_arc: &Arc<Mutex<DatagramClient>>, msg: &Message) {
        let (bytes, addr, oversized) = {
            let mut client = client_arc.lock().await;
            let seq = client.allocate_sequence();
            let packet = Packet::new(seq, msg.clone(), true);
            let Ok(bytes) = encode_packet(&packet) else { return };
            let (bytes, oversized) = if bytes.len() > MAX_DATAGRAM_SIZE {
                let error_msg = Message::Error {
                    message: "snapshot exceeds datagram MTU, dropped".to_string(),
                };
                let error_packet = Packet::new(seq, error_msg, true);
                match encode_packet(&error_packet) {
                    Ok(error_bytes) => (error_bytes, true),
                    Err(_) => return,
                }
            } else {
                (bytes, false)
            };
            client.pending.insert(seq, PendingPacket { bytes: bytes.clone(), last_send: Instant::now() });
            (bytes, client.addr, oversized)
        };
        if oversized {
            warn!(%addr, "encoded packet exceeded MAX_DATAGRAM_SIZE, sent Error instead");
        }
        let _ = self.socket.send_to(&bytes, addr).await;
    }

    /// Sends `msg` once with sequence 0 and no retransmission tracking
    /// (§4.4 "Unreliable broadcast").
    async fn send_unreliable_locked(&self, client_arc: &Arc<Mutex<DatagramClient>>, msg: &Message) {
        let addr = client_arc.lock().await.addr;
        let packet = Packet::new(0, msg.clone(), false);
        let Ok(bytes) = encode_packet(&packet) else { return };
        let _ = self.socket.send_to(&bytes, addr).await;
    }

    async fn broadcast_reliable(&self, msg: &Message, exclude_key: Option<&str>) {
        let clients = self.targets(exclude_key).await;
        for client_arc in clients {
            self.send_reliable_locked(&client_arc, msg).await;
        }
    }

    async fn broadcast_unreliable(&self, msg: &Message, exclude_key: Option<&str>) {
        let clients = self.targets(exclude_key).await;
        for client_arc in clients {
            self.send_unreliable_locked(&client_arc, msg).await;
        }
    }

    async fn targets(&self, exclude_key: Option<&str>) -> Vec<Arc<Mutex<DatagramClient>>> {
        let table = self.table.read().await;
        table
            .by_endpoint
            .iter()
            .filter(|(key, _)| Some(key.as_str()) != exclude_key)
            .map(|(_, client_arc)| client_arc.clone())
            .collect()
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(SERVER_HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            let clients = self.targets(None).await;
            for client_arc in clients {
                let player_id = client_arc.lock().await.player.id;
                self.send_unreliable_locked(&client_arc, &Message::Heartbeat { player_id, sequence: 0 }).await;
            }
        }
    }

    async fn eviction_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(EVICTION_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            self.evict_stale_clients().await;
        }
    }

    /// Removes clients whose `last_seen` exceeds [`CLIENT_TIMEOUT`] from
    /// both indices (§4.4 "Timeout eviction"). Session close is left to
    /// the persistence-side sweep (§4.2, §9) rather than invoked here.
    async fn evict_stale_clients(&self) {
        let now = Instant::now();
        let mut table = self.table.write().await;
        let mut stale = Vec::new();
        for (key, client_arc) in table.by_endpoint.iter() {
            if now.duration_since(client_arc.lock().await.last_seen) >= CLIENT_TIMEOUT {
                stale.push(key.clone());
            }
        }
        for key in stale {
            if let Some(client_arc) = table.by_endpoint.remove(&key) {
                let player_id = client_arc.lock().await.player.id;
                table.by_player.remove(&player_id);
                info!(%player_id, endpoint = %key, "evicted stale datagram client");
            }
        }
    }

    async fn retransmit_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(RETRANSMIT_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            self.retransmit_sweep().await;
        }
    }

    /// For every client, re-sends any pending packet whose last send was
    /// more than [`RETRANSMIT_AFTER`] ago, refreshing its timestamp
    /// (§4.4 "Reliability protocol"). No backoff, no retry cap.
    async fn retransmit_sweep(&self) {
        let clients: Vec<Arc<Mutex<DatagramClient>>> = {
            let table = self.table.read().await;
            table.by_endpoint.values().cloned().collect()
        };
        for client_arc in clients {
            let (addr, due): (SocketAddr, Vec<Vec<u8>>) = {
                let mut client = client_arc.lock().await;
                let now = Instant::now();
                let mut due = Vec::new();
                for pending in client.pending.values_mut() {
                    if now.duration_since(pending.last_send) >= RETRANSMIT_AFTER {
                        pending.last_send = now;
                        due.push(pending.bytes.clone());
                    }
                }
                (client.addr, due)
            };
            for bytes in due {
                let _ = self.socket.send_to(&bytes, addr).await;
            }
        }
    }
}
