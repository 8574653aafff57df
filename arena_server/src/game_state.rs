//! Shared in-memory game state for the stream transport (§4.5).
//!
//! Mirrors the teacher's `GameServer` (`server.rs`) in shape — a roster
//! guarded by a lock, a dispatch-by-tag `step`/`handle_*` surface, and a
//! broadcast helper that snapshots the roster under the lock and then sends
//! outside it — generalized from fixed-timestep entity replication to this
//! spec's message dispatch table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arena_db::gateway::event_type;
use arena_db::PersistenceGateway;
use arena_shared::codec::encode_stream_message;
use arena_shared::message::{action, Message};
use arena_shared::player::{default_name, Player, PlayerId, PICKUP_SCORE};
use axum::extract::ws::Message as WsMessage;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Capacity of each connection's outbound queue (§4.3, §5).
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Fixed-rate tick, ≈60 Hz (§4.5). Mirrors the teacher's `engine_server`
/// fixed-timestep `step`/`simulate()` loop (`server.rs:336-348`); this
/// server has no server-authoritative simulation yet, so the loop body is
/// empty, but the spec requires the hook to exist regardless.
const TICK_INTERVAL: Duration = Duration::from_millis(16);

struct Entry {
    player: Player,
    outbound: mpsc::Sender<WsMessage>,
}

/// Owns the authoritative roster for the stream transport. One instance is
/// shared (via `Arc`) across every connection task.
pub struct GameState {
    roster: RwLock<HashMap<PlayerId, Entry>>,
    gateway: Arc<PersistenceGateway>,
}

impl GameState {
    pub fn new(gateway: Arc<PersistenceGateway>) -> Self {
        Self {
            roster: RwLock::new(HashMap::new()),
            gateway,
        }
    }

    /// Fixed-rate tick loop (§4.5). Reserved for future server-authoritative
    /// updates; emits nothing today. The stream listener spawns this
    /// alongside the accept loop so the hook runs for the lifetime of the
    /// server even though its body is currently a no-op.
    pub async fn run_tick_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;
        }
    }

    /// Registers a newly connected client (§4.5 `add_client`): inserts into
    /// the roster, persists the player, logs a `join` event, sends
    /// `PlayerJoin` to the client itself, broadcasts `PlayerJoin` to
    /// everyone else, then sends the full `GameState` snapshot to the
    /// client.
    pub async fn add_client(
        &self,
        player_id: PlayerId,
        session_id: Option<i64>,
        outbound: mpsc::Sender<WsMessage>,
    ) {
        let player = Player::new(player_id, default_name(player_id));
        {
            let mut roster = self.roster.write().await;
            roster.insert(
                player_id,
                Entry {
                    player: player.clone(),
                    outbound,
                },
            );
        }

        let gw = self.gateway.clone();
        let persisted = player.clone();
        arena_db::spawn_log("upsert_player", async move { gw.upsert_player(&persisted).await });
        let gw = self.gateway.clone();
        arena_db::spawn_log("log_event(join)", async move {
            gw.log_event(player_id, session_id, event_type::JOIN, None).await
        });

        let join = Message::PlayerJoin {
            player_id,
            name: player.name.clone(),
        };
        self.send_to(player_id, &join).await;
        self.broadcast(&join, Some(player_id)).await;

        let snapshot = self.snapshot().await;
        self.send_to(player_id, &snapshot).await;
    }

    /// Removes a client from the roster (§4.5 `remove_client`): logs
    /// `leave`, broadcasts `PlayerLeave`, and drops the stored outbound
    /// sender, which closes that client's queue. Idempotent — a client
    /// already absent from the roster produces no further side effects,
    /// since queue-overflow eviction (see [`Self::send_to`]) and the
    /// connection's own read-loop cleanup can both race to call this for
    /// the same player.
    pub async fn remove_client(&self, player_id: PlayerId) {
        let removed = {
            let mut roster = self.roster.write().await;
            roster.remove(&player_id)
        };
        if removed.is_none() {
            return;
        }

        let gw = self.gateway.clone();
        arena_db::spawn_log("log_event(leave)", async move {
            gw.log_event(player_id, None, event_type::LEAVE, None).await
        });

        self.broadcast(&Message::PlayerLeave { player_id }, None).await;
    }

    /// Dispatches an inbound message (§4.5 `handle_message`). The
    /// envelope's inner player_id MUST match `sender`; mismatches are
    /// dropped with a log entry, never surfaced to the peer (§7).
    pub async fn handle_message(&self, sender: PlayerId, msg: Message, session_id: Option<i64>) {
        if let Some(claimed) = msg.player_id() {
            if claimed != sender {
                warn!(%sender, %claimed, "dropping message with mismatched player_id");
                return;
            }
        }

        match msg {
            Message::PlayerMove { x, y, .. } => self.handle_move(sender, x, y, session_id).await,
            Message::PlayerAction { action: action_name, data, .. } => {
                self.handle_action(sender, &action_name, data, session_id).await
            }
            Message::Chat { message, .. } => self.handle_chat(sender, message, session_id).await,
            other => debug!(?other, %sender, "ignoring message tag not in the stream dispatch table"),
        }
    }

    async fn handle_move(&self, id: PlayerId, x: f32, y: f32, session_id: Option<i64>) {
        let updated = {
            let mut roster = self.roster.write().await;
            match roster.get_mut(&id) {
                Some(entry) => {
                    entry.player.x = x;
                    entry.player.y = y;
                    true
                }
                None => false,
            }
        };
        if !updated {
            return;
        }

        let gw = self.gateway.clone();
        arena_db::spawn_log("update_position", async move { gw.update_position(id, x, y).await });

        let gw = self.gateway.clone();
        let body = encode_stream_message(&Message::PlayerMove { player_id: id, x, y }).ok();
        arena_db::spawn_log("log_event(move)", async move {
            gw.log_event(id, session_id, event_type::MOVE, body.as_deref()).await
        });

        self.broadcast(&Message::PlayerMove { player_id: id, x, y }, Some(id)).await;
        let snapshot = self.snapshot().await;
        self.broadcast(&snapshot, None).await;
    }

    async fn handle_action(
        &self,
        id: PlayerId,
        action_name: &str,
        data: Option<serde_json::Value>,
        session_id: Option<i64>,
    ) {
        match action_name {
            action::ATTACK => {
                let gw = self.gateway.clone();
                arena_db::spawn_log("log_event(attack)", async move {
                    gw.log_event(id, session_id, event_type::ATTACK, None).await
                });
            }
            action::PICKUP => {
                let new_score = {
                    let mut roster = self.roster.write().await;
                    match roster.get_mut(&id) {
                        Some(entry) => {
                            entry.player.score += PICKUP_SCORE;
                            Some(entry.player.score)
                        }
                        None => None,
                    }
                };
                let Some(new_score) = new_score else { return };
                let gw = self.gateway.clone();
                arena_db::spawn_log("update_score", async move { gw.update_score(id, new_score).await });
                let gw = self.gateway.clone();
                arena_db::spawn_log("log_event(pickup)", async move {
                    gw.log_event(id, session_id, event_type::PICKUP, None).await
                });
            }
            other => debug!(action = other, ?data, %id, "unrecognized PlayerAction, ignoring"),
        }
    }

    async fn handle_chat(&self, id: PlayerId, message: String, session_id: Option<i64>) {
        let gw = self.gateway.clone();
        let text = message.clone();
        arena_db::spawn_log("save_chat", async move { gw.save_chat(id, session_id, &text).await });

        let gw = self.gateway.clone();
        let body = encode_stream_message(&Message::Chat {
            player_id: id,
            message: message.clone(),
        })
        .ok();
        arena_db::spawn_log("log_event(chat)", async move {
            gw.log_event(id, session_id, event_type::CHAT, body.as_deref()).await
        });

        // Unlike the datagram transport, the stream `Chat` handler
        // broadcasts to all clients including the sender (§9 Ambiguities:
        // preserved, not resolved away).
        self.broadcast(&Message::Chat { player_id: id, message }, None).await;
    }

    async fn snapshot(&self) -> Message {
        let players: Vec<Player> = {
            let roster = self.roster.read().await;
            roster.values().map(|e| e.player.clone()).collect()
        };
        Message::GameState {
            players,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Sends one message to one client's outbound queue. A full or closed
    /// queue evicts that client (§4.3: "the sender SHALL close the
    /// outbound queue and signal disconnect").
    async fn send_to(&self, id: PlayerId, msg: &Message) {
        let tx = {
            let roster = self.roster.read().await;
            roster.get(&id).map(|e| e.outbound.clone())
        };
        let Some(tx) = tx else { return };
        let Ok(text) = encode_stream_message(msg) else {
            warn!(%id, "failed to encode outbound message");
            return;
        };
        if tx.try_send(WsMessage::Text(text.into())).is_err() {
            warn!(%id, "outbound queue full or closed, evicting client");
            self.remove_client(id).await;
        }
    }

    /// Broadcasts one message to every roster member except `exclude`.
    /// Acquires the roster lock only to snapshot destinations (§4.5); the
    /// actual sends happen after the lock is released.
    async fn broadcast(&self, msg: &Message, exclude: Option<PlayerId>) {
        let targets: Vec<(PlayerId, mpsc::Sender<WsMessage>)> = {
            let roster = self.roster.read().await;
            roster
                .iter()
                .filter(|(id, _)| Some(**id) != exclude)
                .map(|(id, e)| (*id, e.outbound.clone()))
                .collect()
        };
        let Ok(text) = encode_stream_message(msg) else {
            warn!("failed to encode broadcast message");
            return;
        };

        let mut evict = Vec::new();
        for (id, tx) in targets {
            if tx.try_send(WsMessage::Text(text.clone().into())).is_err() {
                evict.push(id);
            }
        }
        for id in evict {
            warn!(%id, "outbound queue full or closed during broadcast, evicting client");
            self.remove_client(id).await;
        }
    }
}
