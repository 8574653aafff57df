//! Stream (WebSocket) transport listener (§4.3).
//!
//! Grounded on `iwismer-rusty-timer`'s `ws_forwarder.rs`/`ws_receiver.rs`
//! (`WebSocketUpgrade` + `on_upgrade`, permissive-by-default handshake) and
//! `rdaum-moor`'s `ws_connection.rs` (`socket.split()` into a
//! `SplitSink`/`SplitStream` pair so the reader and writer make progress
//! independently, per §5's "natural expression is a task per direction per
//! connection").

use std::net::SocketAddr;
use std::sync::Arc;

use arena_db::PersistenceGateway;
use arena_shared::codec::decode_stream_message;
use arena_shared::player::PlayerId;
use arena_shared::session::SessionProtocol;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::game_state::{GameState, OUTBOUND_QUEUE_CAPACITY};

#[derive(Clone)]
struct AppState {
    game_state: Arc<GameState>,
    gateway: Arc<PersistenceGateway>,
}

/// Binds the stream listener and serves until the process is asked to shut
/// down (the caller races this future against a shutdown signal).
pub async fn serve(
    addr: SocketAddr,
    game_state: Arc<GameState>,
    gateway: Arc<PersistenceGateway>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "stream listener bound");
    serve_on(listener, game_state, gateway).await
}

/// Runs the router on an already-bound listener. Split out from [`serve`]
/// so tests can bind an ephemeral port (`127.0.0.1:0`) and discover the
/// actual address before the listener starts accepting.
pub async fn serve_on(
    listener: TcpListener,
    game_state: Arc<GameState>,
    gateway: Arc<PersistenceGateway>,
) -> anyhow::Result<()> {
    let tick = tokio::spawn(game_state.clone().run_tick_loop());

    let state = AppState { game_state, gateway };
    let app = Router::new()
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await;

    tick.abort();
    result?;
    Ok(())
}

/// Origin check is permissive by default (§4.3) — any upgrade request is
/// accepted; a deployment that wants to tighten this can add a header
/// check here.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, peer))
}

async fn handle_connection(socket: WebSocket, state: AppState, peer: SocketAddr) {
    let player_id: PlayerId = Uuid::new_v4();

    let session_id = match state
        .gateway
        .create_session(player_id, SessionProtocol::WebSocket, Some(&peer.ip().to_string()))
        .await
    {
        Ok(id) => Some(id),
        Err(error) => {
            warn!(%player_id, %error, "failed to create session for stream client");
            None
        }
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(OUTBOUND_QUEUE_CAPACITY);

    // The roster's clone of `outbound_tx` is the only thing keeping this
    // writer task alive: when `GameState::remove_client` drops it (on
    // queue overflow or on disconnect below), `outbound_rx.recv()` returns
    // `None` and the writer closes the socket's send half.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    state.game_state.add_client(player_id, session_id, outbound_tx).await;
    info!(%player_id, %peer, "stream client connected");

    while let Some(frame) = ws_receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%player_id, %error, "stream read error, disconnecting");
                break;
            }
        };
        match frame {
            WsMessage::Text(text) => match decode_stream_message(text.as_str()) {
                Ok(msg) => state.game_state.handle_message(player_id, msg, session_id).await,
                Err(error) => warn!(%player_id, %error, "failed to decode stream frame"),
            },
            WsMessage::Close(_) => break,
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Binary(_) => {}
        }
    }

    state.game_state.remove_client(player_id).await;
    if let Some(session_id) = session_id {
        let gw = state.gateway.clone();
        arena_db::spawn_log("end_session", async move { gw.end_session(session_id).await });
    }
    writer.abort();
    info!(%player_id, %peer, "stream client disconnected");
}
