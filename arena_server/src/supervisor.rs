//! Boot sequence and transport selection (§4.6).
//!
//! Grounded on the teacher's `main.rs`/`server.rs` boot shape (parse
//! config, open resources, run until signaled), generalized from argv
//! flags to env-only configuration (§6.1) and from "run one fixed-tick
//! simulation loop" to "start exactly one of two listeners".

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use arena_db::pool::{create_pool, run_migrations};
use arena_db::PersistenceGateway;
use arena_shared::config::{Protocol, ServerConfig};
use tracing::{error, info};

use crate::{datagram, game_state::GameState, stream_listener};

/// Reads configuration, opens the database, starts exactly one listener,
/// and blocks until a shutdown signal arrives or the listener errors out.
pub async fn run() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    info!(protocol = %config.protocol, port = config.port, "booting");

    let pool = create_pool(config.sqlite_path()).await.context("open database pool")?;
    run_migrations(&pool).await.context("run migrations")?;
    let gateway = Arc::new(PersistenceGateway::new(pool));

    let addr: SocketAddr = config.bind_addr().parse().context("parse bind address")?;

    let listener = match config.protocol {
        Protocol::WebSocket => {
            let game_state = Arc::new(GameState::new(gateway.clone()));
            tokio::spawn(stream_listener::serve(addr, game_state, gateway.clone()))
        }
        Protocol::Udp => tokio::spawn(datagram::serve(addr, gateway.clone())),
    };

    tokio::select! {
        result = listener => match result {
            Ok(Ok(())) => info!("listener exited cleanly"),
            Ok(Err(error)) => error!(%error, "listener failed"),
            Err(error) => error!(%error, "listener task panicked"),
        },
        _ = shutdown_signal() => info!("shutdown signal received"),
    }

    gateway.pool().close().await;
    Ok(())
}

/// Waits for either Ctrl+C or SIGTERM, whichever arrives first (§4.6).
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
