//! Standalone server binary.
//!
//! Configuration is environment-only (§6.1): `PORT`, `PROTOCOL`
//! (`websocket`|`udp`), `DATABASE_URL`, `LOG_LEVEL`. There are no CLI
//! flags and no console.

use arena_shared::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .init();

    arena_server::run().await
}
