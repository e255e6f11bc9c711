//! Busfahrer game server.
//!
//! Wires the in-memory document store, the lobby/chat/friend/game
//! services, the connection registry, and the fan-out dispatcher behind an
//! axum HTTP + WebSocket surface.

use std::{sync::Arc, time::Duration};

use anyhow::Error;
use pico_args::Arguments;

use busfahrer::{
    MemoryStore,
    account::AccountService,
    chat::ChatService,
    friend::FriendService,
    game::GameService,
    lobby::LobbyService,
    store::Store,
};

use bf_server::{
    api, logging, ws,
    auth::TokenManager,
    config::ServerConfig,
    ws::{cleanup::CleanupScheduler, registry::ConnectionRegistry},
};

const HELP: &str = "\
Run a Busfahrer game server

USAGE:
  bf_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:6969]

FLAGS:
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  JWT_SECRET               JWT signing secret (required)
  CHAOS_MODE               Chaos drink multiplier probability [default: 0.5]
  UPLOAD_DIR               Avatar upload directory [default: uploads]
  UPLOAD_MAX_BYTES         Avatar size cap [default: 2097152]
  HEARTBEAT_SECS           Socket heartbeat interval [default: 30]
  CLEANUP_GRACE_SECS       Abandoned-socket grace period [default: 15]
";

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }
    let bind_override = pargs.opt_value_from_str("--bind")?;

    logging::init();

    let config = Arc::new(
        ServerConfig::from_env(bind_override)
            .map_err(|e| anyhow::anyhow!("Configuration error: {e}"))?,
    );
    tracing::info!("Starting Busfahrer server at {}", config.bind);

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let accounts = Arc::new(AccountService::new(store.clone()));
    let friends = Arc::new(FriendService::new(store.clone()));
    let lobby = Arc::new(LobbyService::new(store.clone()));
    let chat = Arc::new(ChatService::new(store.clone()));
    let game = Arc::new(GameService::new(
        store.clone(),
        lobby.clone(),
        config.game.chaos_mode,
    ));
    let tokens = Arc::new(TokenManager::new(&config.security.jwt_secret));
    let registry = Arc::new(ConnectionRegistry::new());
    let cleanup = Arc::new(CleanupScheduler::new(Duration::from_secs(
        config.realtime.cleanup_grace_secs,
    )));

    let state = api::AppState {
        store,
        accounts,
        friends,
        lobby,
        chat,
        game,
        tokens,
        registry,
        cleanup,
        config: config.clone(),
    };

    // The dispatcher owns the change feed: one consumer, fan-out per scope.
    let dispatcher = ws::dispatcher::spawn(state.clone());

    let app = api::create_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {e}", config.bind))?;

    tracing::info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {e}"))?;

    dispatcher.abort();
    tracing::info!("Shutting down server...");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
}
