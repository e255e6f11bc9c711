//! WebSocket subscription router.
//!
//! One endpoint serves every realtime scope. The upgrade authenticates the
//! `token` cookie; after that the client sends typed subscription frames
//! (`{type, lobbyId?/gameId?}`) and the socket is registered under the
//! matching scope. Each socket is a task pair: a read loop and a write
//! queue; a heartbeat terminates sockets that miss two pings, and a closed
//! socket schedules grace-period cleanup.

pub mod cleanup;
pub mod dispatcher;
pub mod frames;
pub mod registry;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tokio::{sync::mpsc, time::interval};

use busfahrer::{game::LeaveGameOutcome, lobby::LeaveOutcome};

use crate::{api::AppState, auth};

use frames::OutboundFrame;
use registry::{ScopeKind, SocketHandle, Subscription};

/// A client subscription frame.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "lobbyId")]
    lobby_id: Option<String>,
    #[serde(rename = "gameId")]
    game_id: Option<String>,
}

impl InboundFrame {
    fn into_subscription(self) -> Option<Subscription> {
        let (kind, key) = match self.kind.as_str() {
            "account" => (ScopeKind::Account, None),
            "friend" => (ScopeKind::Friend, None),
            "lobbies" => (ScopeKind::Lobbies, None),
            "lobby" => (ScopeKind::Lobby, Some(self.lobby_id?)),
            "chat" => (ScopeKind::Chat, Some(self.lobby_id?)),
            "game" => (ScopeKind::Game, Some(self.game_id.or(self.lobby_id)?)),
            _ => return None,
        };
        Some(Subscription { kind, key })
    }
}

/// Upgrade to a WebSocket after validating the `token` cookie: 401 without
/// a token, 403 on an invalid one.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = auth::token_from_headers(&headers) else {
        return (StatusCode::UNAUTHORIZED, "No token provided").into_response();
    };
    let user_id = match state.tokens.verify(&token) {
        Ok(user_id) => user_id,
        Err(_) => return (StatusCode::FORBIDDEN, "Invalid token").into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: String, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let socket_id = state.registry.next_socket_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let is_alive = Arc::new(AtomicBool::new(true));
    let subscription: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    tracing::info!("socket {socket_id} connected: user={user_id}");

    // Write task: drains the frame queue and drives the heartbeat.
    let heartbeat = std::time::Duration::from_secs(state.config.realtime.heartbeat_secs);
    let alive = is_alive.clone();
    let mut send_task = tokio::spawn(async move {
        let mut ticker = interval(heartbeat);
        ticker.tick().await; // the first tick fires immediately
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    let Ok(json) = serde_json::to_string(&frame) else { continue };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if !alive.swap(false, Ordering::SeqCst) {
                        // Two missed pongs.
                        break;
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read loop: subscription frames and pongs.
    let handle = SocketHandle::new(socket_id, user_id.clone(), tx);
    let read_state = state.clone();
    let read_user = user_id.clone();
    let read_alive = is_alive.clone();
    let read_subscription = subscription.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let frame = match serde_json::from_str::<InboundFrame>(&text) {
                        Ok(frame) => frame,
                        Err(err) => {
                            tracing::debug!("bad subscription frame from {read_user}: {err}");
                            continue;
                        }
                    };
                    let Some(sub) = frame.into_subscription() else {
                        tracing::debug!("unknown subscription type from {read_user}");
                        continue;
                    };
                    // Reconnecting within the grace period is side-effect
                    // free.
                    read_state.cleanup.cancel(&read_user, sub.kind);
                    let mut current = read_subscription
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    if current.is_some() {
                        read_state.registry.remove_socket(socket_id);
                    }
                    read_state.registry.subscribe(&sub, handle.clone());
                    *current = Some(sub);
                }
                Ok(Message::Pong(_)) => {
                    read_alive.store(true, Ordering::SeqCst);
                }
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    // Whichever half dies first takes the other with it.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let last_subscription = subscription
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    match last_subscription {
        Some(sub) => {
            state
                .cleanup
                .schedule(state.clone(), user_id.clone(), sub, socket_id);
        }
        None => state.registry.remove_socket(socket_id),
    }
    tracing::info!("socket {socket_id} disconnected: user={user_id}");
}

/// Push the lifecycle frames a lobby leave produced.
pub fn publish_lobby_leave(state: &AppState, lobby_id: &str, outcome: &LeaveOutcome) {
    if outcome.deleted {
        state
            .registry
            .broadcast_lobby(lobby_id, OutboundFrame::CloseUpdate);
    } else if let Some(heir) = &outcome.new_master {
        state.registry.send_lobby_user(
            lobby_id,
            heir,
            OutboundFrame::RoleUpdate {
                is_game_master: true,
            },
        );
    }
}

/// Push the lifecycle frames a game leave produced.
pub fn publish_game_leave(state: &AppState, game_id: &str, outcome: &LeaveGameOutcome) {
    if outcome.game_deleted {
        state
            .registry
            .broadcast_game(game_id, OutboundFrame::CloseUpdate);
    }
    if let Some(lobby_outcome) = &outcome.lobby {
        publish_lobby_leave(state, game_id, lobby_outcome);
    }
}
