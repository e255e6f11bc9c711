//! Grace-period cleanup of abandoned sockets.
//!
//! A closed socket does not leave its lobby or game immediately: a timer
//! keyed by `(userId, scope kind)` fires after the grace period, and a
//! reconnect with the same key cancels it without side effects.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};
use tokio::task::JoinHandle;

use crate::api::AppState;

use super::registry::{ScopeKind, Subscription};

pub struct CleanupScheduler {
    grace: Duration,
    pending: Mutex<HashMap<(String, ScopeKind), JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl CleanupScheduler {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Cancel a pending removal on graceful reconnect.
    pub fn cancel(&self, user_id: &str, kind: ScopeKind) {
        if let Some(handle) = lock(&self.pending).remove(&(user_id.to_string(), kind)) {
            handle.abort();
            tracing::debug!("cleanup cancelled: user={user_id} scope={kind:?}");
        }
    }

    /// Schedule removal of a closed socket. When the timer fires the socket
    /// leaves every registry map, and lobby/game subscriptions trigger the
    /// matching leave.
    pub fn schedule(
        &self,
        state: AppState,
        user_id: String,
        subscription: Subscription,
        socket_id: u64,
    ) {
        let key = (user_id.clone(), subscription.kind);
        let grace = self.grace;
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            state.cleanup.take_pending(&task_key);
            state.registry.remove_socket(socket_id);

            match (subscription.kind, subscription.key) {
                (ScopeKind::Lobby, Some(lobby_id)) => {
                    match state.lobby.leave_lobby(&user_id, &lobby_id).await {
                        Ok(outcome) => {
                            super::publish_lobby_leave(&state, &lobby_id, &outcome);
                            tracing::info!("cleanup left lobby {lobby_id} for {user_id}");
                        }
                        Err(err) => {
                            tracing::debug!("cleanup lobby leave failed for {user_id}: {err}");
                        }
                    }
                }
                (ScopeKind::Game, Some(game_id)) => {
                    match state.game.leave_game(&game_id, &user_id).await {
                        Ok(outcome) => {
                            super::publish_game_leave(&state, &game_id, &outcome);
                            tracing::info!("cleanup left game {game_id} for {user_id}");
                        }
                        Err(err) => {
                            tracing::debug!("cleanup game leave failed for {user_id}: {err}");
                        }
                    }
                }
                _ => {}
            }
        });

        // A newer timer for the same key replaces (and aborts) the old one.
        if let Some(previous) = lock(&self.pending).insert(key, handle) {
            previous.abort();
        }
    }

    fn take_pending(&self, key: &(String, ScopeKind)) {
        lock(&self.pending).remove(key);
    }
}
