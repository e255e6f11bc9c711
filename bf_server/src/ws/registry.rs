//! Connection registry: six typed maps from subscription scope to live
//! sockets.
//!
//! Subscription handlers and the cleanup scheduler are the only writers;
//! broadcasters only read. Each map is guarded independently so a
//! broadcast on one scope never blocks joins on another. Sends go through
//! per-socket write queues and silently drop on dead sockets (the
//! heartbeat reaps those).

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::mpsc::UnboundedSender;

use super::frames::OutboundFrame;

/// The six subscription scopes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ScopeKind {
    Account,
    Friend,
    Lobbies,
    Lobby,
    Chat,
    Game,
}

/// A subscription as stamped on a socket: its scope and, for the keyed
/// scopes, the target id.
#[derive(Clone, Debug)]
pub struct Subscription {
    pub kind: ScopeKind,
    pub key: Option<String>,
}

/// One live socket's address: its id, owner, and write queue.
#[derive(Clone)]
pub struct SocketHandle {
    pub id: u64,
    pub user_id: String,
    sender: UnboundedSender<OutboundFrame>,
}

impl SocketHandle {
    pub fn new(id: u64, user_id: String, sender: UnboundedSender<OutboundFrame>) -> Self {
        Self {
            id,
            user_id,
            sender,
        }
    }

    /// Enqueue a frame; errors from closed queues are swallowed.
    pub fn send(&self, frame: OutboundFrame) {
        let _ = self.sender.send(frame);
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    user: Mutex<HashMap<String, Vec<SocketHandle>>>,
    friends: Mutex<HashMap<String, Vec<SocketHandle>>>,
    lobbies: Mutex<Vec<SocketHandle>>,
    lobby: Mutex<HashMap<String, HashMap<String, SocketHandle>>>,
    chat: Mutex<HashMap<String, Vec<SocketHandle>>>,
    game: Mutex<HashMap<String, HashMap<String, SocketHandle>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_socket_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a socket under a subscription. Keyed scopes without a key
    /// are ignored (the router validates frames before calling in).
    pub fn subscribe(&self, subscription: &Subscription, handle: SocketHandle) {
        match (subscription.kind, subscription.key.as_deref()) {
            (ScopeKind::Account, _) => {
                lock(&self.user)
                    .entry(handle.user_id.clone())
                    .or_default()
                    .push(handle);
            }
            (ScopeKind::Friend, _) => {
                lock(&self.friends)
                    .entry(handle.user_id.clone())
                    .or_default()
                    .push(handle);
            }
            (ScopeKind::Lobbies, _) => {
                lock(&self.lobbies).push(handle);
            }
            (ScopeKind::Lobby, Some(key)) => {
                lock(&self.lobby)
                    .entry(key.to_string())
                    .or_default()
                    .insert(handle.user_id.clone(), handle);
            }
            (ScopeKind::Chat, Some(key)) => {
                lock(&self.chat)
                    .entry(key.to_string())
                    .or_default()
                    .push(handle);
            }
            (ScopeKind::Game, Some(key)) => {
                lock(&self.game)
                    .entry(key.to_string())
                    .or_default()
                    .insert(handle.user_id.clone(), handle);
            }
            _ => {}
        }
    }

    /// Drop a socket from every map that holds it.
    pub fn remove_socket(&self, socket_id: u64) {
        for map in [&self.user, &self.friends, &self.chat] {
            let mut guard = lock(map);
            for sockets in guard.values_mut() {
                sockets.retain(|s| s.id != socket_id);
            }
            guard.retain(|_, sockets| !sockets.is_empty());
        }
        lock(&self.lobbies).retain(|s| s.id != socket_id);
        for map in [&self.lobby, &self.game] {
            let mut guard = lock(map);
            for sockets in guard.values_mut() {
                sockets.retain(|_, s| s.id != socket_id);
            }
            guard.retain(|_, sockets| !sockets.is_empty());
        }
    }

    pub fn send_user(&self, user_id: &str, frame: OutboundFrame) {
        if let Some(sockets) = lock(&self.user).get(user_id) {
            for socket in sockets {
                socket.send(frame.clone());
            }
        }
    }

    pub fn send_friend(&self, user_id: &str, frame: OutboundFrame) {
        if let Some(sockets) = lock(&self.friends).get(user_id) {
            for socket in sockets {
                socket.send(frame.clone());
            }
        }
    }

    pub fn broadcast_lobbies(&self, frame: OutboundFrame) {
        for socket in lock(&self.lobbies).iter() {
            socket.send(frame.clone());
        }
    }

    pub fn broadcast_lobby(&self, lobby_id: &str, frame: OutboundFrame) {
        if let Some(sockets) = lock(&self.lobby).get(lobby_id) {
            for socket in sockets.values() {
                socket.send(frame.clone());
            }
        }
    }

    pub fn send_lobby_user(&self, lobby_id: &str, user_id: &str, frame: OutboundFrame) {
        if let Some(socket) = lock(&self.lobby).get(lobby_id).and_then(|m| m.get(user_id)) {
            socket.send(frame);
        }
    }

    pub fn broadcast_chat(&self, chat_id: &str, frame: OutboundFrame) {
        if let Some(sockets) = lock(&self.chat).get(chat_id) {
            for socket in sockets {
                socket.send(frame.clone());
            }
        }
    }

    pub fn broadcast_game(&self, game_id: &str, frame: OutboundFrame) {
        if let Some(sockets) = lock(&self.game).get(game_id) {
            for socket in sockets.values() {
                socket.send(frame.clone());
            }
        }
    }

    pub fn send_game_user(&self, game_id: &str, user_id: &str, frame: OutboundFrame) {
        if let Some(socket) = lock(&self.game).get(game_id).and_then(|m| m.get(user_id)) {
            socket.send(frame);
        }
    }

    /// The users currently subscribed to a game, for per-user frames.
    pub fn game_subscribers(&self, game_id: &str) -> Vec<String> {
        lock(&self.game)
            .get(game_id)
            .map(|sockets| sockets.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn handle(registry: &ConnectionRegistry, user: &str) -> (SocketHandle, tokio::sync::mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = unbounded_channel();
        (
            SocketHandle::new(registry.next_socket_id(), user.to_string(), tx),
            rx,
        )
    }

    #[test]
    fn test_game_scope_is_keyed_by_user() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = handle(&registry, "a");
        let (b, mut rx_b) = handle(&registry, "b");
        let sub = Subscription {
            kind: ScopeKind::Game,
            key: Some("g1".to_string()),
        };
        registry.subscribe(&sub, a);
        registry.subscribe(&sub, b);

        registry.send_game_user("g1", "a", OutboundFrame::KickUpdate);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());

        registry.broadcast_game("g1", OutboundFrame::CloseUpdate);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());

        let mut subscribers = registry.game_subscribers("g1");
        subscribers.sort();
        assert_eq!(subscribers, vec!["a", "b"]);
    }

    #[test]
    fn test_remove_socket_sweeps_all_scopes() {
        let registry = ConnectionRegistry::new();
        let (socket, mut rx) = handle(&registry, "a");
        let id = socket.id;
        registry.subscribe(
            &Subscription {
                kind: ScopeKind::Lobbies,
                key: None,
            },
            socket.clone(),
        );
        registry.subscribe(
            &Subscription {
                kind: ScopeKind::Lobby,
                key: Some("l1".to_string()),
            },
            socket,
        );

        registry.remove_socket(id);
        registry.broadcast_lobbies(OutboundFrame::CloseUpdate);
        registry.broadcast_lobby("l1", OutboundFrame::CloseUpdate);
        assert!(rx.try_recv().is_err());
    }
}
