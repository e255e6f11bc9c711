//! Lobby document model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::{
    constants::{MAX_PLAYER_LIMIT, MIN_PLAYER_LIMIT},
    entities::{BusMode, Gender, Giving, Matching, Role, Shuffling, Turning},
};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LobbyStatus {
    Waiting,
    Full,
    Started,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayer {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub gender: Gender,
    pub avatar: String,
    pub title: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LobbySettings {
    pub player_limit: usize,
    pub matching: Matching,
    pub shuffling: Shuffling,
    pub giving: Giving,
    pub turning: Turning,
    pub bus_mode: BusMode,
    pub can_inherit: bool,
    pub is_chaos: bool,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            player_limit: MAX_PLAYER_LIMIT,
            matching: Matching::default(),
            shuffling: Shuffling::default(),
            giving: Giving::default(),
            turning: Turning::default(),
            bus_mode: BusMode::default(),
            can_inherit: true,
            is_chaos: false,
        }
    }
}

impl LobbySettings {
    /// Whether the configured player limit is inside the allowed range.
    pub fn limit_is_valid(&self) -> bool {
        (MIN_PLAYER_LIMIT..=MAX_PLAYER_LIMIT).contains(&self.player_limit)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyDoc {
    pub id: String,
    pub name: String,
    pub lobby_code: String,
    pub status: LobbyStatus,
    pub private: bool,
    pub players: Vec<LobbyPlayer>,
    pub spectators: Vec<LobbyPlayer>,
    pub is_joining: Vec<String>,
    pub settings: LobbySettings,
    pub created_at: DateTime<Utc>,
}

impl LobbyDoc {
    pub fn player(&self, user_id: &str) -> Option<&LobbyPlayer> {
        self.players.iter().find(|p| p.id == user_id)
    }

    pub fn spectator(&self, user_id: &str) -> Option<&LobbyPlayer> {
        self.spectators.iter().find(|p| p.id == user_id)
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.player(user_id).is_some() || self.spectator(user_id).is_some()
    }

    pub fn is_joining(&self, user_id: &str) -> bool {
        self.is_joining.iter().any(|id| id == user_id)
    }

    pub fn master(&self) -> Option<&LobbyPlayer> {
        self.players.iter().find(|p| p.role == Role::Master)
    }

    pub fn is_master(&self, user_id: &str) -> bool {
        self.master().is_some_and(|m| m.id == user_id)
    }

    /// Seats taken against the player limit: players plus joiners-in-flight.
    pub fn occupancy(&self) -> usize {
        self.players.len() + self.is_joining.len()
    }

    /// The earliest-joined player other than `except`, used for master
    /// inheritance.
    pub fn earliest_joined_except(&self, except: &str) -> Option<&LobbyPlayer> {
        self.players
            .iter()
            .filter(|p| p.id != except)
            .min_by_key(|p| p.joined_at)
    }
}

/// The shape published on the public lobby list.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySummary {
    pub id: String,
    pub name: String,
    pub player_count: usize,
    pub player_limit: usize,
}

impl From<&LobbyDoc> for LobbySummary {
    fn from(lobby: &LobbyDoc) -> Self {
        Self {
            id: lobby.id.clone(),
            name: lobby.name.clone(),
            player_count: lobby.players.len(),
            player_limit: lobby.settings.player_limit,
        }
    }
}
