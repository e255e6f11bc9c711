//! Lobby lifecycle: creation, joining via code, spectators, invitations,
//! kicks, master inheritance, and game start.

pub mod models;

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    account::UserDoc,
    chat::ChatDoc,
    codes::random_code,
    errors::{ServiceError, ServiceResult},
    friend::{FriendDoc, Invitation},
    game::{
        constants::{DOUBLE_DECK_SIZE, HAND_SIZE, PYRAMID_ROWS},
        engine::build_game,
        entities::{Gender, Role},
    },
    store::{self, Patch, Store, collections},
};

use models::{LobbyDoc, LobbyPlayer, LobbySettings, LobbyStatus, LobbySummary};

/// What a leave did, so the caller can push the matching lifecycle frames.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LeaveOutcome {
    /// The lobby (and its chat and game) was torn down.
    pub deleted: bool,
    /// A remaining player inherited the master role.
    pub new_master: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CreateLobby {
    pub name: String,
    pub player_name: String,
    pub private: bool,
    pub gender: Gender,
    pub settings: LobbySettings,
}

pub struct LobbyService {
    store: Arc<dyn Store>,
}

impl LobbyService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn load(&self, lobby_id: &str, title: &str) -> ServiceResult<LobbyDoc> {
        store::read_as(self.store.as_ref(), collections::LOBBIES, lobby_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Lobby not found", title))
    }

    async fn find_by_code(&self, code: &str) -> ServiceResult<Option<LobbyDoc>> {
        let docs = self.store.list(collections::LOBBIES).await?;
        for value in docs {
            let lobby: LobbyDoc = serde_json::from_value(value)
                .map_err(|e| ServiceError::internal(e.to_string(), "Lobby Error"))?;
            if lobby.lobby_code.eq_ignore_ascii_case(code) {
                return Ok(Some(lobby));
            }
        }
        Ok(None)
    }

    /// A code no live lobby uses, by rejection sampling.
    async fn fresh_code(&self) -> ServiceResult<String> {
        loop {
            let code = random_code();
            if self.find_by_code(&code).await?.is_none() {
                return Ok(code);
            }
        }
    }

    /// The caller's display profile, if they have a user document yet.
    async fn profile(&self, user_id: &str) -> ServiceResult<(String, String)> {
        let user: Option<UserDoc> =
            store::read_as(self.store.as_ref(), collections::USERS, user_id).await?;
        Ok(match user {
            Some(user) => (user.effective_avatar().to_string(), user.title.clone()),
            None => ("default".to_string(), String::new()),
        })
    }

    /// Create a lobby and its chat; the caller becomes master.
    pub async fn create(&self, user_id: &str, req: CreateLobby) -> ServiceResult<String> {
        const TITLE: &str = "Create Lobby Error";

        if !req.settings.limit_is_valid() {
            return Err(ServiceError::precondition(
                "Player limit must be between 2 and 10",
                TITLE,
            ));
        }
        if req.name.trim().is_empty() || req.player_name.trim().is_empty() {
            return Err(ServiceError::precondition("Name is empty", TITLE));
        }

        let id = Uuid::new_v4().simple().to_string();
        let code = self.fresh_code().await?;
        let (avatar, title) = self.profile(user_id).await?;

        let lobby = LobbyDoc {
            id: id.clone(),
            name: req.name.clone(),
            lobby_code: code.clone(),
            status: LobbyStatus::Waiting,
            private: req.private,
            players: vec![LobbyPlayer {
                id: user_id.to_string(),
                name: req.player_name,
                role: Role::Master,
                gender: req.gender,
                avatar,
                title,
                joined_at: Utc::now(),
            }],
            spectators: Vec::new(),
            is_joining: Vec::new(),
            settings: req.settings,
            created_at: Utc::now(),
        };
        let chat = ChatDoc {
            id: id.clone(),
            name: req.name,
            chat_code: code,
            messages: Vec::new(),
        };

        self.store
            .insert(collections::LOBBIES, &id, store::to_doc(&lobby)?)
            .await?;
        self.store
            .insert(collections::CHATS, &id, store::to_doc(&chat)?)
            .await?;
        log::info!("lobby {id} created by {user_id}");
        Ok(id)
    }

    /// Resolve a lobby code and reserve a joining slot.
    pub async fn authenticate(&self, user_id: &str, lobby_code: &str) -> ServiceResult<String> {
        const TITLE: &str = "Join Lobby Error";

        let lobby = self
            .find_by_code(lobby_code)
            .await?
            .ok_or_else(|| ServiceError::not_found("No lobby with that code", TITLE))?;
        self.reserve_join(&lobby, user_id, TITLE).await?;
        Ok(lobby.id)
    }

    async fn reserve_join(
        &self,
        lobby: &LobbyDoc,
        user_id: &str,
        title: &str,
    ) -> ServiceResult<()> {
        if lobby.is_member(user_id) {
            return Err(ServiceError::precondition("Already in this lobby", title));
        }
        if lobby.is_joining(user_id) {
            return Err(ServiceError::precondition("Already joining", title));
        }
        if lobby.status != LobbyStatus::Waiting {
            return Err(ServiceError::precondition("Lobby is not open", title));
        }
        if lobby.occupancy() >= lobby.settings.player_limit {
            return Err(ServiceError::precondition("Lobby is full", title));
        }
        self.store
            .update(
                collections::LOBBIES,
                &lobby.id,
                Patch::new().push("isJoining", json!(user_id)),
            )
            .await?;
        Ok(())
    }

    /// Abandon a reserved joining slot.
    pub async fn leave_join(&self, user_id: &str, lobby_id: &str) -> ServiceResult<()> {
        const TITLE: &str = "Join Lobby Error";

        let lobby = self.load(lobby_id, TITLE).await?;
        if !lobby.is_joining(user_id) {
            return Err(ServiceError::precondition("Not joining this lobby", TITLE));
        }
        self.store
            .update(
                collections::LOBBIES,
                lobby_id,
                Patch::new().pull("isJoining", json!(user_id)),
            )
            .await?;
        Ok(())
    }

    /// Convert a joining slot into a seat (or the spectator bench).
    pub async fn join(
        &self,
        user_id: &str,
        lobby_id: &str,
        player_name: &str,
        gender: Gender,
        spectator: bool,
    ) -> ServiceResult<()> {
        const TITLE: &str = "Join Lobby Error";

        let lobby = self.load(lobby_id, TITLE).await?;
        if lobby.status != LobbyStatus::Waiting {
            return Err(ServiceError::precondition("Lobby is not open", TITLE));
        }
        if lobby.is_member(user_id) {
            return Err(ServiceError::precondition("Already in this lobby", TITLE));
        }
        if !lobby.is_joining(user_id) {
            return Err(ServiceError::precondition("Not joining this lobby", TITLE));
        }

        let (avatar, title) = self.profile(user_id).await?;
        let entry = LobbyPlayer {
            id: user_id.to_string(),
            name: player_name.to_string(),
            role: if spectator { Role::Spectator } else { Role::Player },
            gender,
            avatar,
            title,
            joined_at: Utc::now(),
        };

        let mut patch = Patch::new().pull("isJoining", json!(user_id));
        if spectator {
            patch = patch.push("spectators", store::to_doc(&entry)?);
        } else {
            patch = patch.push("players", store::to_doc(&entry)?);
            // The joiner's own entry just moves from isJoining to players,
            // so the occupancy read here already is the post-join one.
            if lobby.occupancy() >= lobby.settings.player_limit {
                patch = patch.set("status", store::to_doc(&LobbyStatus::Full)?);
            }
        }
        self.store
            .update(collections::LOBBIES, lobby_id, patch)
            .await?;
        log::info!("{user_id} joined lobby {lobby_id} (spectator: {spectator})");
        Ok(())
    }

    /// Remove a player or spectator; master only. Returns the kicked user so
    /// the caller can notify their socket.
    pub async fn kick(
        &self,
        lobby_id: &str,
        master_id: &str,
        target_id: &str,
    ) -> ServiceResult<String> {
        const TITLE: &str = "Kick Error";

        let lobby = self.load(lobby_id, TITLE).await?;
        if !lobby.is_master(master_id) {
            return Err(ServiceError::forbidden("Only the master can kick", TITLE));
        }
        if master_id == target_id {
            return Err(ServiceError::precondition("You can't kick yourself", TITLE));
        }
        if !lobby.is_member(target_id) {
            return Err(ServiceError::not_found("Player not found", TITLE));
        }

        let mut patch = Patch::new()
            .pull("players", json!({ "id": target_id }))
            .pull("spectators", json!({ "id": target_id }));
        if lobby.status == LobbyStatus::Full {
            patch = patch.set("status", store::to_doc(&LobbyStatus::Waiting)?);
        }
        self.store
            .update(collections::LOBBIES, lobby_id, patch)
            .await?;
        log::info!("{target_id} kicked from lobby {lobby_id}");
        Ok(target_id.to_string())
    }

    /// Snapshot the players, deal the hands and pyramid, and open the game.
    pub async fn start(&self, lobby_id: &str, master_id: &str) -> ServiceResult<String> {
        const TITLE: &str = "Start Game Error";

        let lobby = self.load(lobby_id, TITLE).await?;
        if !lobby.is_master(master_id) {
            return Err(ServiceError::forbidden(
                "Only the master can start the game",
                TITLE,
            ));
        }
        if lobby.status == LobbyStatus::Started {
            return Err(ServiceError::precondition("Game already started", TITLE));
        }
        if lobby.players.len() < 2 {
            return Err(ServiceError::precondition("Need at least 2 players", TITLE));
        }
        let pyramid_cards: usize = (1..=PYRAMID_ROWS).sum();
        if lobby.players.len() * HAND_SIZE + pyramid_cards > DOUBLE_DECK_SIZE {
            return Err(ServiceError::precondition(
                "Too many players for the deck",
                TITLE,
            ));
        }

        let game = build_game(&lobby);
        self.store
            .insert(collections::GAMES, lobby_id, store::to_doc(&game)?)
            .await?;
        self.store
            .update(
                collections::LOBBIES,
                lobby_id,
                Patch::new().set("status", store::to_doc(&LobbyStatus::Started)?),
            )
            .await?;
        log::info!(
            "game {lobby_id} started with {} players",
            game.players.len()
        );
        Ok(lobby_id.to_string())
    }

    /// Drop an invitation onto a friend's record.
    pub async fn invite(
        &self,
        user_id: &str,
        friend_id: &str,
        lobby_id: &str,
    ) -> ServiceResult<()> {
        const TITLE: &str = "Invite Error";

        let lobby = self.load(lobby_id, TITLE).await?;
        let inviter = lobby
            .player(user_id)
            .or_else(|| lobby.spectator(user_id))
            .ok_or_else(|| ServiceError::not_found("Player not found", TITLE))?;
        let friend: FriendDoc =
            store::read_as(self.store.as_ref(), collections::FRIENDS, friend_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("Friend not found", TITLE))?;
        if !friend.is_friend(user_id) {
            return Err(ServiceError::precondition("Not your friend", TITLE));
        }
        if friend.invitations.iter().any(|i| i.lobby_id == lobby_id) {
            return Err(ServiceError::precondition("Already invited", TITLE));
        }

        let invitation = Invitation {
            lobby_id: lobby_id.to_string(),
            player: inviter.name.clone(),
        };
        self.store
            .update(
                collections::FRIENDS,
                friend_id,
                Patch::new().push("invitations", store::to_doc(&invitation)?),
            )
            .await?;
        Ok(())
    }

    /// Accept an invitation, reserving a joining slot like `authenticate`.
    pub async fn accept_invitation(&self, user_id: &str, lobby_id: &str) -> ServiceResult<String> {
        const TITLE: &str = "Invite Error";

        self.take_invitation(user_id, lobby_id, TITLE).await?;
        let lobby = self.load(lobby_id, TITLE).await?;
        self.reserve_join(&lobby, user_id, TITLE).await?;
        Ok(lobby.id)
    }

    pub async fn decline_invitation(&self, user_id: &str, lobby_id: &str) -> ServiceResult<()> {
        self.take_invitation(user_id, lobby_id, "Invite Error").await
    }

    async fn take_invitation(
        &self,
        user_id: &str,
        lobby_id: &str,
        title: &str,
    ) -> ServiceResult<()> {
        let friend: FriendDoc =
            store::read_as(self.store.as_ref(), collections::FRIENDS, user_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("Friend record not found", title))?;
        if !friend.invitations.iter().any(|i| i.lobby_id == lobby_id) {
            return Err(ServiceError::precondition("No such invitation", title));
        }
        self.store
            .update(
                collections::FRIENDS,
                user_id,
                Patch::new().pull("invitations", json!({ "lobbyId": lobby_id })),
            )
            .await?;
        Ok(())
    }

    /// Leave the lobby. The last player tears the lobby down; a leaving
    /// master either hands off to the earliest-joined player
    /// (`settings.canInherit`) or tears the lobby down as well.
    pub async fn leave_lobby(&self, user_id: &str, lobby_id: &str) -> ServiceResult<LeaveOutcome> {
        const TITLE: &str = "Leave Lobby Error";

        let lobby = self.load(lobby_id, TITLE).await?;

        // Joiners and spectators never affect the master chain.
        if lobby.player(user_id).is_none() {
            if lobby.is_joining(user_id) || lobby.spectator(user_id).is_some() {
                self.pull_member(&lobby, user_id).await?;
                return Ok(LeaveOutcome::default());
            }
            return Err(ServiceError::not_found("Player not found", TITLE));
        }

        let is_last_player = lobby.players.len() == 1;
        if is_last_player {
            self.teardown(lobby_id).await?;
            return Ok(LeaveOutcome {
                deleted: true,
                new_master: None,
            });
        }

        if lobby.is_master(user_id) {
            if !lobby.settings.can_inherit {
                self.teardown(lobby_id).await?;
                return Ok(LeaveOutcome {
                    deleted: true,
                    new_master: None,
                });
            }
            let heir = lobby
                .earliest_joined_except(user_id)
                .ok_or_else(|| ServiceError::internal("No heir among players", TITLE))?;
            let heir_id = heir.id.clone();
            let heir_idx = lobby
                .players
                .iter()
                .position(|p| p.id == heir_id)
                .unwrap_or_default();
            let mut patch = Patch::new()
                .set(
                    format!("players.{heir_idx}.role"),
                    store::to_doc(&Role::Master)?,
                )
                .pull("players", json!({ "id": user_id }))
                .pull("isJoining", json!(user_id));
            if lobby.status == LobbyStatus::Full {
                patch = patch.set("status", store::to_doc(&LobbyStatus::Waiting)?);
            }
            self.store
                .update(collections::LOBBIES, lobby_id, patch)
                .await?;
            log::info!("{heir_id} inherited lobby {lobby_id} from {user_id}");
            return Ok(LeaveOutcome {
                deleted: false,
                new_master: Some(heir_id),
            });
        }

        self.pull_member(&lobby, user_id).await?;
        Ok(LeaveOutcome::default())
    }

    async fn pull_member(&self, lobby: &LobbyDoc, user_id: &str) -> ServiceResult<()> {
        let mut patch = Patch::new()
            .pull("players", json!({ "id": user_id }))
            .pull("spectators", json!({ "id": user_id }))
            .pull("isJoining", json!(user_id));
        if lobby.status == LobbyStatus::Full {
            patch = patch.set("status", store::to_doc(&LobbyStatus::Waiting)?);
        }
        self.store
            .update(collections::LOBBIES, &lobby.id, patch)
            .await?;
        Ok(())
    }

    /// Delete the lobby with its chat and (if started) its game.
    async fn teardown(&self, lobby_id: &str) -> ServiceResult<()> {
        self.store.delete(collections::LOBBIES, lobby_id).await?;
        let _ = self.store.delete(collections::CHATS, lobby_id).await;
        let _ = self.store.delete(collections::GAMES, lobby_id).await;
        log::info!("lobby {lobby_id} torn down");
        Ok(())
    }

    /// Public lobbies that are open and have room.
    pub async fn public_lobbies(&self) -> ServiceResult<Vec<LobbySummary>> {
        let docs = self.store.list(collections::LOBBIES).await?;
        let mut summaries = Vec::new();
        for value in docs {
            let lobby: LobbyDoc = serde_json::from_value(value)
                .map_err(|e| ServiceError::internal(e.to_string(), "Lobby Error"))?;
            if lobby.status == LobbyStatus::Waiting
                && !lobby.private
                && lobby.occupancy() < lobby.settings.player_limit
            {
                summaries.push(LobbySummary::from(&lobby));
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    pub async fn lobby_info(&self, lobby_id: &str) -> ServiceResult<LobbyDoc> {
        self.load(lobby_id, "Lobby Error").await
    }

    pub async fn is_master(&self, user_id: &str, lobby_id: &str) -> ServiceResult<bool> {
        let lobby = self.load(lobby_id, "Lobby Error").await?;
        Ok(lobby.is_master(user_id))
    }
}
