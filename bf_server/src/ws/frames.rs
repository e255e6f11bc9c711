//! Outbound frame types. Every server→client message is `{type, data}`.

use serde::Serialize;

use busfahrer::{
    account::AccountView,
    chat::ChatMessage,
    friend::{FriendRef, FriendTail, Invitation},
    game::{
        entities::Giving,
        models::{HandCard, LaidCard},
        views::{
            AvatarEntry, DrinkView, GameInfoView, NextPlayerView, Phase3TurnView, Phase3View,
            TurnInfoView,
        },
    },
    lobby::models::{LobbyPlayer, LobbySummary},
};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum OutboundFrame {
    AccountUpdate(AccountView),
    FriendUpdate(FriendUpdate),
    #[serde(rename_all = "camelCase")]
    InvitationUpdate { invitations: Vec<Invitation> },
    LobbiesUpdate(LobbiesUpdate),
    #[serde(rename_all = "camelCase")]
    LobbyUpdate {
        players: Vec<LobbyPlayer>,
        spectators: Vec<LobbyPlayer>,
    },
    #[serde(rename_all = "camelCase")]
    ChatUpdate { messages: Vec<ChatMessage> },
    #[serde(rename_all = "camelCase")]
    AvatarUpdate { players: Vec<AvatarEntry> },
    PlayerDrinkUpdate(DrinkView),
    #[serde(rename_all = "camelCase")]
    SettingUpdate { giving: Giving },
    #[serde(rename_all = "camelCase")]
    GameCardUpdate { cards: Vec<Vec<LaidCard>> },
    #[serde(rename_all = "camelCase")]
    PlayerCardUpdate { cards: Vec<HandCard> },
    TurnInfoUpdate(TurnFrame),
    GameInfoUpdate(GameInfoView),
    NextPlayerUpdate(NextPlayerView),
    Phase3Update(Phase3View),
    #[serde(rename_all = "camelCase")]
    BusfahrerUpdate { busfahrer_name: String },
    CloseUpdate,
    KickUpdate,
    #[serde(rename_all = "camelCase")]
    StartUpdate { game_id: String },
    #[serde(rename_all = "camelCase")]
    NewGameUpdate { lobby_id: String },
    #[serde(rename_all = "camelCase")]
    RoleUpdate { is_game_master: bool },
}

/// `turnInfoUpdate` carries the full view in phases 1 and 2 and a slimmed
/// one during the ride.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum TurnFrame {
    Full(TurnInfoView),
    Phase3(Phase3TurnView),
}

#[derive(Clone, Debug, Serialize)]
pub struct FriendUpdate {
    pub requests: Vec<FriendRef>,
    pub friends: Vec<FriendTail>,
}

/// Public lobby list actions: open lobbies are upserted, everything else
/// (full, private, started, deleted) is retracted by id.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum LobbiesUpdate {
    Upsert {
        action: LobbyAction,
        lobby: LobbySummary,
    },
    #[serde(rename_all = "camelCase")]
    Delete {
        action: LobbyAction,
        lobby_id: String,
    },
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LobbyAction {
    Insert,
    Update,
    Delete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_tag_and_data_shape() {
        let frame = OutboundFrame::StartUpdate {
            game_id: "g1".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "startUpdate");
        assert_eq!(json["data"]["gameId"], "g1");
    }

    #[test]
    fn test_lifecycle_frame_without_payload() {
        let json = serde_json::to_value(OutboundFrame::CloseUpdate).unwrap();
        assert_eq!(json["type"], "closeUpdate");
    }

    #[test]
    fn test_lobbies_delete_shape() {
        let frame = OutboundFrame::LobbiesUpdate(LobbiesUpdate::Delete {
            action: LobbyAction::Delete,
            lobby_id: "l1".to_string(),
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "lobbiesUpdate");
        assert_eq!(json["data"]["action"], "delete");
        assert_eq!(json["data"]["lobbyId"], "l1");
    }
}
