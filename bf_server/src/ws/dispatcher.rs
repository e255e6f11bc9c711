//! Fan-out dispatcher: turns store change events into per-subscriber
//! frames.
//!
//! The dispatcher consumes the change feed in emission order, reloads the
//! fresh document, classifies the changed field paths against a fixed
//! rule table per scope, and pushes the matching frames through the
//! connection registry. Per-socket send failures are swallowed; the
//! heartbeat reaps dead sockets.

use busfahrer::{
    account::UserDoc,
    chat::ChatDoc,
    friend::FriendDoc,
    game::{GameDoc, GameStatus, views},
    lobby::models::{LobbyDoc, LobbyStatus, LobbySummary},
    store::{self, ChangeEvent, OpType, collections},
};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};

use crate::api::AppState;

use super::frames::{FriendUpdate, LobbiesUpdate, LobbyAction, OutboundFrame, TurnFrame};

/// Spawn the dispatcher loop on the store's change feed.
pub fn spawn(state: AppState) -> JoinHandle<()> {
    let mut feed = state.store.watch();
    tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(event) => {
                    if let Err(err) = dispatch(&state, event).await {
                        tracing::warn!("dispatch failed: {err}");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("change feed lagged, {missed} events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn dispatch(state: &AppState, event: ChangeEvent) -> Result<(), busfahrer::ServiceError> {
    match event.collection.as_str() {
        collections::USERS => dispatch_user(state, &event).await,
        collections::FRIENDS => dispatch_friend(state, &event).await,
        collections::LOBBIES => dispatch_lobby(state, &event).await,
        collections::CHATS => dispatch_chat(state, &event).await,
        collections::GAMES => dispatch_game(state, &event).await,
        _ => Ok(()),
    }
}

/// Segment-wise prefix test: `players` matches `players` and `players.3.x`
/// but not `playersOther`.
fn path_starts(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

/// For `players.N....` paths, the player index and the remainder.
fn player_subpath(path: &str) -> Option<(usize, &str)> {
    let rest = path.strip_prefix("players.")?;
    match rest.split_once('.') {
        Some((idx, tail)) => Some((idx.parse().ok()?, tail)),
        None => Some((rest.parse().ok()?, "")),
    }
}

async fn dispatch_user(state: &AppState, event: &ChangeEvent) -> Result<(), busfahrer::ServiceError> {
    let relevant = event.updated_fields.iter().any(|f| {
        path_starts(f, "statistics") || path_starts(f, "titles") || f == "uploadedAvatar"
    });
    if !relevant {
        return Ok(());
    }
    let Some(user): Option<UserDoc> =
        store::read_as(state.store.as_ref(), collections::USERS, &event.id).await?
    else {
        return Ok(());
    };
    state
        .registry
        .send_user(&event.id, OutboundFrame::AccountUpdate((&user).into()));
    Ok(())
}

async fn dispatch_friend(
    state: &AppState,
    event: &ChangeEvent,
) -> Result<(), busfahrer::ServiceError> {
    let fields = &event.updated_fields;
    let friend_change = fields
        .iter()
        .any(|f| path_starts(f, "pendingRequests") || path_starts(f, "friends"));
    let invitation_change = fields.iter().any(|f| path_starts(f, "invitations"));
    if !friend_change && !invitation_change {
        return Ok(());
    }

    let Some(doc): Option<FriendDoc> =
        store::read_as(state.store.as_ref(), collections::FRIENDS, &event.id).await?
    else {
        return Ok(());
    };
    if friend_change {
        state.registry.send_friend(
            &event.id,
            OutboundFrame::FriendUpdate(FriendUpdate {
                requests: doc.pending_requests.clone(),
                friends: doc.friends.iter().map(Into::into).collect(),
            }),
        );
    }
    if invitation_change {
        state.registry.send_friend(
            &event.id,
            OutboundFrame::InvitationUpdate {
                invitations: doc.invitations.clone(),
            },
        );
    }
    Ok(())
}

async fn dispatch_lobby(
    state: &AppState,
    event: &ChangeEvent,
) -> Result<(), busfahrer::ServiceError> {
    if event.op == OpType::Delete {
        state
            .registry
            .broadcast_lobbies(OutboundFrame::LobbiesUpdate(LobbiesUpdate::Delete {
                action: LobbyAction::Delete,
                lobby_id: event.id.clone(),
            }));
        return Ok(());
    }

    let Some(lobby): Option<LobbyDoc> =
        store::read_as(state.store.as_ref(), collections::LOBBIES, &event.id).await?
    else {
        return Ok(());
    };

    // Public list: open lobbies are upserted, everything else retracted.
    if !lobby.private {
        let listable = lobby.status == LobbyStatus::Waiting
            && lobby.occupancy() < lobby.settings.player_limit;
        let frame = if listable {
            LobbiesUpdate::Upsert {
                action: match event.op {
                    OpType::Insert => LobbyAction::Insert,
                    _ => LobbyAction::Update,
                },
                lobby: LobbySummary::from(&lobby),
            }
        } else {
            LobbiesUpdate::Delete {
                action: LobbyAction::Delete,
                lobby_id: event.id.clone(),
            }
        };
        state
            .registry
            .broadcast_lobbies(OutboundFrame::LobbiesUpdate(frame));
    }

    let membership_change = event
        .updated_fields
        .iter()
        .any(|f| path_starts(f, "players") || path_starts(f, "spectators"));
    if membership_change {
        state.registry.broadcast_lobby(
            &event.id,
            OutboundFrame::LobbyUpdate {
                players: lobby.players.clone(),
                spectators: lobby.spectators.clone(),
            },
        );
    }
    Ok(())
}

async fn dispatch_chat(state: &AppState, event: &ChangeEvent) -> Result<(), busfahrer::ServiceError> {
    if !event
        .updated_fields
        .iter()
        .any(|f| path_starts(f, "messages"))
    {
        return Ok(());
    }
    let Some(chat): Option<ChatDoc> =
        store::read_as(state.store.as_ref(), collections::CHATS, &event.id).await?
    else {
        return Ok(());
    };
    state.registry.broadcast_chat(
        &event.id,
        OutboundFrame::ChatUpdate {
            messages: chat.tail().to_vec(),
        },
    );
    Ok(())
}

async fn dispatch_game(state: &AppState, event: &ChangeEvent) -> Result<(), busfahrer::ServiceError> {
    if event.op == OpType::Delete {
        // Deletion frames (newGameUpdate / closeUpdate) are pushed by the
        // command that deleted the document.
        return Ok(());
    }
    let Some(game): Option<GameDoc> =
        store::read_as(state.store.as_ref(), collections::GAMES, &event.id).await?
    else {
        return Ok(());
    };

    let game_id = &event.id;
    let fields = &event.updated_fields;
    let phase3 = game.status == GameStatus::Phase3;
    let registry = &state.registry;

    // Avatar rail: player membership/profile changes or the turn marker.
    let avatar_change = fields.iter().any(|f| {
        f == "activePlayer"
            || (path_starts(f, "players")
                && player_subpath(f)
                    .is_none_or(|(_, tail)| !path_starts(tail, "turnInfo") && !path_starts(tail, "cards")))
    });
    if avatar_change {
        registry.broadcast_game(
            game_id,
            OutboundFrame::AvatarUpdate {
                players: views::avatar_players(&game),
            },
        );
    }

    // Distribution gate, active player only.
    let drink_change = fields.iter().any(|f| {
        player_subpath(f).is_some_and(|(_, tail)| tail == "turnInfo.drinksPerPlayer")
    });
    if drink_change
        && game.status == GameStatus::Phase1
        && let Some(active) = game.active_player.as_deref()
    {
        registry.send_game_user(
            game_id,
            active,
            OutboundFrame::PlayerDrinkUpdate(views::drink_view(&game)),
        );
    }

    if fields.iter().any(|f| path_starts(f, "settings")) {
        registry.broadcast_game(
            game_id,
            OutboundFrame::SettingUpdate {
                giving: game.settings.giving,
            },
        );
    }

    // Table layout.
    let layout_change = fields
        .iter()
        .any(|f| (path_starts(f, "cards") && !path_starts(f, "players")) || f == "status");
    if layout_change {
        registry.broadcast_game(
            game_id,
            OutboundFrame::GameCardUpdate {
                cards: game.cards.clone(),
            },
        );
    }

    // Hands, each to its owner.
    if !phase3 {
        let mut notified: Vec<usize> = Vec::new();
        for field in fields {
            if let Some((idx, tail)) = player_subpath(field)
                && path_starts(tail, "cards")
                && !notified.contains(&idx)
                && let Some(player) = game.players.get(idx)
            {
                notified.push(idx);
                registry.send_game_user(
                    game_id,
                    &player.id,
                    OutboundFrame::PlayerCardUpdate {
                        cards: player.cards.clone(),
                    },
                );
            }
        }
    }

    // Per-user turn state.
    let turn_change = fields.iter().any(|f| {
        f == "activePlayer"
            || player_subpath(f).is_some_and(|(_, tail)| path_starts(tail, "turnInfo"))
    });
    if turn_change {
        for user_id in registry.game_subscribers(game_id) {
            let frame = if phase3 {
                TurnFrame::Phase3(views::phase3_turn_info(&game, &user_id))
            } else {
                match views::turn_info(&game, &user_id) {
                    Some(view) => TurnFrame::Full(view),
                    None => continue, // spectators carry no turn state
                }
            };
            registry.send_game_user(game_id, &user_id, OutboundFrame::TurnInfoUpdate(frame));
        }
    }

    // Round/phase counters.
    let info_change = fields
        .iter()
        .any(|f| path_starts(f, "gameInfo") || f == "status");
    if info_change {
        registry.broadcast_game(
            game_id,
            OutboundFrame::GameInfoUpdate(views::game_info(&game)),
        );
        for user_id in registry.game_subscribers(game_id) {
            registry.send_game_user(
                game_id,
                &user_id,
                OutboundFrame::NextPlayerUpdate(views::next_player_view(&game, &user_id)),
            );
        }
        if phase3 {
            registry.broadcast_game(
                game_id,
                OutboundFrame::Phase3Update(views::phase3_view(&game)),
            );
        }
    }

    // Driver banner, once the election can exist.
    let busfahrer_change = fields
        .iter()
        .any(|f| path_starts(f, "gameInfo.busfahrer") || f == "status");
    if busfahrer_change && game.status != GameStatus::Phase1 {
        registry.broadcast_game(
            game_id,
            OutboundFrame::BusfahrerUpdate {
                busfahrer_name: views::busfahrer_name(&game),
            },
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_starts_is_segment_wise() {
        assert!(path_starts("players", "players"));
        assert!(path_starts("players.3.role", "players"));
        assert!(!path_starts("playersOther", "players"));
        assert!(!path_starts("gameInfo.busfahrerName", "gameInfo.busfahrer"));
        assert!(path_starts("gameInfo.busfahrer.0", "gameInfo.busfahrer"));
    }

    #[test]
    fn test_player_subpath() {
        assert_eq!(
            player_subpath("players.3.turnInfo.hadTurn"),
            Some((3, "turnInfo.hadTurn"))
        );
        assert_eq!(player_subpath("players.0"), Some((0, "")));
        assert_eq!(player_subpath("players"), None);
        assert_eq!(player_subpath("gameInfo.roundNr"), None);
    }
}
