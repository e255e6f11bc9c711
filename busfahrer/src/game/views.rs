//! Derived per-subscriber views of a game document.
//!
//! The fan-out dispatcher and the GET endpoints build their payloads from
//! the same functions so both surfaces always agree.

use serde::Serialize;

use super::{
    entities::Giving,
    models::{GameDoc, GamePlayer, GameStatus, HandCard},
};

/// One avatar rail entry. `drinks_per_player` is what the player currently
/// has to drink this round.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarEntry {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub title: String,
    pub drinks_per_player: u32,
    pub active: bool,
}

pub fn avatar_players(game: &GameDoc) -> Vec<AvatarEntry> {
    game.players
        .iter()
        .map(|p| AvatarEntry {
            id: p.id.clone(),
            name: p.name.clone(),
            avatar: p.avatar.clone(),
            title: p.title.clone(),
            drinks_per_player: p.turn_info.drinks_per_player,
            active: game.is_active_player(&p.id),
        })
        .collect()
}

/// The Avatar-mode distribution gate for the active player.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrinkView {
    pub given: bool,
    pub can_up: bool,
    pub can_down: bool,
}

pub fn drink_view(game: &GameDoc) -> DrinkView {
    let total = game.assigned_drinks();
    let owed = game.game_info.drinks_per_round;
    DrinkView {
        given: total >= owed,
        can_up: total < owed,
        can_down: total > 0,
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInfoView {
    pub drinks_received: u32,
    pub is_game_master: bool,
    pub is_current_player: bool,
    pub next_phase_enabled: bool,
    pub next_player_enabled: bool,
}

/// Drinks the player owes right now, phase- and round-dependent.
fn drinks_received(game: &GameDoc, player: &GamePlayer) -> u32 {
    match game.status {
        GameStatus::Phase1 => player.turn_info.drinks_per_player,
        GameStatus::Phase2 => match game.game_info.round_nr {
            1 if game.is_active_player(&player.id) => game.game_info.drinks_per_round,
            2 | 3 => {
                let downs = game
                    .game_info
                    .has_to_down
                    .get(&player.id)
                    .copied()
                    .unwrap_or(0);
                player.turn_info.drinks_per_player + downs
            }
            _ => 0,
        },
        GameStatus::Phase3 if game.is_busfahrer(&player.id) => game.game_info.drinks_per_try,
        _ => 0,
    }
}

/// Whether the player may end their turn right now.
fn next_player_enabled(game: &GameDoc, player: &GamePlayer) -> bool {
    if !game.is_active_player(&player.id) || game.game_info.next_phase_enabled {
        return false;
    }
    match game.status {
        GameStatus::Phase1 => {
            game.game_info.is_row_flipped
                && (game.settings.giving != Giving::Avatar
                    || game.assigned_drinks() >= game.game_info.drinks_per_round)
        }
        GameStatus::Phase2 => game.game_info.round_nr == 1,
        _ => false,
    }
}

pub fn turn_info(game: &GameDoc, user_id: &str) -> Option<TurnInfoView> {
    let player = game.player(user_id)?;
    Some(TurnInfoView {
        drinks_received: drinks_received(game, player),
        is_game_master: game.is_master(user_id),
        is_current_player: game.is_active_player(user_id),
        next_phase_enabled: game.game_info.next_phase_enabled,
        next_player_enabled: next_player_enabled(game, player),
    })
}

/// The slimmed phase-3 variant of the per-user turn frame.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase3TurnView {
    pub is_game_master: bool,
    pub is_current_player: bool,
}

pub fn phase3_turn_info(game: &GameDoc, user_id: &str) -> Phase3TurnView {
    Phase3TurnView {
        is_game_master: game.is_master(user_id),
        is_current_player: game.is_active_player(user_id),
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfoView {
    pub player_row: u32,
    pub drink_row: u32,
    pub phase: GameStatus,
}

pub fn game_info(game: &GameDoc) -> GameInfoView {
    GameInfoView {
        player_row: game.game_info.round_nr,
        drink_row: game.game_info.drinks_per_round,
        phase: game.status,
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextPlayerView {
    pub next_phase_enabled: bool,
    pub next_player_enabled: bool,
    pub is_current_player: bool,
}

pub fn next_player_view(game: &GameDoc, user_id: &str) -> NextPlayerView {
    let enabled = game
        .player(user_id)
        .is_some_and(|p| next_player_enabled(game, p));
    NextPlayerView {
        next_phase_enabled: game.game_info.next_phase_enabled,
        next_player_enabled: enabled,
        is_current_player: game.is_active_player(user_id),
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase3View {
    pub current_row: usize,
    pub try_over: bool,
    pub game_over: bool,
}

pub fn phase3_view(game: &GameDoc) -> Phase3View {
    Phase3View {
        current_row: game.game_info.current_row,
        try_over: game.game_info.try_over,
        game_over: game.game_info.game_over,
    }
}

/// The elected drivers' names, joined for the banner.
pub fn busfahrer_name(game: &GameDoc) -> String {
    game.game_info
        .busfahrer
        .iter()
        .filter_map(|id| game.player(id))
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(" & ")
}

pub fn player_cards(game: &GameDoc, user_id: &str) -> Vec<HandCard> {
    game.player(user_id)
        .map(|p| p.cards.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entities::{Gender, Role};
    use crate::game::models::{GameInfo, TurnInfo};
    use crate::lobby::models::LobbySettings;
    use std::collections::HashMap;

    fn player(id: &str, drinks: u32) -> GamePlayer {
        GamePlayer {
            id: id.to_string(),
            name: id.to_uppercase(),
            role: if id == "a" { Role::Master } else { Role::Player },
            gender: Gender::Other,
            avatar: "default".to_string(),
            title: String::new(),
            cards: Vec::new(),
            turn_info: TurnInfo {
                had_turn: false,
                drinks_per_player: drinks,
            },
        }
    }

    fn game() -> GameDoc {
        GameDoc {
            id: "g".to_string(),
            status: GameStatus::Phase1,
            settings: LobbySettings {
                giving: Giving::Avatar,
                ..Default::default()
            },
            players: vec![player("a", 0), player("b", 2), player("c", 1)],
            spectators: Vec::new(),
            cards: Vec::new(),
            deck: Vec::new(),
            game_info: GameInfo {
                round_nr: 2,
                drinks_per_round: 3,
                is_row_flipped: true,
                ..Default::default()
            },
            active_player: Some("a".to_string()),
            turn_order: vec!["a".into(), "b".into(), "c".into()],
            statistics: HashMap::new(),
        }
    }

    #[test]
    fn test_drink_view_gate() {
        let mut game = game();
        let view = drink_view(&game);
        assert!(view.given, "3 of 3 drinks are out");
        assert!(!view.can_up);
        assert!(view.can_down);

        game.players[1].turn_info.drinks_per_player = 1;
        let view = drink_view(&game);
        assert!(!view.given);
        assert!(view.can_up);
    }

    #[test]
    fn test_turn_info_gates_on_distribution() {
        let mut game = game();
        let view = turn_info(&game, "a").unwrap();
        assert!(view.is_game_master);
        assert!(view.is_current_player);
        assert!(view.next_player_enabled);

        game.players[1].turn_info.drinks_per_player = 0;
        let view = turn_info(&game, "a").unwrap();
        assert!(!view.next_player_enabled, "undistributed drinks block the turn");
    }

    #[test]
    fn test_busfahrer_name_joins() {
        let mut game = game();
        game.game_info.busfahrer = vec!["a".to_string(), "c".to_string()];
        assert_eq!(busfahrer_name(&game), "A & C");
    }

    #[test]
    fn test_phase3_drinks_only_for_driver() {
        let mut game = game();
        game.status = GameStatus::Phase3;
        game.game_info.busfahrer = vec!["b".to_string()];
        game.game_info.drinks_per_try = 4;
        assert_eq!(drinks_received(&game, &game.players[1]), 4);
        assert_eq!(drinks_received(&game, &game.players[0]), 0);
    }
}
