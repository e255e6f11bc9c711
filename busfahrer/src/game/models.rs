//! Game document model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::lobby::models::{LobbyPlayer, LobbySettings};

use super::entities::{Card, Gender, Role, Suit};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GameStatus {
    Phase1,
    Phase2,
    Phase3,
    Finished,
}

/// A card in a player's hand.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct HandCard {
    pub number: u8,
    pub suit: Suit,
    pub played: bool,
}

impl HandCard {
    pub fn new(card: Card) -> Self {
        Self {
            number: card.number,
            suit: card.suit,
            played: false,
        }
    }

    pub fn card(&self) -> Card {
        Card::new(self.number, self.suit)
    }
}

/// A card in the table layout.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct LaidCard {
    pub number: u8,
    pub suit: Suit,
    pub flipped: bool,
}

impl LaidCard {
    pub fn face_down(card: Card) -> Self {
        Self {
            number: card.number,
            suit: card.suit,
            flipped: false,
        }
    }

    pub fn card(&self) -> Card {
        Card::new(self.number, self.suit)
    }
}

/// Per-round turn bookkeeping. `drinks_per_player` is the number of drinks
/// currently assigned TO this player for the running round.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInfo {
    pub had_turn: bool,
    pub drinks_per_player: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GamePlayer {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub gender: Gender,
    pub avatar: String,
    pub title: String,
    pub cards: Vec<HandCard>,
    pub turn_info: TurnInfo,
}

impl GamePlayer {
    pub fn unplayed_count(&self) -> usize {
        self.cards.iter().filter(|c| !c.played).count()
    }

    /// Whether the hand still holds an unplayed card with one of `numbers`.
    pub fn holds_any(&self, numbers: &[u8]) -> bool {
        self.cards
            .iter()
            .any(|c| !c.played && numbers.contains(&c.number))
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrinksPerType {
    pub jack: u32,
    pub queen: u32,
    pub king: u32,
}

impl DrinksPerType {
    /// Drinks a player of `gender` receives once the face-card round ends.
    pub fn for_gender(&self, gender: Gender) -> u32 {
        match gender {
            Gender::Male => self.jack + self.king,
            Gender::Female => self.queen + self.king,
            Gender::Other => self.jack + self.queen + self.king,
        }
    }
}

/// Phase-dependent game state. One flat struct so dotted field paths stay
/// stable across phases; fields outside the current phase keep their reset
/// values.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub round_nr: u32,
    pub drinks_per_round: u32,
    pub is_row_flipped: bool,
    pub next_phase_enabled: bool,
    pub drinks_per_type: DrinksPerType,
    pub has_to_down: HashMap<String, u32>,
    pub busfahrer: Vec<String>,
    pub current_row: usize,
    pub last_card: Option<Card>,
    pub drinks_per_try: u32,
    pub try_over: bool,
    pub game_over: bool,
}

/// Per-player counters accumulated during one game and folded into the user
/// statistics when the ride is won.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameStats {
    pub drinks_given: i64,
    pub drinks_received: i64,
    pub cards_played: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDoc {
    pub id: String,
    pub status: GameStatus,
    pub settings: LobbySettings,
    pub players: Vec<GamePlayer>,
    pub spectators: Vec<LobbyPlayer>,
    pub cards: Vec<Vec<LaidCard>>,
    pub deck: Vec<Card>,
    pub game_info: GameInfo,
    pub active_player: Option<String>,
    pub turn_order: Vec<String>,
    pub statistics: HashMap<String, GameStats>,
}

impl GameDoc {
    pub fn player(&self, user_id: &str) -> Option<&GamePlayer> {
        self.players.iter().find(|p| p.id == user_id)
    }

    pub fn player_index(&self, user_id: &str) -> Option<usize> {
        self.players.iter().position(|p| p.id == user_id)
    }

    pub fn master(&self) -> Option<&GamePlayer> {
        self.players.iter().find(|p| p.role == Role::Master)
    }

    pub fn is_master(&self, user_id: &str) -> bool {
        self.master().is_some_and(|m| m.id == user_id)
    }

    pub fn is_active_player(&self, user_id: &str) -> bool {
        self.active_player.as_deref() == Some(user_id)
    }

    pub fn is_busfahrer(&self, user_id: &str) -> bool {
        self.game_info.busfahrer.iter().any(|id| id == user_id)
    }

    pub fn all_had_turn(&self) -> bool {
        self.players.iter().all(|p| p.turn_info.had_turn)
    }

    /// Total drinks the active player has assigned this round.
    pub fn assigned_drinks(&self) -> u32 {
        self.players
            .iter()
            .map(|p| p.turn_info.drinks_per_player)
            .sum()
    }
}
