//! Card conservation across a whole game.
//!
//! The multiset of hands, table layout, and undealt deck must equal two
//! standard 52-card decks after every single command, for any player
//! count, shuffle, and turn mode.

use std::sync::Arc;

use proptest::prelude::*;

use busfahrer::{
    MemoryStore, Store,
    game::{
        GameService, GuessAction,
        constants::FINAL_RIDE_ROW,
        entities::{Gender, Shuffling, Suit, Turning},
        models::{GameDoc, GameStatus},
    },
    lobby::{CreateLobby, LobbyService, models::LobbySettings},
    store::{self, collections},
};

fn suit_index(suit: Suit) -> u8 {
    match suit {
        Suit::Hearts => 0,
        Suit::Diamonds => 1,
        Suit::Clubs => 2,
        Suit::Spades => 3,
    }
}

fn double_deck_multiset() -> Vec<(u8, u8)> {
    let mut cards = Vec::with_capacity(104);
    for _ in 0..2 {
        for number in 2u8..=14 {
            for suit in 0u8..4 {
                cards.push((number, suit));
            }
        }
    }
    cards.sort_unstable();
    cards
}

fn game_multiset(game: &GameDoc) -> Vec<(u8, u8)> {
    let mut cards = Vec::with_capacity(104);
    for player in &game.players {
        cards.extend(player.cards.iter().map(|c| (c.number, suit_index(c.suit))));
    }
    for row in &game.cards {
        cards.extend(row.iter().map(|c| (c.number, suit_index(c.suit))));
    }
    cards.extend(game.deck.iter().map(|c| (c.number, suit_index(c.suit))));
    cards.sort_unstable();
    cards
}

struct Harness {
    store: Arc<dyn Store>,
    game: GameService,
    game_id: String,
    master: String,
}

impl Harness {
    async fn reload(&self) -> GameDoc {
        store::read_as(self.store.as_ref(), collections::GAMES, &self.game_id)
            .await
            .unwrap()
            .unwrap()
    }

    async fn assert_conserved(&self, context: &str) {
        let game = self.reload().await;
        assert_eq!(
            game_multiset(&game),
            double_deck_multiset(),
            "conservation broken {context}"
        );
    }
}

async fn start_game(player_count: usize, shuffling: Shuffling, turning: Turning) -> Harness {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let lobby = Arc::new(LobbyService::new(store.clone()));
    let game = GameService::new(store.clone(), lobby.clone(), 0.3);

    let settings = LobbySettings {
        shuffling,
        turning,
        ..Default::default()
    };
    let lobby_id = lobby
        .create(
            "p0",
            CreateLobby {
                name: "conservation".to_string(),
                player_name: "P0".to_string(),
                private: true,
                gender: Gender::Other,
                settings,
            },
        )
        .await
        .unwrap();
    let code = lobby.lobby_info(&lobby_id).await.unwrap().lobby_code;
    for i in 1..player_count {
        let user = format!("p{i}");
        lobby.authenticate(&user, &code).await.unwrap();
        lobby
            .join(&user, &lobby_id, &user.to_uppercase(), Gender::Other, false)
            .await
            .unwrap();
    }
    let game_id = lobby.start(&lobby_id, "p0").await.unwrap();
    Harness {
        store,
        game,
        game_id,
        master: "p0".to_string(),
    }
}

/// Lay every currently legal card for `user`, re-reading after each lay
/// because phase-2 lays shrink the hand.
async fn lay_all_legal(h: &Harness, user: &str) {
    loop {
        let game = h.reload().await;
        let Some(player) = game.player(user) else { return };
        let legal = player.cards.iter().position(|c| {
            if c.played {
                return false;
            }
            match (game.status, game.game_info.round_nr) {
                (GameStatus::Phase1, round) => {
                    game.game_info.is_row_flipped
                        && game.cards[(round - 1) as usize]
                            .iter()
                            .any(|laid| game.settings.matching.matches(c.card(), laid.card()))
                }
                (GameStatus::Phase2, 1) => (2..=10).contains(&c.number),
                (GameStatus::Phase2, 2) => (11..=13).contains(&c.number),
                (GameStatus::Phase2, 3) => c.number == 14,
                _ => false,
            }
        });
        let Some(idx) = legal else { return };
        h.game.lay_card(&h.game_id, user, idx).await.unwrap();
        h.assert_conserved("after lay").await;
    }
}

async fn drive_game(player_count: usize, shuffling: Shuffling, turning: Turning) {
    let h = start_game(player_count, shuffling, turning).await;
    h.assert_conserved("at start").await;

    // Phase 1: five pyramid rounds.
    for round in 1..=5u32 {
        h.game
            .flip_row(&h.game_id, &h.master, round)
            .await
            .unwrap();
        h.assert_conserved("after flip").await;
        loop {
            let game = h.reload().await;
            if game.game_info.round_nr != round {
                break;
            }
            let active = game.active_player.clone().unwrap();
            lay_all_legal(&h, &active).await;
            h.game.next_player(&h.game_id, &active).await.unwrap();
        }
    }
    h.game.next_player(&h.game_id, &h.master).await.unwrap();
    h.assert_conserved("entering phase 2").await;

    // Phase 2 round 1 rotates; rounds 2 and 3 are simultaneous.
    loop {
        let game = h.reload().await;
        if game.status != GameStatus::Phase2 || game.game_info.round_nr != 1 {
            break;
        }
        let active = game.active_player.clone().unwrap();
        lay_all_legal(&h, &active).await;
        h.game.next_player(&h.game_id, &active).await.unwrap();
    }
    loop {
        let game = h.reload().await;
        if game.game_info.next_phase_enabled {
            break;
        }
        let holder = game
            .players
            .iter()
            .find(|p| {
                p.cards.iter().any(|c| {
                    !c.played
                        && match game.game_info.round_nr {
                            2 => (11..=13).contains(&c.number),
                            _ => c.number == 14,
                        }
                })
            })
            .map(|p| p.id.clone())
            .expect("someone must hold a card of the running round");
        lay_all_legal(&h, &holder).await;
    }
    h.game.next_player(&h.game_id, &h.master).await.unwrap();
    h.assert_conserved("entering phase 3").await;

    // Phase 3: ride the pyramid to the top with informed guesses.
    loop {
        let game = h.reload().await;
        if game.game_info.game_over {
            break;
        }
        let row = game.game_info.current_row;
        let driver = game.game_info.busfahrer[0].clone();
        let col = game.cards[row]
            .iter()
            .position(|c| !c.flipped)
            .expect("current row has an unflipped card");
        let target = game.cards[row][col].number;
        let action = if row == FINAL_RIDE_ROW {
            let seed = game.cards[FINAL_RIDE_ROW][0].number;
            if target == seed {
                GuessAction::Equal
            } else {
                GuessAction::Unequal
            }
        } else {
            let last = game.game_info.last_card.unwrap().number;
            if target > last {
                GuessAction::Higher
            } else if target < last {
                GuessAction::Lower
            } else {
                GuessAction::Same
            }
        };
        h.game
            .card_action(&h.game_id, &driver, &format!("{row}-{col}"), action, None)
            .await
            .unwrap();
        h.assert_conserved("after guess").await;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_card_conservation(
        player_count in 2usize..=8,
        shuffling in prop_oneof![
            Just(Shuffling::FisherYates),
            Just(Shuffling::Caotic),
            Just(Shuffling::Riffle),
        ],
        turning in prop_oneof![
            Just(Turning::Default),
            Just(Turning::Reverse),
            Just(Turning::Random),
        ],
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(drive_game(player_count, shuffling, turning));
    }
}
