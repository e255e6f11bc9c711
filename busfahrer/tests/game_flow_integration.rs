//! Integration tests for the three-phase game engine, driven against
//! crafted game documents in the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use busfahrer::{
    MemoryStore, Store,
    account::AccountService,
    game::{
        GameService, GuessAction,
        entities::{Card, Gender, Giving, Role, Suit},
        models::{
            GameDoc, GameInfo, GamePlayer, GameStats, GameStatus, HandCard, LaidCard, TurnInfo,
        },
    },
    lobby::{LobbyService, models::LobbySettings},
    store::{self, collections},
};

struct Fixture {
    store: Arc<dyn Store>,
    game: GameService,
    accounts: AccountService,
}

fn setup() -> Fixture {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let lobby = Arc::new(LobbyService::new(store.clone()));
    Fixture {
        game: GameService::new(store.clone(), lobby, 0.0),
        accounts: AccountService::new(store.clone()),
        store,
    }
}

fn hand(cards: &[(u8, Suit)]) -> Vec<HandCard> {
    cards
        .iter()
        .map(|&(number, suit)| HandCard {
            number,
            suit,
            played: false,
        })
        .collect()
}

fn row(cards: &[(u8, Suit)]) -> Vec<LaidCard> {
    cards
        .iter()
        .map(|&(number, suit)| LaidCard {
            number,
            suit,
            flipped: false,
        })
        .collect()
}

fn player(id: &str, gender: Gender, role: Role, cards: Vec<HandCard>) -> GamePlayer {
    GamePlayer {
        id: id.to_string(),
        name: id.to_uppercase(),
        role,
        gender,
        avatar: "default".to_string(),
        title: String::new(),
        cards,
        turn_info: TurnInfo::default(),
    }
}

/// A three-player game: a is the master and active player.
fn base_game(settings: LobbySettings, hands: [Vec<HandCard>; 3]) -> GameDoc {
    let [a, b, c] = hands;
    let players = vec![
        player("a", Gender::Male, Role::Master, a),
        player("b", Gender::Female, Role::Player, b),
        player("c", Gender::Other, Role::Player, c),
    ];
    let statistics: HashMap<String, GameStats> = players
        .iter()
        .map(|p| (p.id.clone(), GameStats::default()))
        .collect();
    GameDoc {
        id: "g1".to_string(),
        status: GameStatus::Phase1,
        settings,
        turn_order: players.iter().map(|p| p.id.clone()).collect(),
        active_player: Some("a".to_string()),
        players,
        spectators: Vec::new(),
        cards: Vec::new(),
        deck: Vec::new(),
        game_info: GameInfo {
            round_nr: 1,
            ..Default::default()
        },
        statistics,
    }
}

async fn install(fixture: &Fixture, game: &GameDoc) {
    fixture
        .store
        .insert(collections::GAMES, &game.id, store::to_doc(game).unwrap())
        .await
        .unwrap();
}

async fn reload(fixture: &Fixture) -> GameDoc {
    store::read_as(fixture.store.as_ref(), collections::GAMES, "g1")
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_phase1_happy_path_round() {
    let fixture = setup();
    let mut game = base_game(
        LobbySettings::default(),
        [
            hand(&[(5, Suit::Hearts), (9, Suit::Clubs)]),
            hand(&[(2, Suit::Spades)]),
            hand(&[(3, Suit::Spades)]),
        ],
    );
    game.cards = vec![row(&[(5, Suit::Spades)])];
    install(&fixture, &game).await;

    // Laying before the flip violates the row gate.
    let err = fixture.game.lay_card("g1", "a", 0).await.unwrap_err();
    assert_eq!(err.status(), 400);

    fixture.game.flip_row("g1", "a", 1).await.unwrap();
    let err = fixture.game.flip_row("g1", "a", 1).await.unwrap_err();
    assert_eq!(err.status(), 400, "row flips are monotonic");

    fixture.game.lay_card("g1", "a", 0).await.unwrap();
    let game = reload(&fixture).await;
    assert!(game.players[0].cards[0].played);
    assert_eq!(game.game_info.drinks_per_round, 1);

    // The 9 does not match the 5 under number-only matching.
    let err = fixture.game.lay_card("g1", "a", 1).await.unwrap_err();
    assert_eq!(err.status(), 400);

    fixture.game.next_player("g1", "a").await.unwrap();
    let game = reload(&fixture).await;
    assert_eq!(game.active_player.as_deref(), Some("b"));
    assert!(game.players[0].turn_info.had_turn);
}

#[tokio::test]
async fn test_phase1_turn_authority() {
    let fixture = setup();
    let mut game = base_game(
        LobbySettings::default(),
        [hand(&[(5, Suit::Hearts)]), hand(&[(5, Suit::Clubs)]), hand(&[])],
    );
    game.cards = vec![row(&[(5, Suit::Spades)])];
    game.game_info.is_row_flipped = true;
    for card in &mut game.cards[0] {
        card.flipped = true;
    }
    install(&fixture, &game).await;

    let err = fixture.game.lay_card("g1", "b", 0).await.unwrap_err();
    assert_eq!(err.status(), 403, "not b's turn");
    let err = fixture.game.flip_row("g1", "b", 1).await.unwrap_err();
    assert_eq!(err.status(), 403, "only the master flips");
    let err = fixture.game.next_player("g1", "ghost").await.unwrap_err();
    assert_eq!(err.status(), 404);
}

#[tokio::test]
async fn test_phase1_round_rotation_resets_state() {
    let fixture = setup();
    let mut game = base_game(
        LobbySettings::default(),
        [hand(&[]), hand(&[]), hand(&[])],
    );
    game.cards = vec![row(&[(5, Suit::Spades)]), row(&[(6, Suit::Spades), (7, Suit::Clubs)])];
    install(&fixture, &game).await;

    fixture.game.flip_row("g1", "a", 1).await.unwrap();
    for user in ["a", "b", "c"] {
        fixture.game.next_player("g1", user).await.unwrap();
    }

    let game = reload(&fixture).await;
    assert_eq!(game.game_info.round_nr, 2);
    assert_eq!(game.game_info.drinks_per_round, 0);
    assert!(!game.game_info.is_row_flipped);
    assert!(game.players.iter().all(|p| !p.turn_info.had_turn));
    assert_eq!(game.active_player.as_deref(), Some("a"));
}

#[tokio::test]
async fn test_avatar_distribution_gate() {
    let fixture = setup();
    let settings = LobbySettings {
        giving: Giving::Avatar,
        ..Default::default()
    };
    let mut game = base_game(settings, [hand(&[]), hand(&[]), hand(&[])]);
    game.cards = vec![row(&[(5, Suit::Spades)])];
    game.game_info.is_row_flipped = true;
    game.game_info.drinks_per_round = 3;
    install(&fixture, &game).await;

    fixture.game.give_drink("g1", "a", "b", true).await.unwrap();
    fixture.game.give_drink("g1", "a", "b", true).await.unwrap();

    // total == 2 < 3 still blocks the turn.
    let err = fixture.game.next_player("g1", "a").await.unwrap_err();
    assert_eq!(err.status(), 400);

    fixture.game.give_drink("g1", "a", "c", true).await.unwrap();
    let game = reload(&fixture).await;
    assert_eq!(game.players[1].turn_info.drinks_per_player, 2);
    assert_eq!(game.players[2].turn_info.drinks_per_player, 1);

    // All drinks are out: no more up, down still works.
    let err = fixture.game.give_drink("g1", "a", "b", true).await.unwrap_err();
    assert_eq!(err.status(), 400);
    let err = fixture.game.give_drink("g1", "a", "a", false).await.unwrap_err();
    assert_eq!(err.status(), 400, "a has nothing to take back");

    fixture.game.next_player("g1", "a").await.unwrap();
    let game = reload(&fixture).await;
    assert_eq!(game.active_player.as_deref(), Some("b"));
}

#[tokio::test]
async fn test_phase2_round1_number_cards_only() {
    let fixture = setup();
    let mut game = base_game(
        LobbySettings::default(),
        [
            hand(&[(9, Suit::Hearts), (11, Suit::Clubs)]),
            hand(&[]),
            hand(&[]),
        ],
    );
    game.status = GameStatus::Phase2;
    game.cards = vec![Vec::new()];
    install(&fixture, &game).await;

    let err = fixture.game.lay_card("g1", "a", 1).await.unwrap_err();
    assert_eq!(err.status(), 400, "jacks wait for round 2");

    fixture.game.lay_card("g1", "a", 0).await.unwrap();
    let game = reload(&fixture).await;
    assert_eq!(game.game_info.drinks_per_round, 9);
    assert_eq!(game.players[0].cards.len(), 1, "the card left the hand");
    assert_eq!(game.cards[0].len(), 1, "and went onto the pile");
    assert!(!game.cards[0][0].flipped);
}

#[tokio::test]
async fn test_phase2_round2_gender_math() {
    let fixture = setup();
    let mut game = base_game(
        LobbySettings::default(),
        [
            hand(&[(11, Suit::Hearts), (13, Suit::Hearts)]),
            hand(&[(11, Suit::Clubs), (12, Suit::Clubs), (13, Suit::Clubs)]),
            hand(&[(13, Suit::Spades)]),
        ],
    );
    game.status = GameStatus::Phase2;
    game.game_info.round_nr = 2;
    game.cards = vec![Vec::new()];
    install(&fixture, &game).await;

    // Simultaneous laying: no active-player gate in round 2.
    fixture.game.lay_card("g1", "b", 0).await.unwrap();
    fixture.game.lay_card("g1", "b", 0).await.unwrap();
    fixture.game.lay_card("g1", "b", 0).await.unwrap();
    fixture.game.lay_card("g1", "c", 0).await.unwrap();
    fixture.game.lay_card("g1", "a", 0).await.unwrap();
    fixture.game.lay_card("g1", "a", 0).await.unwrap();

    let game = reload(&fixture).await;
    assert_eq!(game.game_info.drinks_per_type.jack, 2);
    assert_eq!(game.game_info.drinks_per_type.queen, 1);
    assert_eq!(game.game_info.drinks_per_type.king, 3);

    // JACK+KING for men, QUEEN+KING for women, everything for other.
    assert_eq!(game.players[0].turn_info.drinks_per_player, 5);
    assert_eq!(game.players[1].turn_info.drinks_per_player, 4);
    assert_eq!(game.players[2].turn_info.drinks_per_player, 6);

    // Nobody holds aces, so round 3 settles through to the phase gate.
    assert_eq!(game.game_info.round_nr, 4);
    assert!(game.game_info.next_phase_enabled);
}

#[tokio::test]
async fn test_phase2_round3_aces_must_down() {
    let fixture = setup();
    let mut game = base_game(
        LobbySettings::default(),
        [
            hand(&[(14, Suit::Hearts), (14, Suit::Clubs)]),
            hand(&[]),
            hand(&[]),
        ],
    );
    game.status = GameStatus::Phase2;
    game.game_info.round_nr = 3;
    game.players[1].turn_info.had_turn = true;
    game.players[2].turn_info.had_turn = true;
    game.cards = vec![Vec::new()];
    install(&fixture, &game).await;

    let err = fixture.game.lay_card("g1", "b", 0).await.unwrap_err();
    assert_eq!(err.status(), 400, "b has no cards left");

    fixture.game.lay_card("g1", "a", 0).await.unwrap();
    let game = reload(&fixture).await;
    assert_eq!(game.game_info.has_to_down.get("a"), Some(&1));
    assert!(!game.game_info.next_phase_enabled);

    fixture.game.lay_card("g1", "a", 0).await.unwrap();
    let game = reload(&fixture).await;
    assert_eq!(game.game_info.has_to_down.get("a"), Some(&2));
    assert_eq!(game.game_info.round_nr, 4);
    assert!(game.game_info.next_phase_enabled);
}

#[tokio::test]
async fn test_phase_transition_folds_pyramid_into_deck() {
    let fixture = setup();
    let mut game = base_game(
        LobbySettings::default(),
        [
            hand(&[(5, Suit::Hearts)]),
            hand(&[(6, Suit::Clubs)]),
            hand(&[(7, Suit::Spades)]),
        ],
    );
    game.cards = vec![row(&[(5, Suit::Spades)]), row(&[(6, Suit::Spades), (7, Suit::Clubs)])];
    game.deck = vec![Card::new(2, Suit::Hearts)];
    game.game_info.round_nr = 6;
    game.game_info.next_phase_enabled = true;
    install(&fixture, &game).await;

    let err = fixture.game.next_player("g1", "b").await.unwrap_err();
    assert_eq!(err.status(), 403, "only the master advances the phase");

    fixture.game.next_player("g1", "a").await.unwrap();
    let game = reload(&fixture).await;
    assert_eq!(game.status, GameStatus::Phase2);
    assert_eq!(game.game_info.round_nr, 1);
    assert_eq!(game.cards, vec![Vec::new()]);
    assert_eq!(game.deck.len(), 4, "pyramid cards folded back into the deck");
    assert_eq!(game.active_player.as_deref(), Some("a"));
}

/// A ride where every card reads 7, so `same`/`equal` always hold.
fn sevens_ride() -> Vec<Vec<LaidCard>> {
    let widths = [2, 2, 3, 4, 5, 4, 3, 2, 2];
    let mut cards: Vec<Vec<LaidCard>> = widths
        .iter()
        .map(|&w| row(&vec![(7, Suit::Hearts); w]))
        .collect();
    cards[0][1].flipped = true;
    cards[8][0].flipped = true;
    cards
}

fn phase3_game() -> GameDoc {
    let mut game = base_game(LobbySettings::default(), [hand(&[]), hand(&[]), hand(&[])]);
    game.status = GameStatus::Phase3;
    game.cards = sevens_ride();
    game.game_info = GameInfo {
        busfahrer: vec!["a".to_string()],
        last_card: Some(Card::new(7, Suit::Hearts)),
        ..Default::default()
    };
    game
}

#[tokio::test]
async fn test_phase3_ride_win_credits_driver_once() {
    let fixture = setup();
    for user in ["a", "b", "c"] {
        fixture.accounts.ensure_user(user).await.unwrap();
    }
    let game = phase3_game();
    install(&fixture, &game).await;

    let err = fixture
        .game
        .card_action("g1", "b", "0-0", GuessAction::Same, None)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 403, "b is not the busfahrer");

    // Guess one card per row; the final row compares against its seed.
    for row_idx in 0..8 {
        fixture
            .game
            .card_action("g1", "a", &format!("{row_idx}-0"), GuessAction::Same, None)
            .await
            .unwrap();
    }
    fixture
        .game
        .card_action("g1", "a", "8-1", GuessAction::Equal, None)
        .await
        .unwrap();

    let game = reload(&fixture).await;
    assert!(game.game_info.game_over);
    assert_eq!(game.game_info.current_row, 9);

    let driver = fixture.accounts.account_view("a").await.unwrap();
    assert_eq!(driver.statistics.games_won, 1);
    assert_eq!(driver.statistics.games_played, 1);
    let passenger = fixture.accounts.account_view("b").await.unwrap();
    assert_eq!(passenger.statistics.games_won, 0);
    assert_eq!(passenger.statistics.games_played, 1);

    // The finished ride takes no more guesses.
    let err = fixture
        .game
        .card_action("g1", "a", "8-1", GuessAction::Equal, None)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
    let driver = fixture.accounts.account_view("a").await.unwrap();
    assert_eq!(driver.statistics.games_won, 1, "the win is credited once");
}

#[tokio::test]
async fn test_phase3_wrong_guess_sets_try_over() {
    let fixture = setup();
    let mut game = phase3_game();
    game.cards[2][0].number = 5;
    game.game_info.current_row = 2;
    install(&fixture, &game).await;

    fixture
        .game
        .card_action("g1", "a", "2-0", GuessAction::Higher, None)
        .await
        .unwrap();

    let game = reload(&fixture).await;
    assert!(game.game_info.try_over);
    assert_eq!(game.game_info.drinks_per_try, 3);
    assert!(game.cards[2][0].flipped);
    assert_eq!(game.active_player.as_deref(), Some("a"));
    assert_eq!(game.statistics["a"].drinks_received, 3);
}

#[tokio::test]
async fn test_phase3_second_action_widens_the_guess() {
    let fixture = setup();
    let game = phase3_game();
    install(&fixture, &game).await;

    fixture
        .game
        .card_action("g1", "a", "0-0", GuessAction::Higher, Some(GuessAction::Same))
        .await
        .unwrap();
    let game = reload(&fixture).await;
    assert_eq!(game.game_info.current_row, 1);
    assert!(!game.game_info.try_over);
}

#[tokio::test]
async fn test_phase3_retry_resets_the_ride() {
    let fixture = setup();
    let mut game = phase3_game();
    game.cards[0][0].flipped = true;
    game.cards[1][0].flipped = true;
    game.cards[2][0].number = 5;
    game.cards[2][0].flipped = true;
    game.game_info.current_row = 2;
    game.game_info.try_over = true;
    game.game_info.drinks_per_try = 3;
    install(&fixture, &game).await;

    let err = fixture.game.retry_phase3("g1", "b").await.unwrap_err();
    assert_eq!(err.status(), 403, "only the master retries");

    let mut feed = fixture.store.watch();
    fixture.game.retry_phase3("g1", "a").await.unwrap();

    // Subscribers see the flip-down, then the driver reset, then the
    // fresh layout.
    let first = feed.recv().await.unwrap();
    assert_eq!(first.updated_fields, vec!["cards"]);
    let second = feed.recv().await.unwrap();
    assert_eq!(second.updated_fields, vec!["activePlayer"]);
    let third = feed.recv().await.unwrap();
    assert!(third.updated_fields.iter().any(|f| f == "gameInfo.currentRow"));

    let game = reload(&fixture).await;
    assert_eq!(game.game_info.current_row, 0);
    assert_eq!(game.game_info.drinks_per_try, 0);
    assert!(!game.game_info.try_over);
    assert!(!game.game_info.game_over);
    assert!(game.active_player.is_none());
    assert!(game.cards[0][1].flipped && game.cards[8][0].flipped);
    let flipped = game
        .cards
        .iter()
        .flatten()
        .filter(|c| c.flipped)
        .count();
    assert_eq!(flipped, 2, "only the seeds are face up");

    let err = fixture.game.retry_phase3("g1", "a").await.unwrap_err();
    assert_eq!(err.status(), 400, "nothing to retry after the reset");
}

#[tokio::test]
async fn test_open_new_game_resets_lobby() {
    let fixture = setup();
    // The lobby must exist for the reset; craft a minimal one through the
    // real service.
    let lobby = LobbyService::new(fixture.store.clone());
    let lobby_id = lobby
        .create(
            "a",
            busfahrer::lobby::CreateLobby {
                name: "Stammtisch".to_string(),
                player_name: "A".to_string(),
                private: false,
                gender: Gender::Male,
                settings: LobbySettings::default(),
            },
        )
        .await
        .unwrap();

    let mut game = phase3_game();
    game.id = lobby_id.clone();
    game.game_info.game_over = true;
    install(&fixture, &game).await;

    let returned = fixture.game.open_new_game(&lobby_id, "a").await.unwrap();
    assert_eq!(returned, lobby_id);
    assert!(
        fixture
            .store
            .read(collections::GAMES, &lobby_id)
            .await
            .unwrap()
            .is_none()
    );
    let info = lobby.lobby_info(&lobby_id).await.unwrap();
    assert_eq!(
        info.status,
        busfahrer::lobby::models::LobbyStatus::Waiting
    );
}
