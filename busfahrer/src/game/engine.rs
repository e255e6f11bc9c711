//! The three-phase game state machine.
//!
//! One document per active game; every command validates document
//! existence, caller presence, phase, and turn authority, then applies a
//! single atomic patch (phase-3 retry is the one choreographed exception).
//! Fan-out is driven entirely by the store's change feed.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::{
    errors::{ServiceError, ServiceResult},
    lobby::{LeaveOutcome, LobbyService, models::LobbyDoc},
    store::{self, Patch, Store, collections},
};

use super::{
    constants::{FINAL_RIDE_ROW, HAND_SIZE, PHASE1_ROUNDS, PHASE2_ROUNDS, PYRAMID_ROWS,
        RETRY_FLIP_PAUSE_MS, RIDE_LAYOUT},
    entities::{BusMode, Card, Deck, Giving, Role},
    models::{
        DrinksPerType, GameDoc, GameInfo, GamePlayer, GameStats, GameStatus, HandCard, LaidCard,
    },
    turn,
};

/// A phase-3 guess.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuessAction {
    Higher,
    Lower,
    Same,
    Equal,
    Unequal,
}

/// What a game leave did; mirrors the lobby-side outcome so callers can
/// push the matching lifecycle frames.
#[derive(Clone, Debug, Default)]
pub struct LeaveGameOutcome {
    pub game_deleted: bool,
    pub lobby: Option<LeaveOutcome>,
}

/// Build the initial phase-1 game document from a lobby snapshot. The
/// caller has validated the player count against the deck.
pub fn build_game(lobby: &LobbyDoc) -> GameDoc {
    let mut deck = Deck::shuffled(lobby.settings.shuffling);

    let players: Vec<GamePlayer> = lobby
        .players
        .iter()
        .map(|p| GamePlayer {
            id: p.id.clone(),
            name: p.name.clone(),
            role: p.role,
            gender: p.gender,
            avatar: p.avatar.clone(),
            title: p.title.clone(),
            cards: deck
                .deal_many(HAND_SIZE)
                .into_iter()
                .map(HandCard::new)
                .collect(),
            turn_info: Default::default(),
        })
        .collect();

    // Pyramid rows 1..5, row r holding r face-down cards.
    let cards: Vec<Vec<LaidCard>> = (1..=PYRAMID_ROWS)
        .map(|r| deck.deal_many(r).into_iter().map(LaidCard::face_down).collect())
        .collect();

    let turn_order: Vec<String> = players.iter().map(|p| p.id.clone()).collect();
    let statistics: HashMap<String, GameStats> = players
        .iter()
        .map(|p| (p.id.clone(), GameStats::default()))
        .collect();

    GameDoc {
        id: lobby.id.clone(),
        status: GameStatus::Phase1,
        settings: lobby.settings,
        spectators: lobby.spectators.clone(),
        active_player: turn_order.first().cloned(),
        turn_order,
        statistics,
        players,
        cards,
        deck: deck.cards().to_vec(),
        game_info: GameInfo {
            round_nr: 1,
            ..Default::default()
        },
    }
}

/// Deal the 9-row ride from a fresh double deck: `[0][1]` and `[8][0]` are
/// pre-flipped seed cards. Returns the layout, the undealt remainder, and
/// the `lastCard` seed.
fn build_ride(shuffling: super::entities::Shuffling) -> (Vec<Vec<LaidCard>>, Vec<Card>, Card) {
    let mut deck = Deck::shuffled(shuffling);
    let mut cards: Vec<Vec<LaidCard>> = RIDE_LAYOUT
        .iter()
        .map(|&width| deck.deal_many(width).into_iter().map(LaidCard::face_down).collect())
        .collect();
    cards[0][1].flipped = true;
    cards[FINAL_RIDE_ROW][0].flipped = true;
    let seed = cards[0][1].card();
    (cards, deck.cards().to_vec(), seed)
}

pub struct GameService {
    store: Arc<dyn Store>,
    lobby: Arc<LobbyService>,
    /// Probability that a chaos-mode lay multiplies its drinks by the card
    /// number, sourced from configuration.
    chaos_mode: f64,
}

impl GameService {
    pub fn new(store: Arc<dyn Store>, lobby: Arc<LobbyService>, chaos_mode: f64) -> Self {
        Self {
            store,
            lobby,
            chaos_mode: chaos_mode.clamp(0.0, 1.0),
        }
    }

    async fn load(&self, game_id: &str, title: &str) -> ServiceResult<GameDoc> {
        store::read_as(self.store.as_ref(), collections::GAMES, game_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Game not found", title))
    }

    fn require_player<'a>(
        game: &'a GameDoc,
        user_id: &str,
        title: &str,
    ) -> ServiceResult<(usize, &'a GamePlayer)> {
        game.player_index(user_id)
            .map(|idx| (idx, &game.players[idx]))
            .ok_or_else(|| ServiceError::not_found("Player not found", title))
    }

    fn require_phase(game: &GameDoc, status: GameStatus, title: &str) -> ServiceResult<()> {
        if game.status != status {
            return Err(ServiceError::precondition("Wrong phase", title));
        }
        Ok(())
    }

    fn require_master(game: &GameDoc, user_id: &str, title: &str) -> ServiceResult<()> {
        if !game.is_master(user_id) {
            return Err(ServiceError::forbidden("Only the master can do that", title));
        }
        Ok(())
    }

    fn require_active(game: &GameDoc, user_id: &str, title: &str) -> ServiceResult<()> {
        if !game.is_active_player(user_id) {
            return Err(ServiceError::forbidden("Not your turn", title));
        }
        Ok(())
    }

    /// Reveal the running round's pyramid row. Master only, monotonic.
    pub async fn flip_row(&self, game_id: &str, user_id: &str, idx: u32) -> ServiceResult<()> {
        const TITLE: &str = "Flip Row Error";

        let game = self.load(game_id, TITLE).await?;
        Self::require_phase(&game, GameStatus::Phase1, TITLE)?;
        Self::require_player(&game, user_id, TITLE)?;
        Self::require_master(&game, user_id, TITLE)?;

        let round = game.game_info.round_nr;
        if round > PHASE1_ROUNDS {
            return Err(ServiceError::precondition("All rows are flipped", TITLE));
        }
        if idx != round {
            return Err(ServiceError::precondition("Not this round's row", TITLE));
        }
        if game.game_info.is_row_flipped {
            return Err(ServiceError::precondition("Row already flipped", TITLE));
        }

        let row_idx = (round - 1) as usize;
        let mut patch = Patch::new().set("gameInfo.isRowFlipped", json!(true));
        for col in 0..game.cards[row_idx].len() {
            patch = patch.set(format!("cards.{row_idx}.{col}.flipped"), json!(true));
        }
        self.store
            .update(collections::GAMES, game_id, patch)
            .await?;
        Ok(())
    }

    /// Lay a hand card, phase 1 or 2.
    pub async fn lay_card(&self, game_id: &str, user_id: &str, card_idx: usize) -> ServiceResult<()> {
        const TITLE: &str = "Lay Card Error";

        let game = self.load(game_id, TITLE).await?;
        let (p, player) = Self::require_player(&game, user_id, TITLE)?;
        let hand_card = *player
            .cards
            .get(card_idx)
            .ok_or_else(|| ServiceError::precondition("No such card", TITLE))?;
        if hand_card.played {
            return Err(ServiceError::precondition("Card already played", TITLE));
        }

        match game.status {
            GameStatus::Phase1 => self.lay_card_phase1(game, p, card_idx, hand_card).await,
            GameStatus::Phase2 => self.lay_card_phase2(game, p, card_idx, hand_card).await,
            _ => Err(ServiceError::precondition("Wrong phase", TITLE)),
        }
    }

    async fn lay_card_phase1(
        &self,
        game: GameDoc,
        p: usize,
        card_idx: usize,
        hand_card: HandCard,
    ) -> ServiceResult<()> {
        const TITLE: &str = "Lay Card Error";

        let user_id = game.players[p].id.clone();
        Self::require_active(&game, &user_id, TITLE)?;

        let round = game.game_info.round_nr;
        if round > PHASE1_ROUNDS {
            return Err(ServiceError::precondition("Round is over", TITLE));
        }
        if !game.game_info.is_row_flipped {
            return Err(ServiceError::precondition("Row is not flipped yet", TITLE));
        }

        let card = hand_card.card();
        let row = &game.cards[(round - 1) as usize];
        let matches_row = row
            .iter()
            .any(|laid| game.settings.matching.matches(card, laid.card()));
        if !matches_row {
            return Err(ServiceError::precondition(
                "Card does not match the row",
                TITLE,
            ));
        }

        let drinks = if game.settings.is_chaos && rand::random_bool(self.chaos_mode) {
            u32::from(card.number) * round
        } else {
            round
        };

        let mut patch = Patch::new()
            .set(format!("players.{p}.cards.{card_idx}.played"), json!(true))
            .inc("gameInfo.drinksPerRound", i64::from(drinks))
            .inc(format!("statistics.{user_id}.cardsPlayed"), 1);
        if game.settings.giving == Giving::Default {
            // Without explicit targets the laid drinks count as given in
            // aggregate.
            patch = patch.inc(format!("statistics.{user_id}.drinksGiven"), i64::from(drinks));
        }
        self.store
            .update(collections::GAMES, &game.id, patch)
            .await?;

        // Monotonic personal best; the user document may not exist yet.
        let new_total = i64::from(game.game_info.drinks_per_round + drinks);
        let gate = Patch::new().max("statistics.maxDrinksPerRound", new_total);
        if let Err(err) = self
            .store
            .update(collections::USERS, &user_id, gate)
            .await
        {
            log::debug!("skipping personal best for {user_id}: {err}");
        }
        Ok(())
    }

    async fn lay_card_phase2(
        &self,
        mut game: GameDoc,
        p: usize,
        card_idx: usize,
        hand_card: HandCard,
    ) -> ServiceResult<()> {
        const TITLE: &str = "Lay Card Error";

        let user_id = game.players[p].id.clone();
        let card = hand_card.card();
        let round = game.game_info.round_nr;

        match round {
            1 => {
                Self::require_active(&game, &user_id, TITLE)?;
                if !(2..=10).contains(&card.number) {
                    return Err(ServiceError::precondition(
                        "Only number cards this round",
                        TITLE,
                    ));
                }
            }
            2 => {
                if !(11..=13).contains(&card.number) {
                    return Err(ServiceError::precondition(
                        "Only jacks, queens and kings this round",
                        TITLE,
                    ));
                }
            }
            3 => {
                if card.number != 14 {
                    return Err(ServiceError::precondition("Only aces this round", TITLE));
                }
            }
            _ => {
                return Err(ServiceError::precondition("Round is over", TITLE));
            }
        }

        // The card moves from the hand onto the face-down discard pile.
        game.players[p].cards.remove(card_idx);
        let mut patch = Patch::new()
            .set(
                format!("players.{p}.cards"),
                store::to_doc(&game.players[p].cards)?,
            )
            .unshift("cards.0", store::to_doc(&LaidCard::face_down(card))?)
            .inc(format!("statistics.{user_id}.cardsPlayed"), 1);

        match round {
            1 => {
                game.game_info.drinks_per_round += u32::from(card.number);
                patch = patch
                    .inc("gameInfo.drinksPerRound", i64::from(card.number))
                    .inc(
                        format!("statistics.{user_id}.drinksReceived"),
                        i64::from(card.number),
                    );
            }
            2 => {
                let field = match card.number {
                    11 => "jack",
                    12 => "queen",
                    _ => "king",
                };
                match card.number {
                    11 => game.game_info.drinks_per_type.jack += 1,
                    12 => game.game_info.drinks_per_type.queen += 1,
                    _ => game.game_info.drinks_per_type.king += 1,
                }
                patch = patch.inc(format!("gameInfo.drinksPerType.{field}"), 1);
                if !game.players[p].holds_any(&[11, 12, 13]) {
                    patch = Self::mark_had_turn(&mut game, patch, p);
                    patch = Self::settle_phase2_round(&mut game, patch)?;
                }
            }
            _ => {
                *game
                    .game_info
                    .has_to_down
                    .entry(user_id.clone())
                    .or_insert(0) += 1;
                patch = patch
                    .inc(format!("gameInfo.hasToDown.{user_id}"), 1)
                    .inc(format!("statistics.{user_id}.drinksReceived"), 1);
                if !game.players[p].holds_any(&[14]) {
                    patch = Self::mark_had_turn(&mut game, patch, p);
                    patch = Self::settle_phase2_round(&mut game, patch)?;
                }
            }
        }

        self.store
            .update(collections::GAMES, &game.id, patch)
            .await?;
        Ok(())
    }

    fn mark_had_turn(game: &mut GameDoc, patch: Patch, idx: usize) -> Patch {
        game.players[idx].turn_info.had_turn = true;
        patch.set(format!("players.{idx}.turnInfo.hadTurn"), json!(true))
    }

    /// Close out the running simultaneous phase-2 round if everyone is done,
    /// entering the next one. Entering a round immediately marks players who
    /// hold none of its ranks, so empty rounds cascade through.
    fn settle_phase2_round(game: &mut GameDoc, mut patch: Patch) -> ServiceResult<Patch> {
        while game.status == GameStatus::Phase2
            && (2..=PHASE2_ROUNDS).contains(&game.game_info.round_nr)
            && game.all_had_turn()
        {
            if game.game_info.round_nr == 2 {
                // Face cards settle by gender: J+K for men, Q+K for women,
                // all three otherwise.
                for (i, player) in game.players.iter_mut().enumerate() {
                    let drinks = game.game_info.drinks_per_type.for_gender(player.gender);
                    player.turn_info.drinks_per_player = drinks;
                    patch = patch
                        .set(
                            format!("players.{i}.turnInfo.drinksPerPlayer"),
                            json!(drinks),
                        )
                        .inc(
                            format!("statistics.{}.drinksReceived", player.id),
                            i64::from(drinks),
                        );
                }
            }
            let next_round = game.game_info.round_nr + 1;
            game.game_info.round_nr = next_round;
            patch = patch.set("gameInfo.roundNr", json!(next_round));

            if next_round > PHASE2_ROUNDS {
                game.game_info.next_phase_enabled = true;
                patch = patch.set("gameInfo.nextPhaseEnabled", json!(true));
                break;
            }
            patch = Self::enter_phase2_round(game, patch, next_round);
        }
        Ok(patch)
    }

    /// Reset `hadTurn` for a fresh simultaneous round and pre-mark players
    /// holding none of the round's ranks.
    fn enter_phase2_round(game: &mut GameDoc, mut patch: Patch, round: u32) -> Patch {
        let ranks: &[u8] = if round == 2 { &[11, 12, 13] } else { &[14] };
        for i in 0..game.players.len() {
            let done = !game.players[i].holds_any(ranks);
            game.players[i].turn_info.had_turn = done;
            patch = patch.set(format!("players.{i}.turnInfo.hadTurn"), json!(done));
        }
        patch
    }

    /// Assign (or take back) one drink in Avatar giving mode.
    pub async fn give_drink(
        &self,
        game_id: &str,
        user_id: &str,
        target_id: &str,
        up: bool,
    ) -> ServiceResult<()> {
        const TITLE: &str = "Give Drink Error";

        let game = self.load(game_id, TITLE).await?;
        Self::require_phase(&game, GameStatus::Phase1, TITLE)?;
        Self::require_player(&game, user_id, TITLE)?;
        Self::require_active(&game, user_id, TITLE)?;
        if game.settings.giving != Giving::Avatar {
            return Err(ServiceError::precondition(
                "Drinks are not given by avatar",
                TITLE,
            ));
        }
        let (t, target) = Self::require_player(&game, target_id, TITLE)?;

        let total = game.assigned_drinks();
        let delta = if up {
            if total >= game.game_info.drinks_per_round {
                return Err(ServiceError::precondition("All drinks are given", TITLE));
            }
            1
        } else {
            if target.turn_info.drinks_per_player == 0 {
                return Err(ServiceError::precondition("Nothing to take back", TITLE));
            }
            -1
        };

        self.store
            .update(
                collections::GAMES,
                game_id,
                Patch::new()
                    .inc(format!("players.{t}.turnInfo.drinksPerPlayer"), delta)
                    .inc(format!("statistics.{target_id}.drinksReceived"), delta)
                    .inc(format!("statistics.{user_id}.drinksGiven"), delta),
            )
            .await?;
        Ok(())
    }

    /// End the caller's turn, or — when the phase is exhausted and the
    /// caller is the master — advance to the next phase.
    pub async fn next_player(&self, game_id: &str, user_id: &str) -> ServiceResult<()> {
        const TITLE: &str = "Next Player Error";

        let mut game = self.load(game_id, TITLE).await?;
        let (p, _) = Self::require_player(&game, user_id, TITLE)?;

        if game.game_info.next_phase_enabled {
            Self::require_master(&game, user_id, TITLE)?;
            let patch = match game.status {
                GameStatus::Phase1 => Self::start_phase2(&game)?,
                GameStatus::Phase2 => Self::start_phase3(&game)?,
                _ => return Err(ServiceError::precondition("Wrong phase", TITLE)),
            };
            self.store
                .update(collections::GAMES, game_id, patch)
                .await?;
            return Ok(());
        }

        Self::require_active(&game, user_id, TITLE)?;
        match game.status {
            GameStatus::Phase1 => {
                if !game.game_info.is_row_flipped {
                    return Err(ServiceError::precondition("Flip the row first", TITLE));
                }
                if game.settings.giving == Giving::Avatar
                    && game.assigned_drinks() < game.game_info.drinks_per_round
                {
                    return Err(ServiceError::precondition(
                        "Distribute your drinks first",
                        TITLE,
                    ));
                }
            }
            GameStatus::Phase2 => {
                if game.game_info.round_nr != 1 {
                    return Err(ServiceError::precondition("No turns in this round", TITLE));
                }
            }
            _ => return Err(ServiceError::precondition("Wrong phase", TITLE)),
        }

        let mut patch = Self::mark_had_turn(&mut game, Patch::new(), p);

        if game.all_had_turn() {
            patch = Self::finish_rotation_round(&mut game, patch)?;
        } else {
            let next = turn::next_player(
                game.settings.turning,
                &game.turn_order,
                user_id,
                |id| game.player(id).is_some_and(|pl| pl.turn_info.had_turn),
            )
            .ok_or_else(|| ServiceError::internal("No next player", TITLE))?;
            patch = patch.set("activePlayer", json!(next));
        }

        self.store
            .update(collections::GAMES, game_id, patch)
            .await?;
        Ok(())
    }

    /// Everyone has had their turn: reset the per-round state and either
    /// open the next round or enable the phase switch for the master.
    fn finish_rotation_round(game: &mut GameDoc, mut patch: Patch) -> ServiceResult<Patch> {
        for i in 0..game.players.len() {
            game.players[i].turn_info = Default::default();
            patch = patch
                .set(format!("players.{i}.turnInfo.hadTurn"), json!(false))
                .set(format!("players.{i}.turnInfo.drinksPerPlayer"), json!(0));
        }
        let next_round = game.game_info.round_nr + 1;
        game.game_info.round_nr = next_round;
        game.game_info.drinks_per_round = 0;
        patch = patch
            .set("gameInfo.roundNr", json!(next_round))
            .set("gameInfo.drinksPerRound", json!(0));

        match game.status {
            GameStatus::Phase1 => {
                patch = patch.set("gameInfo.isRowFlipped", json!(false));
                if next_round > PHASE1_ROUNDS {
                    game.game_info.next_phase_enabled = true;
                    patch = patch.set("gameInfo.nextPhaseEnabled", json!(true));
                }
                // Rounds restart at the top of the order.
                if let Some(first) = game.turn_order.first() {
                    patch = patch.set("activePlayer", json!(first));
                }
            }
            GameStatus::Phase2 => {
                // The active player stays fixed while the simultaneous
                // rounds run.
                patch = Self::enter_phase2_round(game, patch, next_round);
                patch = Self::settle_phase2_round(game, patch)?;
            }
            _ => {}
        }
        Ok(patch)
    }

    /// Phase 1 → 2: hands stay, the pyramid folds back into the deck, and
    /// one face-down discard pile opens.
    fn start_phase2(game: &GameDoc) -> ServiceResult<Patch> {
        let mut deck = game.deck.clone();
        for row in &game.cards {
            deck.extend(row.iter().map(LaidCard::card));
        }

        let mut patch = Patch::new()
            .set("status", store::to_doc(&GameStatus::Phase2)?)
            .set("gameInfo.roundNr", json!(1))
            .set("gameInfo.drinksPerRound", json!(0))
            .set("gameInfo.isRowFlipped", json!(false))
            .set("gameInfo.nextPhaseEnabled", json!(false))
            .set("cards", json!([[]]))
            .set("deck", store::to_doc(&deck)?);
        for i in 0..game.players.len() {
            patch = patch
                .set(format!("players.{i}.turnInfo.hadTurn"), json!(false))
                .set(format!("players.{i}.turnInfo.drinksPerPlayer"), json!(0));
        }
        if let Some(first) = game.turn_order.first() {
            patch = patch.set("activePlayer", json!(first));
        }
        Ok(patch)
    }

    /// Phase 2 → 3: elect the busfahrer from the unplayed-card counts and
    /// deal the ride from a fresh double deck.
    fn start_phase3(game: &GameDoc) -> ServiceResult<Patch> {
        let busfahrer = elect_busfahrer(game);
        let (cards, deck, seed) = build_ride(game.settings.shuffling);

        let mut patch = Patch::new()
            .set("status", store::to_doc(&GameStatus::Phase3)?)
            .set("gameInfo.nextPhaseEnabled", json!(false))
            .set("gameInfo.drinksPerRound", json!(0))
            .set("gameInfo.hasToDown", json!({}))
            .set("gameInfo.drinksPerType", store::to_doc(&DrinksPerType::default())?)
            .set("gameInfo.busfahrer", store::to_doc(&busfahrer)?)
            .set("gameInfo.currentRow", json!(0))
            .set("gameInfo.lastCard", store::to_doc(&seed)?)
            .set("gameInfo.drinksPerTry", json!(0))
            .set("gameInfo.tryOver", json!(false))
            .set("gameInfo.gameOver", json!(false))
            .set("cards", store::to_doc(&cards)?)
            .set("deck", store::to_doc(&deck)?)
            .set("activePlayer", store::to_doc(&busfahrer.first())?);
        for i in 0..game.players.len() {
            patch = patch
                .set(format!("players.{i}.cards"), json!([]))
                .set(format!("players.{i}.turnInfo.hadTurn"), json!(false))
                .set(format!("players.{i}.turnInfo.drinksPerPlayer"), json!(0));
        }
        Ok(patch)
    }

    /// Guess a card of the current ride row.
    pub async fn card_action(
        &self,
        game_id: &str,
        user_id: &str,
        card_idx: &str,
        action: GuessAction,
        second_action: Option<GuessAction>,
    ) -> ServiceResult<()> {
        const TITLE: &str = "Card Action Error";

        let game = self.load(game_id, TITLE).await?;
        Self::require_phase(&game, GameStatus::Phase3, TITLE)?;
        Self::require_player(&game, user_id, TITLE)?;
        if !game.is_busfahrer(user_id) {
            return Err(ServiceError::forbidden("Not your turn", TITLE));
        }
        if game.game_info.try_over || game.game_info.game_over {
            return Err(ServiceError::precondition("The ride is over", TITLE));
        }

        let (row, col) = parse_card_idx(card_idx, TITLE)?;
        if row != game.game_info.current_row {
            return Err(ServiceError::precondition("Not the current row", TITLE));
        }
        let laid = *game
            .cards
            .get(row)
            .and_then(|cards| cards.get(col))
            .ok_or_else(|| ServiceError::precondition("No such card", TITLE))?;
        if laid.flipped {
            return Err(ServiceError::precondition("Card already flipped", TITLE));
        }

        let card = laid.card();
        let mut correct = guess_holds(&game, action, row, card, TITLE)?;
        if let Some(second) = second_action {
            correct = correct || guess_holds(&game, second, row, card, TITLE)?;
        }

        let mut patch = Patch::new()
            .set(format!("cards.{row}.{col}.flipped"), json!(true))
            .set("activePlayer", json!(user_id));

        if correct {
            let next_row = row + 1;
            patch = patch
                .set("gameInfo.lastCard", store::to_doc(&card)?)
                .set("gameInfo.currentRow", json!(next_row));
            if next_row == RIDE_LAYOUT.len() {
                patch = patch.set("gameInfo.gameOver", json!(true));
                self.store
                    .update(collections::GAMES, game_id, patch)
                    .await?;
                self.credit_results(&game, user_id).await;
                return Ok(());
            }
        } else {
            let drinks = (row + 1) as i64;
            patch = patch
                .set("gameInfo.drinksPerTry", json!(drinks))
                .set("gameInfo.tryOver", json!(true))
                .inc(format!("statistics.{user_id}.drinksReceived"), drinks);
        }

        self.store
            .update(collections::GAMES, game_id, patch)
            .await?;
        Ok(())
    }

    /// Fold the per-game counters into the user documents and credit the
    /// winning driver. Missing user documents are skipped.
    async fn credit_results(&self, game: &GameDoc, driver_id: &str) {
        for player in &game.players {
            let stats = game.statistics.get(&player.id).copied().unwrap_or_default();
            let mut patch = Patch::new()
                .inc("statistics.gamesPlayed", 1)
                .inc("statistics.drinksGiven", stats.drinks_given.max(0))
                .inc("statistics.drinksReceived", stats.drinks_received.max(0))
                .inc("statistics.cardsPlayed", stats.cards_played.max(0));
            if player.id == driver_id {
                patch = patch.inc("statistics.gamesWon", 1);
            }
            if let Err(err) = self
                .store
                .update(collections::USERS, &player.id, patch)
                .await
            {
                log::debug!("skipping result credit for {}: {err}", player.id);
            }
        }
        log::info!("game {} won by {driver_id}", game.id);
    }

    /// Reset the ride after a failed try: flip everything down, publish the
    /// driver reset on its own, pause for clients to render, then deal a
    /// fresh layout.
    pub async fn retry_phase3(&self, game_id: &str, user_id: &str) -> ServiceResult<()> {
        const TITLE: &str = "Retry Error";

        let game = self.load(game_id, TITLE).await?;
        Self::require_phase(&game, GameStatus::Phase3, TITLE)?;
        Self::require_player(&game, user_id, TITLE)?;
        Self::require_master(&game, user_id, TITLE)?;
        if !game.game_info.try_over {
            return Err(ServiceError::precondition("Nothing to retry", TITLE));
        }

        let mut face_down = game.cards.clone();
        for row in &mut face_down {
            for card in row {
                card.flipped = false;
            }
        }
        self.store
            .update(
                collections::GAMES,
                game_id,
                Patch::new().set("cards", store::to_doc(&face_down)?),
            )
            .await?;
        self.store
            .update(
                collections::GAMES,
                game_id,
                Patch::new().set("activePlayer", json!(null)),
            )
            .await?;

        tokio::time::sleep(Duration::from_millis(RETRY_FLIP_PAUSE_MS)).await;

        let (cards, deck, seed) = build_ride(game.settings.shuffling);
        self.store
            .update(
                collections::GAMES,
                game_id,
                Patch::new()
                    .set("cards", store::to_doc(&cards)?)
                    .set("deck", store::to_doc(&deck)?)
                    .set("gameInfo.currentRow", json!(0))
                    .set("gameInfo.lastCard", store::to_doc(&seed)?)
                    .set("gameInfo.drinksPerTry", json!(0))
                    .set("gameInfo.tryOver", json!(false))
                    .set("gameInfo.gameOver", json!(false)),
            )
            .await?;
        Ok(())
    }

    /// Tear down the finished game and reopen the lobby. Returns the lobby
    /// id for the `newGameUpdate` broadcast.
    pub async fn open_new_game(&self, game_id: &str, user_id: &str) -> ServiceResult<String> {
        const TITLE: &str = "New Game Error";

        let game = self.load(game_id, TITLE).await?;
        Self::require_player(&game, user_id, TITLE)?;
        Self::require_master(&game, user_id, TITLE)?;
        if !game.game_info.game_over {
            return Err(ServiceError::precondition("The game is not over", TITLE));
        }

        self.store.delete(collections::GAMES, game_id).await?;
        self.store
            .update(
                collections::LOBBIES,
                game_id,
                Patch::new().set(
                    "status",
                    store::to_doc(&crate::lobby::models::LobbyStatus::Waiting)?,
                ),
            )
            .await?;
        log::info!("game {game_id} reset to lobby");
        Ok(game_id.to_string())
    }

    /// Leave a running game (and the lobby behind it). A branch that
    /// already deleted the game document short-circuits everything after
    /// it.
    pub async fn leave_game(&self, game_id: &str, user_id: &str) -> ServiceResult<LeaveGameOutcome> {
        const TITLE: &str = "Leave Game Error";

        let game = self.load(game_id, TITLE).await?;
        let leaver_idx = game.player_index(user_id);
        if leaver_idx.is_none() && !game.spectators.iter().any(|s| s.id == user_id) {
            return Err(ServiceError::not_found("Player not found", TITLE));
        }

        let lobby_outcome = match self.lobby.leave_lobby(user_id, game_id).await {
            Ok(outcome) => Some(outcome),
            Err(ServiceError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        if lobby_outcome.as_ref().is_some_and(|o| o.deleted) {
            // Lobby teardown already removed the game document.
            return Ok(LeaveGameOutcome {
                game_deleted: true,
                lobby: lobby_outcome,
            });
        }

        let Some(p) = leaver_idx else {
            // Spectators only need their bench entry dropped.
            self.store
                .update(
                    collections::GAMES,
                    game_id,
                    Patch::new().pull("spectators", json!({ "id": user_id })),
                )
                .await?;
            return Ok(LeaveGameOutcome {
                game_deleted: false,
                lobby: lobby_outcome,
            });
        };

        if game.players.len() == 1 {
            self.store.delete(collections::GAMES, game_id).await?;
            return Ok(LeaveGameOutcome {
                game_deleted: true,
                lobby: lobby_outcome,
            });
        }

        let remaining_order: Vec<String> = game
            .turn_order
            .iter()
            .filter(|id| id.as_str() != user_id)
            .cloned()
            .collect();

        let mut patch = Patch::new();
        if game.players[p].role == Role::Master {
            let heir_id = lobby_outcome
                .as_ref()
                .and_then(|o| o.new_master.clone())
                .or_else(|| remaining_order.first().cloned());
            if let Some(heir_id) = heir_id
                && let Some(heir_idx) = game.player_index(&heir_id)
            {
                patch = patch.set(
                    format!("players.{heir_idx}.role"),
                    store::to_doc(&Role::Master)?,
                );
            }
        }
        patch = patch
            .pull("players", json!({ "id": user_id }))
            .set("turnOrder", store::to_doc(&remaining_order)?)
            .pull("gameInfo.busfahrer", json!(user_id));
        if game.is_active_player(user_id) {
            let next = if game.status == GameStatus::Phase3 {
                None
            } else {
                turn::next_player(game.settings.turning, &game.turn_order, user_id, |id| {
                    game.player(id).is_some_and(|pl| pl.turn_info.had_turn)
                })
                .or_else(|| remaining_order.first().cloned())
            };
            patch = patch.set("activePlayer", store::to_doc(&next)?);
        }

        self.store
            .update(collections::GAMES, game_id, patch)
            .await?;
        log::info!("{user_id} left game {game_id}");
        Ok(LeaveGameOutcome {
            game_deleted: false,
            lobby: lobby_outcome,
        })
    }

    /// The full document, for derived views. Callers must be a player or
    /// spectator.
    pub async fn game_for(&self, game_id: &str, user_id: &str) -> ServiceResult<GameDoc> {
        const TITLE: &str = "Game Error";

        let game = self.load(game_id, TITLE).await?;
        let is_member = game.player(user_id).is_some()
            || game.spectators.iter().any(|s| s.id == user_id);
        if !is_member {
            return Err(ServiceError::not_found("Player not found", TITLE));
        }
        Ok(game)
    }
}

fn parse_card_idx(card_idx: &str, title: &str) -> ServiceResult<(usize, usize)> {
    let mut parts = card_idx.splitn(2, '-');
    let row = parts.next().and_then(|s| s.parse().ok());
    let col = parts.next().and_then(|s| s.parse().ok());
    match (row, col) {
        (Some(row), Some(col)) => Ok((row, col)),
        _ => Err(ServiceError::precondition("Invalid card index", title)),
    }
}

/// Whether `action` is a correct call on `card` for `row`.
fn guess_holds(
    game: &GameDoc,
    action: GuessAction,
    row: usize,
    card: Card,
    title: &str,
) -> ServiceResult<bool> {
    if row < FINAL_RIDE_ROW {
        let last = game
            .game_info
            .last_card
            .ok_or_else(|| ServiceError::internal("Ride has no reference card", title))?;
        match action {
            GuessAction::Higher => Ok(card.number > last.number),
            GuessAction::Lower => Ok(card.number < last.number),
            GuessAction::Same => Ok(card.number == last.number),
            _ => Err(ServiceError::precondition("Invalid action for this row", title)),
        }
    } else {
        let seed = game.cards[FINAL_RIDE_ROW][0].card();
        match action {
            GuessAction::Equal => Ok(card.number == seed.number),
            GuessAction::Unequal => Ok(card.number != seed.number),
            _ => Err(ServiceError::precondition("Invalid action for this row", title)),
        }
    }
}

/// Count unplayed cards per player and pick the driver(s) per `busMode`:
/// the maximum by default, the minimum in `Reverse`, one random player in
/// `Random`.
fn elect_busfahrer(game: &GameDoc) -> Vec<String> {
    use rand::seq::IndexedRandom;

    let counts: Vec<(String, usize)> = game
        .players
        .iter()
        .map(|p| (p.id.clone(), p.unplayed_count()))
        .collect();

    match game.settings.bus_mode {
        BusMode::Default => {
            let max = counts.iter().map(|(_, n)| *n).max().unwrap_or(0);
            counts
                .into_iter()
                .filter(|(_, n)| *n == max)
                .map(|(id, _)| id)
                .collect()
        }
        BusMode::Reverse => {
            let min = counts.iter().map(|(_, n)| *n).min().unwrap_or(0);
            counts
                .into_iter()
                .filter(|(_, n)| *n == min)
                .map(|(id, _)| id)
                .collect()
        }
        BusMode::Random => counts
            .choose(&mut rand::rng())
            .map(|(id, _)| vec![id.clone()])
            .unwrap_or_default(),
    }
}
