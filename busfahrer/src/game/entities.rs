//! Cards, decks, shuffle algorithms, and the match predicates.

use rand::{
    Rng,
    seq::{IndexedRandom, SliceRandom},
};
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt};

use super::constants::{CAOTIC_STREAK_PROBABILITY, RIFFLE_JITTER, RIFFLE_ROUNDS};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Suit {
    Hearts,
    Diamonds,
    Clubs,
    Spades,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Hearts, Suit::Diamonds, Suit::Clubs, Suit::Spades];
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let repr = match self {
            Self::Hearts => "♥",
            Self::Diamonds => "♦",
            Self::Clubs => "♣",
            Self::Spades => "♠",
        };
        write!(f, "{repr}")
    }
}

/// A card is a number (2..=14, with 11=J, 12=Q, 13=K, 14=A) and a suit.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Card {
    pub number: u8,
    pub suit: Suit,
}

impl Card {
    pub const fn new(number: u8, suit: Suit) -> Self {
        Self { number, suit }
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let number = match self.number {
            14 => "A",
            11 => "J",
            12 => "Q",
            13 => "K",
            n => &n.to_string(),
        };
        write!(f, "{:>3}{}", number, self.suit)
    }
}

/// How two cards are compared when laying onto a row.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Matching {
    Exact,
    TypeOnly,
    #[default]
    NumberOnly,
}

impl Matching {
    /// Whether `a` matches `b` under this rule.
    pub fn matches(self, a: Card, b: Card) -> bool {
        match self {
            Self::Exact => a.number == b.number && a.suit == b.suit,
            Self::TypeOnly => a.suit == b.suit,
            Self::NumberOnly => a.number == b.number,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Shuffling {
    #[default]
    FisherYates,
    Caotic,
    Riffle,
}

/// How laid drinks are handed out in phase 1.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Giving {
    #[default]
    Default,
    Avatar,
}

/// Turn-order progression mode.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Turning {
    #[default]
    Default,
    Reverse,
    Random,
}

/// How the busfahrer is elected for phase 3.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum BusMode {
    #[default]
    Default,
    Reverse,
    Random,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Other,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Master,
    Player,
    Spectator,
}

/// A double deck: two copies of each of the 52 standard cards.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Deck {
    cards: Vec<Card>,
}

impl Deck {
    /// Build the unshuffled 104-card double deck.
    pub fn double() -> Self {
        let mut cards = Vec::with_capacity(104);
        for _ in 0..2 {
            for number in 2u8..=14 {
                for suit in Suit::ALL {
                    cards.push(Card::new(number, suit));
                }
            }
        }
        Self { cards }
    }

    /// Build and shuffle in one go.
    pub fn shuffled(shuffling: Shuffling) -> Self {
        let mut deck = Self::double();
        deck.shuffle(shuffling);
        deck
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Deal the top card. Callers are responsible for sizing the deal to the
    /// deck; see `Deck::can_deal`.
    pub fn deal(&mut self) -> Option<Card> {
        self.cards.pop()
    }

    /// Deal `n` cards at once.
    pub fn deal_many(&mut self, n: usize) -> Vec<Card> {
        let at = self.cards.len().saturating_sub(n);
        self.cards.split_off(at)
    }

    /// Whether `n` more cards can be dealt.
    pub fn can_deal(&self, n: usize) -> bool {
        self.cards.len() >= n
    }

    pub fn shuffle(&mut self, shuffling: Shuffling) {
        let mut rng = rand::rng();
        match shuffling {
            Shuffling::FisherYates => self.cards.shuffle(&mut rng),
            Shuffling::Caotic => self.caotic_shuffle(&mut rng),
            Shuffling::Riffle => self.riffle_shuffle(&mut rng),
        }
    }

    /// Draw uniformly from the remaining pile, except that with a fixed
    /// probability the draw is restricted to cards sharing the tail card's
    /// number or suit, producing streaks.
    fn caotic_shuffle<R: Rng>(&mut self, rng: &mut R) {
        let mut remaining = std::mem::take(&mut self.cards);
        let mut out: Vec<Card> = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let idx = match out.last() {
                Some(&tail) if rng.random_bool(CAOTIC_STREAK_PROBABILITY) => {
                    let related: Vec<usize> = remaining
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| c.number == tail.number || c.suit == tail.suit)
                        .map(|(i, _)| i)
                        .collect();
                    match related.choose(rng) {
                        Some(&i) => i,
                        None => rng.random_range(0..remaining.len()),
                    }
                }
                _ => rng.random_range(0..remaining.len()),
            };
            out.push(remaining.swap_remove(idx));
        }
        self.cards = out;
    }

    /// Seven rounds of cutting near the middle (jitter ±5) and interleaving
    /// the halves, picking each side with probability 0.5.
    fn riffle_shuffle<R: Rng>(&mut self, rng: &mut R) {
        for _ in 0..RIFFLE_ROUNDS {
            let len = self.cards.len() as i32;
            let cut = (len / 2 + rng.random_range(-RIFFLE_JITTER..=RIFFLE_JITTER)).clamp(1, len - 1)
                as usize;
            let mut right: VecDeque<Card> = self.cards.split_off(cut).into();
            let mut left: VecDeque<Card> = std::mem::take(&mut self.cards).into();
            let mut merged = Vec::with_capacity(left.len() + right.len());
            while !left.is_empty() || !right.is_empty() {
                let from_left = if right.is_empty() {
                    true
                } else if left.is_empty() {
                    false
                } else {
                    rng.random_bool(0.5)
                };
                let card = if from_left {
                    left.pop_front()
                } else {
                    right.pop_front()
                };
                if let Some(card) = card {
                    merged.push(card);
                }
            }
            self.cards = merged;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn card_counts(cards: &[Card]) -> HashMap<Card, usize> {
        let mut counts = HashMap::new();
        for &card in cards {
            *counts.entry(card).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_double_deck_composition() {
        let deck = Deck::double();
        assert_eq!(deck.len(), 104);
        let counts = card_counts(deck.cards());
        assert_eq!(counts.len(), 52);
        assert!(counts.values().all(|&n| n == 2));
    }

    #[test]
    fn test_shuffles_preserve_multiset() {
        for shuffling in [Shuffling::FisherYates, Shuffling::Caotic, Shuffling::Riffle] {
            let deck = Deck::shuffled(shuffling);
            assert_eq!(deck.len(), 104, "{shuffling:?} changed the deck size");
            assert_eq!(
                card_counts(deck.cards()),
                card_counts(Deck::double().cards()),
                "{shuffling:?} changed the deck contents"
            );
        }
    }

    #[test]
    fn test_deal_many() {
        let mut deck = Deck::double();
        let dealt = deck.deal_many(10);
        assert_eq!(dealt.len(), 10);
        assert_eq!(deck.len(), 94);
        assert!(deck.can_deal(94));
        assert!(!deck.can_deal(95));
    }

    #[test]
    fn test_match_number_only() {
        let five_hearts = Card::new(5, Suit::Hearts);
        let five_spades = Card::new(5, Suit::Spades);
        let six_hearts = Card::new(6, Suit::Hearts);
        assert!(Matching::NumberOnly.matches(five_hearts, five_spades));
        assert!(!Matching::NumberOnly.matches(five_hearts, six_hearts));
    }

    #[test]
    fn test_match_exact_and_type() {
        let a = Card::new(9, Suit::Clubs);
        assert!(Matching::Exact.matches(a, Card::new(9, Suit::Clubs)));
        assert!(!Matching::Exact.matches(a, Card::new(9, Suit::Spades)));
        assert!(Matching::TypeOnly.matches(a, Card::new(2, Suit::Clubs)));
        assert!(!Matching::TypeOnly.matches(a, Card::new(9, Suit::Hearts)));
    }

    #[test]
    fn test_matching_default_is_number_only() {
        assert_eq!(Matching::default(), Matching::NumberOnly);
    }

    #[test]
    fn test_card_display() {
        assert_eq!(Card::new(14, Suit::Spades).to_string(), "  A♠");
        assert_eq!(Card::new(10, Suit::Hearts).to_string(), " 10♥");
    }
}
