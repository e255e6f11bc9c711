//! Game-wide constants.

/// Number of cards dealt to every player at game start.
pub const HAND_SIZE: usize = 10;

/// Number of rows in the phase-1 pyramid. Row `r` (1-based) holds `r` cards.
pub const PYRAMID_ROWS: usize = 5;

/// Bottom-up row widths of the phase-3 ride.
pub const RIDE_LAYOUT: [usize; 9] = [2, 2, 3, 4, 5, 4, 3, 2, 2];

/// Index of the final ride row, guessed with equal/unequal.
pub const FINAL_RIDE_ROW: usize = 8;

/// Cards in a double deck (two standard 52-card decks).
pub const DOUBLE_DECK_SIZE: usize = 104;

/// Phase-1 round after which the master may start phase 2.
pub const PHASE1_ROUNDS: u32 = 5;

/// Phase-2 round after which the master may start phase 3.
pub const PHASE2_ROUNDS: u32 = 3;

/// Probability that the chaotic shuffle extends a streak.
pub const CAOTIC_STREAK_PROBABILITY: f64 = 0.3;

/// Rounds of riffling in the riffle shuffle.
pub const RIFFLE_ROUNDS: usize = 7;

/// Cut-point jitter of the riffle shuffle.
pub const RIFFLE_JITTER: i32 = 5;

/// Minimum and maximum player limit a lobby can be configured with.
pub const MIN_PLAYER_LIMIT: usize = 2;
pub const MAX_PLAYER_LIMIT: usize = 10;

/// Length of lobby and friend codes.
pub const CODE_LENGTH: usize = 5;

/// Alphabet lobby and friend codes are sampled from.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Number of chat messages returned to subscribers.
pub const CHAT_TAIL: usize = 15;

/// Number of direct messages per conversation in a friend update.
pub const FRIEND_MESSAGE_TAIL: usize = 13;

/// Pause between flipping the ride face-down and dealing the fresh layout,
/// long enough for clients to render the transition.
pub const RETRY_FLIP_PAUSE_MS: u64 = 350;
