//! Core game logic: deck, turn ordering, document model, the three-phase
//! engine, and derived views.

pub mod constants;
pub mod engine;
pub mod entities;
pub mod models;
pub mod turn;
pub mod views;

pub use engine::{GameService, GuessAction, LeaveGameOutcome, build_game};
pub use models::{GameDoc, GameStatus};
