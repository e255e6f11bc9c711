//! # Busfahrer
//!
//! The authoritative engine for the Busfahrer drinking card game: lobby
//! lifecycle, per-lobby chat, the friend graph, and the three-phase game
//! state machine, all persisted through an abstract document store whose
//! change feed drives realtime fan-out.
//!
//! ## Architecture
//!
//! Every mutation is a single atomic patch on one document. The store
//! emits `{id, op, updated_fields}` events in application order; the
//! server's dispatcher turns those into per-subscriber frames. Services
//! never talk to sockets.
//!
//! ## Core modules
//!
//! - [`game`]: deck and predicates, turn ordering, the engine, views
//! - [`lobby`]: create/join/spectate/kick/start and master inheritance
//! - [`chat`]: per-lobby message log with a bounded tail
//! - [`friend`]: codes, requests, direct messages, invitations
//! - [`account`]: user documents (titles, achievements, statistics)
//! - [`store`]: the patch-based document store and its change feed

pub mod account;
pub mod chat;
pub mod codes;
pub mod errors;
pub mod friend;
pub mod game;
pub mod lobby;
pub mod store;

pub use errors::{ServiceError, ServiceResult};
pub use game::{GameService, GuessAction};
pub use lobby::LobbyService;
pub use store::{MemoryStore, Patch, Store};
