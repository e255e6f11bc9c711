//! The abstract document store.
//!
//! Services speak to persistence through the [`Store`] trait: per-document
//! reads, atomic partial updates expressed as dotted-path [`Patch`]es,
//! deletes, and a change feed carrying `{id, op, updated_fields}` events in
//! the order the mutations were applied. The shipped implementation is the
//! in-memory [`MemoryStore`]; a document database would slot in behind the
//! same trait.

pub mod memory;
pub mod patch;

pub use memory::MemoryStore;
pub use patch::{Op, Patch};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// Collection names.
pub mod collections {
    pub const USERS: &str = "users";
    pub const FRIENDS: &str = "friends";
    pub const LOBBIES: &str = "lobbies";
    pub const CHATS: &str = "chats";
    pub const GAMES: &str = "games";
}

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {collection}/{id} does not exist")]
    NotFound { collection: String, id: String },

    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("invalid field path '{path}'")]
    InvalidPath { path: String },

    #[error("failed to decode {collection}/{id}: {source}")]
    Decode {
        collection: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode document: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Insert,
    Update,
    Delete,
}

/// One change-feed entry. Events for a single document are emitted in the
/// order their mutations were applied.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
    pub op: OpType,
    pub updated_fields: Vec<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn read(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// All documents of a collection, for by-field lookups (lobby codes,
    /// friend codes, the public lobby list).
    async fn list(&self, collection: &str) -> Result<Vec<Value>, StoreError>;

    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError>;

    /// Apply `patch` atomically with respect to concurrent readers of the
    /// same document.
    async fn update(&self, collection: &str, id: &str, patch: Patch) -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    fn watch(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Read and decode a document.
pub async fn read_as<T: DeserializeOwned>(
    store: &dyn Store,
    collection: &str,
    id: &str,
) -> Result<Option<T>, StoreError> {
    match store.read(collection, id).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                collection: collection.to_string(),
                id: id.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode a typed model into a document tree.
pub fn to_doc<T: Serialize>(model: &T) -> Result<Value, StoreError> {
    serde_json::to_value(model).map_err(StoreError::Encode)
}
