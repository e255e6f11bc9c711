//! In-memory store backing the single-process authoritative model.

use serde_json::Value;
use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{ChangeEvent, OpType, Patch, Store, StoreError};

const FEED_CAPACITY: usize = 1024;

type Documents = HashMap<String, HashMap<String, Value>>;

/// Thread-safe in-memory document store. All mutations and their change-feed
/// emissions happen under one lock, which linearises the feed per document.
pub struct MemoryStore {
    inner: Mutex<Documents>,
    feed: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Mutex::new(HashMap::new()),
            feed,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Documents> {
        // A poisoned lock means a panic mid-mutation; the document map has no
        // partially applied patches (apply happens on a clone), so continue.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let docs = inner.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        docs.insert(id.to_string(), doc);
        let _ = self.feed.send(ChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            op: OpType::Insert,
            updated_fields: Vec::new(),
        });
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Patch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock();
        let doc = inner
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        // Apply on a clone so a bad path leaves the document untouched.
        let mut next = doc.clone();
        patch.apply(&mut next)?;
        *doc = next;
        let _ = self.feed.send(ChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            op: OpType::Update,
            updated_fields: patch.paths(),
        });
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let removed = inner
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if !removed {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        let _ = self.feed.send(ChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            op: OpType::Delete,
            updated_fields: Vec::new(),
        });
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_insert_read_delete() {
        let store = MemoryStore::new();
        store
            .insert("lobbies", "l1", json!({"name": "Stammtisch"}))
            .await
            .unwrap();
        let doc = store.read("lobbies", "l1").await.unwrap().unwrap();
        assert_eq!(doc["name"], json!("Stammtisch"));

        store.delete("lobbies", "l1").await.unwrap();
        assert!(store.read("lobbies", "l1").await.unwrap().is_none());
        assert!(matches!(
            store.delete("lobbies", "l1").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_double_insert_rejected() {
        let store = MemoryStore::new();
        store.insert("users", "u1", json!({})).await.unwrap();
        assert!(matches!(
            store.insert("users", "u1", json!({})).await,
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_emits_ordered_events() {
        let store = MemoryStore::new();
        store
            .insert("games", "g1", json!({"gameInfo": {"roundNr": 1}}))
            .await
            .unwrap();
        let mut feed = store.watch();

        store
            .update("games", "g1", Patch::new().inc("gameInfo.roundNr", 1))
            .await
            .unwrap();
        store
            .update("games", "g1", Patch::new().set("status", json!("PHASE2")))
            .await
            .unwrap();

        let first = feed.recv().await.unwrap();
        assert_eq!(first.op, OpType::Update);
        assert_eq!(first.updated_fields, vec!["gameInfo.roundNr"]);
        let second = feed.recv().await.unwrap();
        assert_eq!(second.updated_fields, vec!["status"]);
    }

    #[tokio::test]
    async fn test_bad_patch_leaves_document_untouched() {
        let store = MemoryStore::new();
        store
            .insert("games", "g1", json!({"cards": []}))
            .await
            .unwrap();
        let result = store
            .update(
                "games",
                "g1",
                Patch::new()
                    .set("status", json!("PHASE2"))
                    .set("cards.5.flipped", json!(true)),
            )
            .await;
        assert!(matches!(result, Err(StoreError::InvalidPath { .. })));
        let doc = store.read("games", "g1").await.unwrap().unwrap();
        assert!(doc.get("status").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_incs_are_atomic() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("games", "g1", json!({"counter": 0}))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update("games", "g1", Patch::new().inc("counter", 1))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let doc = store.read("games", "g1").await.unwrap().unwrap();
        assert_eq!(doc["counter"], json!(64));
    }
}
