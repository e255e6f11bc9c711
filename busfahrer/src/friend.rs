//! Friend graph: codes, requests, 1:1 messages, invitations.
//!
//! Every pair operation mutates both sides through one atomic patch per
//! document; the pair invariant (A lists B iff B lists A) holds after each
//! operation because both patches are derived from the same validated read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::{
    codes::random_code,
    errors::{ServiceError, ServiceResult},
    game::constants::FRIEND_MESSAGE_TAIL,
    store::{self, Patch, Store, StoreError, collections},
};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendMessage {
    pub from: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendEntry {
    pub user_id: String,
    pub username: String,
    pub avatar: String,
    pub messages: Vec<FriendMessage>,
    pub unread_count: u32,
}

/// A lightweight reference used in request lists.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRef {
    pub user_id: String,
    pub username: String,
    pub avatar: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub lobby_id: String,
    pub player: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendDoc {
    pub id: String,
    pub friend_code: String,
    pub username: String,
    pub avatar: String,
    pub friends: Vec<FriendEntry>,
    pub sent_requests: Vec<FriendRef>,
    pub pending_requests: Vec<FriendRef>,
    pub blocked_users: Vec<String>,
    pub invitations: Vec<Invitation>,
}

impl FriendDoc {
    pub fn friend_entry(&self, user_id: &str) -> Option<(usize, &FriendEntry)> {
        self.friends
            .iter()
            .enumerate()
            .find(|(_, f)| f.user_id == user_id)
    }

    pub fn is_friend(&self, user_id: &str) -> bool {
        self.friend_entry(user_id).is_some()
    }

    pub fn has_pending_from(&self, user_id: &str) -> bool {
        self.pending_requests.iter().any(|r| r.user_id == user_id)
    }

    pub fn has_sent_to(&self, user_id: &str) -> bool {
        self.sent_requests.iter().any(|r| r.user_id == user_id)
    }

    fn as_ref_entry(&self) -> FriendRef {
        FriendRef {
            user_id: self.id.clone(),
            username: self.username.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// A conversation trimmed to the trailing messages, as sent in
/// `friendUpdate` frames.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendTail {
    pub user_id: String,
    pub username: String,
    pub avatar: String,
    pub messages: Vec<FriendMessage>,
    pub unread_count: u32,
}

impl From<&FriendEntry> for FriendTail {
    fn from(entry: &FriendEntry) -> Self {
        let skip = entry.messages.len().saturating_sub(FRIEND_MESSAGE_TAIL);
        Self {
            user_id: entry.user_id.clone(),
            username: entry.username.clone(),
            avatar: entry.avatar.clone(),
            messages: entry.messages[skip..].to_vec(),
            unread_count: entry.unread_count,
        }
    }
}

/// The view pushed on the `friends` scope and returned over HTTP.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendView {
    pub friend_code: String,
    pub requests: Vec<FriendRef>,
    pub friends: Vec<FriendTail>,
    pub invitations: Vec<Invitation>,
}

impl From<&FriendDoc> for FriendView {
    fn from(doc: &FriendDoc) -> Self {
        Self {
            friend_code: doc.friend_code.clone(),
            requests: doc.pending_requests.clone(),
            friends: doc.friends.iter().map(FriendTail::from).collect(),
            invitations: doc.invitations.clone(),
        }
    }
}

pub struct FriendService {
    store: Arc<dyn Store>,
}

impl FriendService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Load the caller's friend record, creating one (with a fresh code) on
    /// first use.
    pub async fn ensure_record(&self, user_id: &str, username: &str) -> ServiceResult<FriendDoc> {
        if let Some(doc) =
            store::read_as(self.store.as_ref(), collections::FRIENDS, user_id).await?
        {
            return Ok(doc);
        }
        let doc = FriendDoc {
            id: user_id.to_string(),
            friend_code: self.fresh_code().await?,
            username: username.to_string(),
            avatar: "default".to_string(),
            friends: Vec::new(),
            sent_requests: Vec::new(),
            pending_requests: Vec::new(),
            blocked_users: Vec::new(),
            invitations: Vec::new(),
        };
        match self
            .store
            .insert(collections::FRIENDS, user_id, store::to_doc(&doc)?)
            .await
        {
            Ok(()) => Ok(doc),
            Err(StoreError::AlreadyExists { .. }) => {
                store::read_as(self.store.as_ref(), collections::FRIENDS, user_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::internal("Friend record vanished mid-create", "Friend Error")
                    })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn fresh_code(&self) -> ServiceResult<String> {
        loop {
            let code = random_code();
            if self.find_by_code(&code).await?.is_none() {
                return Ok(code);
            }
        }
    }

    async fn find_by_code(&self, code: &str) -> ServiceResult<Option<FriendDoc>> {
        let docs = self.store.list(collections::FRIENDS).await?;
        for value in docs {
            let doc: FriendDoc = serde_json::from_value(value)
                .map_err(|e| ServiceError::internal(e.to_string(), "Friend Error"))?;
            if doc.friend_code.eq_ignore_ascii_case(code) {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    async fn load(&self, user_id: &str, title: &str) -> ServiceResult<FriendDoc> {
        store::read_as(self.store.as_ref(), collections::FRIENDS, user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Friend record not found", title))
    }

    pub async fn view(&self, user_id: &str, username: &str) -> ServiceResult<FriendView> {
        let doc = self.ensure_record(user_id, username).await?;
        Ok(FriendView::from(&doc))
    }

    /// Send a request to the holder of `friend_code`.
    pub async fn send_request(&self, user_id: &str, friend_code: &str) -> ServiceResult<()> {
        const TITLE: &str = "Friend Request Error";

        let me = self.load(user_id, TITLE).await?;
        let target = self
            .find_by_code(friend_code)
            .await?
            .ok_or_else(|| ServiceError::not_found("No player with that code", TITLE))?;

        if target.id == user_id {
            return Err(ServiceError::precondition(
                "You can't befriend yourself",
                TITLE,
            ));
        }
        if me.is_friend(&target.id) {
            return Err(ServiceError::precondition("Already friends", TITLE));
        }
        if me.has_sent_to(&target.id) {
            return Err(ServiceError::precondition("Request already sent", TITLE));
        }
        if me.has_pending_from(&target.id) {
            return Err(ServiceError::precondition(
                "That player already sent you a request",
                TITLE,
            ));
        }
        if target.blocked_users.iter().any(|id| id == user_id) {
            return Err(ServiceError::forbidden("Request rejected", TITLE));
        }

        self.store
            .update(
                collections::FRIENDS,
                user_id,
                Patch::new().push("sentRequests", store::to_doc(&target.as_ref_entry())?),
            )
            .await?;
        self.store
            .update(
                collections::FRIENDS,
                &target.id,
                Patch::new().push("pendingRequests", store::to_doc(&me.as_ref_entry())?),
            )
            .await?;
        log::info!("friend request: {user_id} -> {}", target.id);
        Ok(())
    }

    /// Accept a pending request: both sides gain a friend entry atomically
    /// per document.
    pub async fn accept_request(&self, user_id: &str, friend_id: &str) -> ServiceResult<()> {
        const TITLE: &str = "Friend Request Error";

        let me = self.load(user_id, TITLE).await?;
        let other = self.load(friend_id, TITLE).await?;
        if !me.has_pending_from(friend_id) {
            return Err(ServiceError::precondition("No request from that player", TITLE));
        }

        self.store
            .update(
                collections::FRIENDS,
                user_id,
                Patch::new()
                    .pull("pendingRequests", json!({ "userId": friend_id }))
                    .push("friends", store::to_doc(&new_entry(&other))?),
            )
            .await?;
        self.store
            .update(
                collections::FRIENDS,
                friend_id,
                Patch::new()
                    .pull("sentRequests", json!({ "userId": user_id }))
                    .push("friends", store::to_doc(&new_entry(&me))?),
            )
            .await?;
        Ok(())
    }

    pub async fn decline_request(&self, user_id: &str, friend_id: &str) -> ServiceResult<()> {
        const TITLE: &str = "Friend Request Error";

        let me = self.load(user_id, TITLE).await?;
        if !me.has_pending_from(friend_id) {
            return Err(ServiceError::precondition("No request from that player", TITLE));
        }
        self.store
            .update(
                collections::FRIENDS,
                user_id,
                Patch::new().pull("pendingRequests", json!({ "userId": friend_id })),
            )
            .await?;
        self.store
            .update(
                collections::FRIENDS,
                friend_id,
                Patch::new().pull("sentRequests", json!({ "userId": user_id })),
            )
            .await?;
        Ok(())
    }

    pub async fn remove_friend(&self, user_id: &str, friend_id: &str) -> ServiceResult<()> {
        const TITLE: &str = "Friend Error";

        let me = self.load(user_id, TITLE).await?;
        if !me.is_friend(friend_id) {
            return Err(ServiceError::not_found("Not in your friend list", TITLE));
        }
        self.store
            .update(
                collections::FRIENDS,
                user_id,
                Patch::new().pull("friends", json!({ "userId": friend_id })),
            )
            .await?;
        self.store
            .update(
                collections::FRIENDS,
                friend_id,
                Patch::new().pull("friends", json!({ "userId": user_id })),
            )
            .await?;
        Ok(())
    }

    /// Append a direct message to both sides and bump the receiver's unread
    /// counter. The sender's copy is labelled "You".
    pub async fn send_message(
        &self,
        user_id: &str,
        friend_id: &str,
        message: &str,
    ) -> ServiceResult<()> {
        const TITLE: &str = "Message Error";

        let me = self.load(user_id, TITLE).await?;
        let other = self.load(friend_id, TITLE).await?;
        let (my_idx, _) = me
            .friend_entry(friend_id)
            .ok_or_else(|| ServiceError::not_found("Not in your friend list", TITLE))?;
        let (their_idx, _) = other
            .friend_entry(user_id)
            .ok_or_else(|| ServiceError::not_found("Not in your friend list", TITLE))?;
        if message.trim().is_empty() {
            return Err(ServiceError::precondition("Message is empty", TITLE));
        }

        let timestamp = Utc::now();
        let mine = FriendMessage {
            from: "You".to_string(),
            message: message.to_string(),
            timestamp,
        };
        let theirs = FriendMessage {
            from: me.username.clone(),
            message: message.to_string(),
            timestamp,
        };

        self.store
            .update(
                collections::FRIENDS,
                user_id,
                Patch::new().push(format!("friends.{my_idx}.messages"), store::to_doc(&mine)?),
            )
            .await?;
        self.store
            .update(
                collections::FRIENDS,
                friend_id,
                Patch::new()
                    .push(
                        format!("friends.{their_idx}.messages"),
                        store::to_doc(&theirs)?,
                    )
                    .inc(format!("friends.{their_idx}.unreadCount"), 1),
            )
            .await?;
        Ok(())
    }

    /// Zero the unread counter for one conversation, caller's side only.
    pub async fn mark_messages_read(&self, user_id: &str, friend_id: &str) -> ServiceResult<()> {
        const TITLE: &str = "Message Error";

        let me = self.load(user_id, TITLE).await?;
        let (idx, _) = me
            .friend_entry(friend_id)
            .ok_or_else(|| ServiceError::not_found("Not in your friend list", TITLE))?;
        self.store
            .update(
                collections::FRIENDS,
                user_id,
                Patch::new().set(format!("friends.{idx}.unreadCount"), json!(0)),
            )
            .await?;
        Ok(())
    }
}

fn new_entry(doc: &FriendDoc) -> FriendEntry {
    FriendEntry {
        user_id: doc.id.clone(),
        username: doc.username.clone(),
        avatar: doc.avatar.clone(),
        messages: Vec::new(),
        unread_count: 0,
    }
}
