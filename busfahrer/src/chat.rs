//! Per-lobby chat with a bounded tail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    errors::{ServiceError, ServiceResult},
    game::constants::CHAT_TAIL,
    lobby::models::LobbyDoc,
    store::{self, Patch, Store, collections},
};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDoc {
    pub id: String,
    pub name: String,
    pub chat_code: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatDoc {
    /// The last messages, oldest first.
    pub fn tail(&self) -> &[ChatMessage] {
        let skip = self.messages.len().saturating_sub(CHAT_TAIL);
        &self.messages[skip..]
    }
}

pub struct ChatService {
    store: Arc<dyn Store>,
}

impl ChatService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append a message. The sender must be a player or spectator of the
    /// lobby the chat belongs to.
    pub async fn send_message(
        &self,
        user_id: &str,
        chat_id: &str,
        message: &str,
    ) -> ServiceResult<()> {
        const TITLE: &str = "Chat Error";

        let lobby: LobbyDoc = store::read_as(self.store.as_ref(), collections::LOBBIES, chat_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Lobby not found", TITLE))?;
        let member = lobby
            .player(user_id)
            .or_else(|| lobby.spectator(user_id))
            .ok_or_else(|| ServiceError::not_found("Player not found", TITLE))?;
        if message.trim().is_empty() {
            return Err(ServiceError::precondition("Message is empty", TITLE));
        }

        let entry = ChatMessage {
            id: Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            name: member.name.clone(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        self.store
            .update(
                collections::CHATS,
                chat_id,
                Patch::new().push("messages", store::to_doc(&entry)?),
            )
            .await?;
        Ok(())
    }

    /// The bounded message tail, membership-checked.
    pub async fn messages(&self, user_id: &str, chat_id: &str) -> ServiceResult<Vec<ChatMessage>> {
        const TITLE: &str = "Chat Error";

        let lobby: LobbyDoc = store::read_as(self.store.as_ref(), collections::LOBBIES, chat_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Lobby not found", TITLE))?;
        if !lobby.is_member(user_id) {
            return Err(ServiceError::not_found("Player not found", TITLE));
        }
        let chat: ChatDoc = store::read_as(self.store.as_ref(), collections::CHATS, chat_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Chat not found", TITLE))?;
        Ok(chat.tail().to_vec())
    }
}
