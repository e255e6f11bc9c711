//! User documents: profile, titles, achievements, statistics.
//!
//! Registration and login live in the external identity service; this
//! module only manages the game-facing user document, created lazily on
//! first authenticated use.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::{
    errors::{ServiceError, ServiceResult},
    store::{self, Patch, Store, StoreError, collections},
};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardTheme {
    pub theme: String,
    pub primary_color: String,
    pub secondary_color: String,
}

impl Default for CardTheme {
    fn default() -> Self {
        Self {
            theme: "classic".to_string(),
            primary_color: "#1e3a5f".to_string(),
            secondary_color: "#f0f0f0".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Title {
    pub name: String,
    pub color: String,
    pub active: bool,
}

/// The closed set of statistic counters. `max_drinks_per_round` is written
/// through the store's monotonic `max` gate.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Statistics {
    pub games_played: i64,
    pub games_won: i64,
    pub drinks_given: i64,
    pub drinks_received: i64,
    pub cards_played: i64,
    pub max_drinks_per_round: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub uploaded_avatar: Option<String>,
    pub card_theme: CardTheme,
    pub title: String,
    pub titles: Vec<Title>,
    pub achievements: Vec<String>,
    pub statistics: Statistics,
}

impl UserDoc {
    fn fresh(id: &str) -> Self {
        // Display names come from the identity service; until one is set the
        // user shows up under a short handle.
        let short = id.get(..6).unwrap_or(id);
        Self {
            id: id.to_string(),
            name: format!("Player-{short}"),
            avatar: "default".to_string(),
            uploaded_avatar: None,
            card_theme: CardTheme::default(),
            title: String::new(),
            titles: vec![Title {
                name: "Rookie".to_string(),
                color: "#9e9e9e".to_string(),
                active: true,
            }],
            achievements: Vec::new(),
            statistics: Statistics::default(),
        }
    }

    /// The avatar clients should render: an upload wins over the picked one.
    pub fn effective_avatar(&self) -> &str {
        self.uploaded_avatar.as_deref().unwrap_or(&self.avatar)
    }
}

/// The account view pushed on the `user` scope and returned by the account
/// endpoint.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub statistics: Statistics,
    pub titles: Vec<Title>,
    pub avatar: String,
}

impl From<&UserDoc> for AccountView {
    fn from(user: &UserDoc) -> Self {
        Self {
            statistics: user.statistics,
            titles: user.titles.clone(),
            avatar: user.effective_avatar().to_string(),
        }
    }
}

pub struct AccountService {
    store: Arc<dyn Store>,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Load the user document, creating a fresh one on first use.
    pub async fn ensure_user(&self, user_id: &str) -> ServiceResult<UserDoc> {
        if let Some(user) =
            store::read_as(self.store.as_ref(), collections::USERS, user_id).await?
        {
            return Ok(user);
        }
        let user = UserDoc::fresh(user_id);
        match self
            .store
            .insert(collections::USERS, user_id, store::to_doc(&user)?)
            .await
        {
            Ok(()) => Ok(user),
            // Lost a race against a concurrent first request; reread.
            Err(StoreError::AlreadyExists { .. }) => {
                store::read_as(self.store.as_ref(), collections::USERS, user_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::internal("User vanished mid-create", "Account Error")
                    })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn account_view(&self, user_id: &str) -> ServiceResult<AccountView> {
        let user = self.ensure_user(user_id).await?;
        Ok(AccountView::from(&user))
    }

    /// Activate one of the user's unlocked titles; exactly one stays active.
    pub async fn set_active_title(&self, user_id: &str, title_name: &str) -> ServiceResult<()> {
        const TITLE: &str = "Title Error";

        let mut user = self.ensure_user(user_id).await?;
        if !user.titles.iter().any(|t| t.name == title_name) {
            return Err(ServiceError::not_found("Title not unlocked", TITLE));
        }
        for title in &mut user.titles {
            title.active = title.name == title_name;
        }
        self.store
            .update(
                collections::USERS,
                user_id,
                Patch::new()
                    .set("titles", store::to_doc(&user.titles)?)
                    .set("title", json!(title_name)),
            )
            .await?;
        Ok(())
    }

    /// Record a freshly uploaded avatar, returning the replaced file (if
    /// any) so the caller can delete it best-effort.
    pub async fn set_uploaded_avatar(
        &self,
        user_id: &str,
        file: &str,
    ) -> ServiceResult<Option<String>> {
        let user = self.ensure_user(user_id).await?;
        let previous = user.uploaded_avatar.clone();
        self.store
            .update(
                collections::USERS,
                user_id,
                Patch::new().set("uploadedAvatar", json!(file)),
            )
            .await?;
        Ok(previous)
    }
}
