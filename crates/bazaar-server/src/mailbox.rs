//! Polling chat mailbox on top of the store.

use bazaar_shared::protocol::ChatLine;
use bazaar_shared::ProtocolError;
use bazaar_store::ChatMessage;
use chrono::SecondsFormat;

use crate::error::ServerError;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct Mailbox {
    store: Store,
    history_limit: u32,
}

impl Mailbox {
    pub fn new(store: Store, history_limit: u32) -> Self {
        Self {
            store,
            history_limit,
        }
    }

    /// Store a message from `sender` to an existing `recipient`.
    pub async fn send(
        &self,
        sender: &str,
        recipient: &str,
        body: &str,
    ) -> Result<ChatMessage, ServerError> {
        if sender == recipient {
            return Err(ServerError::Forbidden("cannot message yourself".into()));
        }
        if body.is_empty() {
            return Err(ServerError::Protocol(ProtocolError::Malformed("empty message".into())));
        }

        let (sender, recipient, body) = (sender.to_string(), recipient.to_string(), body.to_string());
        self.store
            .call(move |db| {
                if !db.user_exists(&recipient)? {
                    return Err(bazaar_store::StoreError::NotFound);
                }
                db.store_message(&sender, &recipient, &body)
            })
            .await
    }

    /// Every unread message for `user`, marked read as it is returned.
    pub async fn poll_unread(&self, user: &str) -> Result<Vec<ChatLine>, ServerError> {
        self.take(user, None).await
    }

    /// Unread messages from `other` to `user`, marked read as returned.
    pub async fn poll_from(&self, user: &str, other: &str) -> Result<Vec<ChatLine>, ServerError> {
        self.take(user, Some(other.to_string())).await
    }

    async fn take(&self, user: &str, from: Option<String>) -> Result<Vec<ChatLine>, ServerError> {
        let user = user.to_string();
        let messages = self
            .store
            .call(move |db| db.take_unread(&user, from.as_deref()))
            .await?;
        Ok(messages.iter().map(chat_line).collect())
    }

    /// The most recent part of the conversation between `user` and `other`.
    pub async fn history(&self, user: &str, other: &str) -> Result<Vec<ChatLine>, ServerError> {
        let (user, other) = (user.to_string(), other.to_string());
        let limit = self.history_limit;
        let messages = self
            .store
            .call(move |db| db.chat_history(&user, &other, limit))
            .await?;
        Ok(messages.iter().map(chat_line).collect())
    }

    pub async fn conversations(&self, user: &str) -> Result<Vec<String>, ServerError> {
        let user = user.to_string();
        self.store
            .call(move |db| db.conversation_partners(&user))
            .await
    }

    pub async fn has_unread(&self, user: &str, other: &str) -> Result<bool, ServerError> {
        let (user, other) = (user.to_string(), other.to_string());
        self.store
            .call(move |db| db.has_unread_from(&user, &other))
            .await
    }

    /// Mark messages read; `from == None` marks everything addressed to
    /// `user`.
    pub async fn mark_read(&self, user: &str, from: Option<&str>) -> Result<usize, ServerError> {
        let user = user.to_string();
        let from = from.map(str::to_string);
        self.store
            .call(move |db| db.mark_read(&user, from.as_deref()))
            .await
    }
}

pub fn chat_line(message: &ChatMessage) -> ChatLine {
    ChatLine(
        message.sender.clone(),
        message.body.clone(),
        message
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Micros, true),
    )
}
