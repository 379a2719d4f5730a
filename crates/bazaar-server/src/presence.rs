//! In-memory presence and active-chat registry.
//!
//! Two maps, each behind its own mutex: authenticated sessions keyed by
//! username, and the set of counterparts each user currently has a chat
//! view open with. Neither map is persisted; a restart starts from nothing.
//! Only [`PresenceRegistry::unregister`] holds both locks, taking `sessions`
//! before `chats`; nothing takes them in the other order.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use bazaar_shared::types::ChatStatus;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::ServerError;

/// The connection a username is currently bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub peer: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            peer,
            connected_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0} is already online")]
pub struct AlreadyOnline(pub String);

impl From<AlreadyOnline> for ServerError {
    fn from(err: AlreadyOnline) -> Self {
        ServerError::AuthFailure(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
    chats: Arc<Mutex<HashMap<String, HashSet<String>>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user` to `handle`. The check and the insert happen under one
    /// lock acquisition, so two racing logins cannot both succeed.
    pub async fn register(&self, user: &str, handle: SessionHandle) -> Result<(), AlreadyOnline> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(user) {
            return Err(AlreadyOnline(user.to_string()));
        }
        debug!(user = %user, session = %handle.session_id, peer = %handle.peer, "Registered session");
        sessions.insert(user.to_string(), handle);
        Ok(())
    }

    /// Remove `user` if the entry still belongs to `session_id`, and drop
    /// every chat marker the user owns. Returns whether an entry was removed.
    ///
    /// The markers are cleared before the sessions lock is released, so a
    /// fresh login for the same user never loses markers it set.
    pub async fn unregister(&self, user: &str, session_id: Uuid) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(user) {
            Some(handle) if handle.session_id == session_id => {
                sessions.remove(user);
                self.chats.lock().await.remove(user);
                debug!(user = %user, session = %session_id, "Unregistered session");
                true
            }
            _ => false,
        }
    }

    pub async fn is_online(&self, user: &str) -> bool {
        self.sessions.lock().await.contains_key(user)
    }

    pub async fn session(&self, user: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.get(user).cloned()
    }

    pub async fn mark_chat_open(&self, user: &str, counterpart: &str) {
        self.chats
            .lock()
            .await
            .entry(user.to_string())
            .or_default()
            .insert(counterpart.to_string());
    }

    pub async fn mark_chat_closed(&self, user: &str, counterpart: &str) {
        let mut chats = self.chats.lock().await;
        if let Some(open) = chats.get_mut(user) {
            open.remove(counterpart);
            if open.is_empty() {
                chats.remove(user);
            }
        }
    }

    /// How `counterpart` appears to `viewer`. An offline counterpart is
    /// `Offline` even if a stale marker names the viewer.
    pub async fn chat_status(&self, viewer: &str, counterpart: &str) -> ChatStatus {
        if !self.is_online(counterpart).await {
            return ChatStatus::Offline;
        }

        let chats = self.chats.lock().await;
        let opened_by = |owner: &str, other: &str| {
            chats
                .get(owner)
                .map_or(false, |open| open.contains(other))
        };
        if opened_by(counterpart, viewer) || opened_by(viewer, counterpart) {
            ChatStatus::InChatWithViewer
        } else {
            ChatStatus::Online
        }
    }

    /// Snapshot of the online usernames, sorted.
    pub async fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        users.sort();
        users
    }
}
