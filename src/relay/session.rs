//! Conversation sessions.
//!
//! A session is bound to the model id that was current when it was created
//! and is only extended by text-only exchanges. `reset` drops the session
//! itself; the next lookup creates a fresh one.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: Role::Model, text: text.into() }
    }
}

#[derive(Debug)]
pub struct Session {
    pub model_id: String,
    pub history: Vec<Turn>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Record one completed exchange.
    pub fn push_exchange(&mut self, prompt: &str, reply: &str) {
        self.history.push(Turn::user(prompt));
        self.history.push(Turn::model(reply));
    }
}

/// Session handle. Locked only to read or append history.
pub type SharedSession = Arc<Mutex<Session>>;

/// Who shares a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionScope {
    /// One conversation for every user.
    #[default]
    Global,
    /// One conversation per user.
    PerUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SessionKey {
    Global,
    User(i64),
}

pub struct SessionStore {
    scope: SessionScope,
    sessions: HashMap<SessionKey, SharedSession>,
}

impl SessionStore {
    pub fn new(scope: SessionScope) -> Self {
        Self {
            scope,
            sessions: HashMap::new(),
        }
    }

    pub fn scope(&self) -> SessionScope {
        self.scope
    }

    fn key(&self, user_id: i64) -> SessionKey {
        match self.scope {
            SessionScope::Global => SessionKey::Global,
            SessionScope::PerUser => SessionKey::User(user_id),
        }
    }

    /// Existing session for `user_id`, or a new one bound to `model_id`.
    pub fn get_or_create(&mut self, user_id: i64, model_id: &str) -> SharedSession {
        let key = self.key(user_id);
        self.sessions
            .entry(key)
            .or_insert_with(|| {
                info!("New session on {model_id} ({key:?})");
                Arc::new(Mutex::new(Session::new(model_id)))
            })
            .clone()
    }

    /// Drop the session for `user_id`. Returns whether one existed.
    pub fn reset(&mut self, user_id: i64) -> bool {
        let key = self.key(user_id);
        self.sessions.remove(&key).is_some()
    }

    pub fn get(&self, user_id: i64) -> Option<SharedSession> {
        self.sessions.get(&self.key(user_id)).cloned()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionScope::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_reuses_session() {
        let mut store = SessionStore::default();
        let first = store.get_or_create(1, "model-a");
        first.lock().await.push_exchange("hi", "hello");

        let again = store.get_or_create(1, "model-b");
        let session = again.lock().await;
        assert_eq!(session.model_id, "model-a");
        assert_eq!(session.history.len(), 2);
    }

    #[tokio::test]
    async fn test_reset_rebinds_to_current_model() {
        let mut store = SessionStore::default();
        store.get_or_create(1, "model-a").lock().await.push_exchange("hi", "hello");

        assert!(store.reset(1));
        assert!(store.get(1).is_none());

        let fresh = store.get_or_create(1, "model-b");
        let session = fresh.lock().await;
        assert_eq!(session.model_id, "model-b");
        assert!(session.history.is_empty());
    }

    #[test]
    fn test_reset_without_session() {
        let mut store = SessionStore::default();
        assert!(!store.reset(1));
    }

    #[tokio::test]
    async fn test_global_scope_is_shared() {
        let mut store = SessionStore::new(SessionScope::Global);
        store.get_or_create(1, "m").lock().await.push_exchange("a", "b");
        let other = store.get_or_create(2, "m");
        assert_eq!(other.lock().await.history.len(), 2);

        // Reset from any user clears the shared session
        assert!(store.reset(2));
        assert!(store.get(1).is_none());
    }

    #[tokio::test]
    async fn test_per_user_scope_is_isolated() {
        let mut store = SessionStore::new(SessionScope::PerUser);
        store.get_or_create(1, "m").lock().await.push_exchange("a", "b");
        let other = store.get_or_create(2, "m");
        assert!(other.lock().await.history.is_empty());

        store.reset(2);
        assert!(store.get(1).is_some());
    }

    #[test]
    fn test_turn_roles() {
        assert_eq!(Turn::user("x").role.as_str(), "user");
        assert_eq!(Turn::model("x").role.as_str(), "model");
    }
}
