use super::session::{Session, SessionKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared handle to one session. Transitions hold the async lock, so a chat
/// never has two events applied at once.
pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

/// In-memory registry tracking at most one active session per chat.
///
/// Registry operations (insert-if-absent, lookup, remove) happen under one
/// short std lock and never await; per-session work happens on the
/// session's own async lock.
pub struct SessionStore {
    active: Mutex<HashMap<String, (SessionKey, SessionHandle)>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Register `session` unless the chat already has one.
    /// On conflict the existing key is returned and nothing changes.
    pub fn insert_if_absent(&self, session: Session) -> Result<SessionHandle, SessionKey> {
        let mut guard = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let chat_id = session.key().chat_id.clone();
        if let Some((existing, _)) = guard.get(&chat_id) {
            return Err(existing.clone());
        }
        let key = session.key().clone();
        let handle = Arc::new(tokio::sync::Mutex::new(session));
        guard.insert(chat_id, (key, Arc::clone(&handle)));
        Ok(handle)
    }

    pub fn get(&self, chat_id: &str) -> Option<SessionHandle> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(chat_id)
            .map(|(_, handle)| Arc::clone(handle))
    }

    pub fn has_session(&self, chat_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(chat_id)
    }

    /// Remove the session registered under `key`. A newer session for the
    /// same chat (different correlation id) is left alone.
    pub fn remove(&self, key: &SessionKey) -> bool {
        let mut guard = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match guard.get(&key.chat_id) {
            Some((registered, _)) if registered == key => {
                guard.remove(&key.chat_id);
                true
            }
            _ => false,
        }
    }

    /// Snapshot of every registered session, for the timeout sweep.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|(_, handle)| Arc::clone(handle))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
