// Keyed session access. Every load and save for a user happens through a
// SessionLease, and a lease is only handed out while that user's lock is held.

use super::locks::UserLocks;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::SessionBackend;
use crate::atoms::types::Session;
use chrono::{DateTime, Utc};
use log::info;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    locks: UserLocks,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self { backend, locks: UserLocks::new() }
    }

    /// Wait until no other event for `user_id` is in flight.
    pub async fn acquire(&self, user_id: &str) -> SessionLease {
        let guard = self.locks.lock(user_id).await;
        SessionLease {
            user_id: user_id.to_string(),
            backend: self.backend.clone(),
            _guard: guard,
        }
    }

    pub fn active_users(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one user's session until dropped.
pub struct SessionLease {
    user_id: String,
    backend: Arc<dyn SessionBackend>,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLease {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn load(&self) -> EngineResult<Option<Session>> {
        self.backend.load(&self.user_id)
    }

    /// Fresh first-contact session. Not persisted until `save`.
    pub fn create_default(&self, locale: &str, now: DateTime<Utc>) -> Session {
        Session::new_default(&self.user_id, locale, now)
    }

    /// Stored session, or a new default one. The flag is true when created.
    pub fn load_or_create(&self, locale: &str, now: DateTime<Utc>) -> EngineResult<(Session, bool)> {
        match self.load()? {
            Some(session) => Ok((session, false)),
            None => {
                info!("[store] New session for {}", self.user_id);
                Ok((self.create_default(locale, now), true))
            }
        }
    }

    pub fn is_processed(&self, message_id: &str) -> EngineResult<bool> {
        self.backend.is_processed(message_id)
    }

    pub fn save(&self, session: &Session, message_id: Option<&str>) -> EngineResult<()> {
        if session.user_id != self.user_id {
            return Err(EngineError::Store(format!(
                "lease for {} cannot save session of {}",
                self.user_id, session.user_id
            )));
        }
        self.backend.save(session, message_id)
    }
}
