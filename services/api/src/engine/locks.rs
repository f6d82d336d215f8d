//! services/api/src/engine/locks.rs
//!
//! Per-session exclusive sections. The metadata file and the index file are
//! separate on-disk artifacts keyed by the same `(user_id, session_id)` pair;
//! any read-modify-write touching either must hold that session's lock so
//! concurrent requests cannot lose updates or leave the pair inconsistent.
//! Different sessions never contend.

use dashmap::DashMap;
use std::sync::Arc;
use study_assistant_core::domain::SessionKey;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<SessionKey, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for one session, creating it on first use.
    pub fn for_session(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Drops the registry entry once a session is deleted. In-flight holders
    /// keep their Arc; new requests for the same key will get `NotFound`
    /// from the store anyway.
    pub fn remove(&self, key: &SessionKey) {
        self.locks.remove(key);
    }
}
