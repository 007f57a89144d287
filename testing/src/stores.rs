//! In-memory implementations of the storage ports.

use async_trait::async_trait;
use cartpilot_core::error::StoreError;
use cartpilot_core::port::{
    CacheStore, EphemeralStore, PersistedSession, PreferenceStore, SessionStore,
};
use cartpilot_core::types::{DebugLogEntry, OrderHistoryCache, SlotPreferences};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, PersistedSession>>,
    fail_writes: Mutex<bool>,
}

impl MemorySessionStore {
    /// A fresh empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail, to exercise the log-and-continue path.
    pub fn fail_writes(&self, fail: bool) {
        *lock(&self.fail_writes) = fail;
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session_id: &str, session: &PersistedSession) -> Result<(), StoreError> {
        if *lock(&self.fail_writes) {
            return Err(StoreError::Io("scripted write failure".to_string()));
        }
        lock(&self.sessions).insert(session_id.to_string(), session.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<PersistedSession>, StoreError> {
        Ok(lock(&self.sessions).get(session_id).cloned())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        lock(&self.sessions).remove(session_id);
        Ok(())
    }
}

/// Ring capacity of the ephemeral debug log.
const DEBUG_RING_CAPACITY: usize = 500;

/// In-memory ephemeral store: API key plus the bounded debug ring.
#[derive(Debug, Default)]
pub struct MemoryEphemeralStore {
    api_key: Mutex<Option<String>>,
    debug_ring: Mutex<VecDeque<DebugLogEntry>>,
}

impl MemoryEphemeralStore {
    /// A fresh empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-loaded with an API key.
    #[must_use]
    pub fn with_api_key(key: impl Into<String>) -> Self {
        let store = Self::default();
        *lock(&store.api_key) = Some(key.into());
        store
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn set_api_key(&self, key: String) {
        *lock(&self.api_key) = Some(key);
    }

    async fn api_key(&self) -> Option<String> {
        lock(&self.api_key).clone()
    }

    async fn clear_api_key(&self) {
        *lock(&self.api_key) = None;
    }

    async fn push_debug(&self, entry: DebugLogEntry) {
        let mut ring = lock(&self.debug_ring);
        if ring.len() == DEBUG_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    async fn debug_log(&self) -> Vec<DebugLogEntry> {
        lock(&self.debug_ring).iter().cloned().collect()
    }
}

/// In-memory preference store.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    slot_prefs: Mutex<Option<SlotPreferences>>,
}

impl MemoryPreferenceStore {
    /// A fresh empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-loaded with slot preferences.
    #[must_use]
    pub fn with_slot_preferences(prefs: SlotPreferences) -> Self {
        let store = Self::default();
        *lock(&store.slot_prefs) = Some(prefs);
        store
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn slot_preferences(&self) -> Option<SlotPreferences> {
        lock(&self.slot_prefs).clone()
    }

    async fn save_slot_preferences(&self, prefs: &SlotPreferences) -> Result<(), StoreError> {
        *lock(&self.slot_prefs) = Some(prefs.clone());
        Ok(())
    }
}

/// In-memory order-history cache.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    histories: Mutex<HashMap<String, OrderHistoryCache>>,
}

impl MemoryCacheStore {
    /// A fresh empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn order_history(&self, household_id: &str) -> Option<OrderHistoryCache> {
        lock(&self.histories).get(household_id).cloned()
    }

    async fn save_order_history(
        &self,
        household_id: &str,
        cache: &OrderHistoryCache,
    ) -> Result<(), StoreError> {
        lock(&self.histories).insert(household_id.to_string(), cache.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn debug_ring_caps_at_500() {
        let store = MemoryEphemeralStore::new();
        for i in 0..510 {
            store
                .push_debug(DebugLogEntry {
                    at: Utc::now(),
                    component: "test".into(),
                    message: format!("entry {i}"),
                })
                .await;
        }
        let log = store.debug_log().await;
        assert_eq!(log.len(), 500);
        assert_eq!(log[0].message, "entry 10");
    }

    #[tokio::test]
    async fn session_store_round_trip() {
        use cartpilot_core::state::RunState;
        let store = MemorySessionStore::new();
        let session = PersistedSession {
            state: RunState::idle("run-1", Utc::now()),
            checkpoint: None,
            household_id: None,
        };
        assert!(store.save("s-1", &session).await.is_ok());
        let loaded = store.load("s-1").await;
        assert!(loaded.is_ok_and(|s| s.is_some()));
        assert!(store.delete("s-1").await.is_ok());
        let loaded = store.load("s-1").await;
        assert!(loaded.is_ok_and(|s| s.is_none()));
    }

    #[tokio::test]
    async fn scripted_write_failure() {
        use cartpilot_core::state::RunState;
        let store = MemorySessionStore::new();
        store.fail_writes(true);
        let session = PersistedSession {
            state: RunState::idle("run-1", Utc::now()),
            checkpoint: None,
            household_id: None,
        };
        assert!(store.save("s-1", &session).await.is_err());
    }
}
