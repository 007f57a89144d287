//! Storage port implementations.
//!
//! Persistent stores are JSON files written atomically: the payload lands
//! in a temp file first and is renamed into place, so a crash mid-write
//! never corrupts the last good state. Within one run the orchestrator is
//! the only writer, so last-writer-wins is safe.

use async_trait::async_trait;
use cartpilot_core::error::StoreError;
use cartpilot_core::port::{
    CacheStore, EphemeralStore, PersistedSession, PreferenceStore, SessionStore,
};
use cartpilot_core::types::{DebugLogEntry, OrderHistoryCache, SlotPreferences};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const DEBUG_RING_CAPACITY: usize = 500;

fn io_err(err: std::io::Error) -> StoreError {
    StoreError::Io(err.to_string())
}

async fn atomic_write<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let temp = path.with_extension("json.tmp");
    tokio::fs::write(&temp, &json).await.map_err(io_err)?;
    tokio::fs::rename(&temp, path).await.map_err(io_err)?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Serialization(e.to_string())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(err)),
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File-backed session store: `sessions/{session_id}.json`.
#[derive(Clone, Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// A store rooted at `dir` (created on first write).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(session_id)))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, session_id: &str, session: &PersistedSession) -> Result<(), StoreError> {
        atomic_write(&self.path_for(session_id), session).await
    }

    async fn load(&self, session_id: &str) -> Result<Option<PersistedSession>, StoreError> {
        read_json(&self.path_for(session_id)).await
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(err)),
        }
    }
}

/// The session-scoped ephemeral store: API key plus the bounded debug
/// ring. Nothing here ever touches disk; the process end is the wipe.
#[derive(Debug, Default)]
pub struct SessionEphemeralStore {
    api_key: Mutex<Option<String>>,
    debug_ring: Mutex<VecDeque<DebugLogEntry>>,
}

impl SessionEphemeralStore {
    /// A fresh empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EphemeralStore for SessionEphemeralStore {
    async fn set_api_key(&self, key: String) {
        *self.api_key.lock().await = Some(key);
    }

    async fn api_key(&self) -> Option<String> {
        self.api_key.lock().await.clone()
    }

    async fn clear_api_key(&self) {
        *self.api_key.lock().await = None;
    }

    async fn push_debug(&self, entry: DebugLogEntry) {
        let mut ring = self.debug_ring.lock().await;
        // Overflow drops the oldest, silently.
        if ring.len() == DEBUG_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    async fn debug_log(&self) -> Vec<DebugLogEntry> {
        self.debug_ring.lock().await.iter().cloned().collect()
    }
}

/// File-backed synchronized preference store.
#[derive(Clone, Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    /// A store at `dir/preferences.json`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("preferences.json"),
        }
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn slot_preferences(&self) -> Option<SlotPreferences> {
        read_json(&self.path).await.ok().flatten()
    }

    async fn save_slot_preferences(&self, prefs: &SlotPreferences) -> Result<(), StoreError> {
        atomic_write(&self.path, prefs).await
    }
}

/// File-backed local order-history cache, one file per household.
#[derive(Clone, Debug)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// A cache rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, household_id: &str) -> PathBuf {
        self.dir
            .join(format!("orders-{}.json", sanitize(household_id)))
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn order_history(&self, household_id: &str) -> Option<OrderHistoryCache> {
        read_json(&self.path_for(household_id)).await.ok().flatten()
    }

    async fn save_order_history(
        &self,
        household_id: &str,
        cache: &OrderHistoryCache,
    ) -> Result<(), StoreError> {
        atomic_write(&self.path_for(household_id), cache).await
    }
}

/// In-memory cache used when no cache directory is configured.
#[derive(Debug, Default)]
pub struct MemoryOrderCache {
    histories: Mutex<HashMap<String, OrderHistoryCache>>,
}

impl MemoryOrderCache {
    /// A fresh empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryOrderCache {
    async fn order_history(&self, household_id: &str) -> Option<OrderHistoryCache> {
        self.histories.lock().await.get(household_id).cloned()
    }

    async fn save_order_history(
        &self,
        household_id: &str,
        cache: &OrderHistoryCache,
    ) -> Result<(), StoreError> {
        self.histories
            .lock()
            .await
            .insert(household_id.to_string(), cache.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartpilot_core::state::RunState;
    use chrono::Utc;

    fn session() -> PersistedSession {
        PersistedSession {
            state: RunState::idle("run-1", Utc::now()),
            checkpoint: None,
            household_id: None,
        }
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Test code
    async fn session_store_round_trips_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSessionStore::new(dir.path());

        assert!(store.save("s-1", &session()).await.is_ok());
        let loaded = store.load("s-1").await;
        assert!(loaded.is_ok_and(|s| s.is_some()));

        // No temp files left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Test code
    async fn missing_and_deleted_sessions_read_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSessionStore::new(dir.path());
        let loaded = store.load("nope").await;
        assert!(loaded.is_ok_and(|s| s.is_none()));

        assert!(store.save("s-1", &session()).await.is_ok());
        assert!(store.delete("s-1").await.is_ok());
        assert!(store.delete("s-1").await.is_ok());
        let loaded = store.load("s-1").await;
        assert!(loaded.is_ok_and(|s| s.is_none()));
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Test code
    async fn session_ids_are_sanitized_into_filenames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSessionStore::new(dir.path());
        assert!(store.save("../../escape", &session()).await.is_ok());
        let loaded = store.load("../../escape").await;
        assert!(loaded.is_ok_and(|s| s.is_some()));
        // The write stayed inside the store directory.
        assert!(std::fs::read_dir(dir.path()).expect("read dir").count() >= 1);
    }

    #[tokio::test]
    async fn ephemeral_ring_drops_oldest_silently() {
        let store = SessionEphemeralStore::new();
        for i in 0..505 {
            store
                .push_debug(DebugLogEntry {
                    at: Utc::now(),
                    component: "orchestrator".into(),
                    message: format!("entry {i}"),
                })
                .await;
        }
        let log = store.debug_log().await;
        assert_eq!(log.len(), 500);
        assert_eq!(log[0].message, "entry 5");
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Test code
    async fn preferences_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilePreferenceStore::new(dir.path());
        assert!(store.slot_preferences().await.is_none());

        let prefs = SlotPreferences {
            preferred_days: vec![0, 2],
            preferred_hours: Some((18, 21)),
            max_price_cents: Some(500),
        };
        assert!(store.save_slot_preferences(&prefs).await.is_ok());
        assert_eq!(store.slot_preferences().await, Some(prefs));
    }
}
