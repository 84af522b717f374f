use crate::backup::{self, BackupPayload, ValidationError};
use crate::models::{Episode, LibraryKey};
use crate::store::EntityStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Failed to access state storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Stored state is invalid: {0}")]
    Invalid(#[from] ValidationError),
}

/// Where user state blobs are saved between runs.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn persist(&self, user_id: &str, blob: &str) -> Result<(), PersistenceError>;

    async fn load(&self, user_id: &str) -> Result<Option<String>, PersistenceError>;
}

/// Keeps a single user's state as a backup JSON file on disk.
pub struct LocalFileStore {
    path: PathBuf,
}

impl LocalFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StateStore for LocalFileStore {
    #[instrument(skip(self, blob), fields(path = %self.path.display()))]
    async fn persist(&self, user_id: &str, blob: &str) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Replace the state file atomically.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, blob).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Persisted {} bytes of state for '{}'", blob.len(), user_id);
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self, _user_id: &str) -> Result<Option<String>, PersistenceError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// A backup plus the last fetched releases, so the calendar survives a restart
/// without refetching. Backups without `releases` still load.
#[derive(Serialize)]
struct SavedState<'a> {
    #[serde(flatten)]
    payload: &'a BackupPayload,
    releases: &'a HashMap<LibraryKey, Vec<Episode>>,
}

#[derive(Deserialize)]
struct SavedReleases {
    #[serde(default)]
    releases: HashMap<LibraryKey, Vec<Episode>>,
}

pub async fn save_store(state: &dyn StateStore, store: &EntityStore) -> Result<(), PersistenceError> {
    let payload = backup::encode(store);
    let blob = serde_json::to_string_pretty(&SavedState {
        payload: &payload,
        releases: store.release_cache(),
    })?;
    state.persist(&payload.user.username, &blob).await
}

/// Load saved state into a fresh store and rebuild its calendar. Nothing
/// saved yet is an empty store.
pub async fn load_store(state: &dyn StateStore, user_id: &str) -> Result<EntityStore, PersistenceError> {
    let mut store = EntityStore::new();
    if let Some(blob) = state.load(user_id).await? {
        backup::restore_into(&mut store, backup::decode(&blob)?);
        let cached: SavedReleases =
            serde_json::from_str(&blob).map_err(|e| ValidationError::Schema {
                field: "releases".to_string(),
                message: e.to_string(),
            })?;
        for (key, episodes) in cached.releases {
            store.record_releases(key, episodes);
        }
        store.rebuild_calendar();
        info!(
            "Loaded state: {} library items, {} releases, {} reminders",
            store.watchlist().len(),
            store.calendar().len(),
            store.reminders().len()
        );
    }
    Ok(store)
}
