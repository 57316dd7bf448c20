//! Listener profiles and episode progression.
//!
//! Each registered device maps to one profile carrying the listener's
//! story position. Advancement is the only mutation the gateway performs
//! on its own: a completed episode moves the profile forward, wrapping
//! seasons and stopping at the end of the catalog.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::device::DeviceId;
use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub age: u8,
    pub status: ProfileStatus,
    /// Next episode to play, 1-based.
    pub season: u32,
    pub episode: u32,
    pub episodes_completed: u32,
}

impl Profile {
    pub fn is_active(&self) -> bool {
        self.status == ProfileStatus::Active
    }
}

/// Where a profile landed after an episode completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advancement {
    Advanced { season: u32, episode: u32 },
    /// Already past the last episode of the last season. Not an error:
    /// the session still finished normally, there is just nothing new
    /// to point the profile at.
    SeriesComplete,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load(&self, device_id: &DeviceId) -> Result<Option<Profile>, SessionError>;
    async fn save(&self, device_id: &DeviceId, profile: &Profile) -> Result<(), SessionError>;
}

/// Profile access plus the progression rules the raw store knows nothing
/// about.
pub struct Profiles {
    store: Arc<dyn ProfileStore>,
    episodes_per_season: u32,
    max_seasons: u32,
}

impl Profiles {
    pub fn new(store: Arc<dyn ProfileStore>, episodes_per_season: u32, max_seasons: u32) -> Self {
        Self {
            store,
            episodes_per_season,
            max_seasons,
        }
    }

    pub async fn get(&self, device_id: &DeviceId) -> Result<Option<Profile>, SessionError> {
        self.store.load(device_id).await
    }

    pub async fn upsert(&self, device_id: &DeviceId, profile: Profile) -> Result<(), SessionError> {
        self.store.save(device_id, &profile).await
    }

    /// Move the profile past the episode it just completed. Episodes wrap
    /// into the next season; the final episode of the final season is
    /// terminal and leaves the pointer in place.
    pub async fn advance_episode(&self, device_id: &DeviceId) -> Result<Advancement, SessionError> {
        let mut profile = self
            .store
            .load(device_id)
            .await?
            .ok_or_else(|| SessionError::NotRegistered(device_id.clone()))?;

        profile.episodes_completed += 1;

        let advancement = if profile.episode < self.episodes_per_season {
            profile.episode += 1;
            Advancement::Advanced {
                season: profile.season,
                episode: profile.episode,
            }
        } else if profile.season < self.max_seasons {
            profile.season += 1;
            profile.episode = 1;
            Advancement::Advanced {
                season: profile.season,
                episode: profile.episode,
            }
        } else {
            Advancement::SeriesComplete
        };

        self.store.save(device_id, &profile).await?;
        info!(device_id = %device_id, ?advancement, "episode progression recorded");
        Ok(advancement)
    }
}

/// All profiles in one JSON file keyed by device id, rewritten on save.
pub struct FsProfileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FsProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, Profile>, SessionError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| SessionError::Storage(format!("profile file corrupt: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(SessionError::Storage(format!("read profiles: {e}"))),
        }
    }
}

#[async_trait]
impl ProfileStore for FsProfileStore {
    async fn load(&self, device_id: &DeviceId) -> Result<Option<Profile>, SessionError> {
        let mut all = self.read_all().await?;
        Ok(all.remove(device_id.as_str()))
    }

    async fn save(&self, device_id: &DeviceId, profile: &Profile) -> Result<(), SessionError> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(device_id.to_string(), profile.clone());
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SessionError::Storage(format!("create profile dir: {e}")))?;
        }
        let bytes = serde_json::to_vec_pretty(&all)
            .map_err(|e| SessionError::Storage(format!("encode profiles: {e}")))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| SessionError::Storage(format!("write profiles: {e}")))
    }
}

pub struct MemoryProfileStore {
    profiles: Mutex<HashMap<DeviceId, Profile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load(&self, device_id: &DeviceId) -> Result<Option<Profile>, SessionError> {
        Ok(self.profiles.lock().await.get(device_id).cloned())
    }

    async fn save(&self, device_id: &DeviceId, profile: &Profile) -> Result<(), SessionError> {
        self.profiles
            .lock()
            .await
            .insert(device_id.clone(), profile.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceId {
        "WXYZ0001".parse().unwrap()
    }

    fn profile(season: u32, episode: u32) -> Profile {
        Profile {
            name: "Ada".into(),
            age: 7,
            status: ProfileStatus::Active,
            season,
            episode,
            episodes_completed: 0,
        }
    }

    fn profiles() -> Profiles {
        Profiles::new(Arc::new(MemoryProfileStore::new()), 7, 10)
    }

    #[tokio::test]
    async fn advances_within_a_season() {
        let profiles = profiles();
        profiles.upsert(&device(), profile(2, 3)).await.unwrap();

        let result = profiles.advance_episode(&device()).await.unwrap();
        assert_eq!(result, Advancement::Advanced { season: 2, episode: 4 });

        let stored = profiles.get(&device()).await.unwrap().unwrap();
        assert_eq!(stored.episodes_completed, 1);
    }

    #[tokio::test]
    async fn season_finale_wraps_to_next_season() {
        let profiles = profiles();
        profiles.upsert(&device(), profile(2, 7)).await.unwrap();

        let result = profiles.advance_episode(&device()).await.unwrap();
        assert_eq!(result, Advancement::Advanced { season: 3, episode: 1 });
    }

    #[tokio::test]
    async fn series_finale_is_terminal_not_an_error() {
        let profiles = profiles();
        profiles.upsert(&device(), profile(10, 7)).await.unwrap();

        let result = profiles.advance_episode(&device()).await.unwrap();
        assert_eq!(result, Advancement::SeriesComplete);

        let stored = profiles.get(&device()).await.unwrap().unwrap();
        assert_eq!((stored.season, stored.episode), (10, 7));
        assert_eq!(stored.episodes_completed, 1);
    }

    #[tokio::test]
    async fn advancing_an_unknown_device_fails() {
        let err = profiles().advance_episode(&device()).await.unwrap_err();
        assert!(matches!(err, SessionError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn fs_store_round_trips_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsProfileStore::new(dir.path().join("profiles.json"));

        store.save(&device(), &profile(1, 1)).await.unwrap();
        let loaded = store.load(&device()).await.unwrap().unwrap();
        assert_eq!((loaded.season, loaded.episode), (1, 1));

        let missing: DeviceId = "QQQQ9999".parse().unwrap();
        assert!(store.load(&missing).await.unwrap().is_none());
    }
}
